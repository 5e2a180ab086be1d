//! WebSocket client for one device's broker feed.
//!
//! [`BrokerClient`] holds the connection configuration for a single
//! device. Call [`BrokerClient::connect`] to establish a live
//! [`FeedConnection`] over WebSocket.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Configuration handle for one device's feed.
///
/// Stores the broker URL and the device credential. The access token is
/// only ever sent to the broker; it is never logged.
pub struct BrokerClient {
    device_id: String,
    broker_url: String,
    access_token: String,
}

/// A live WebSocket connection to the broker for one device.
pub struct FeedConnection {
    pub device_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl BrokerClient {
    /// Create a new client for a device feed.
    ///
    /// * `broker_url`   - WebSocket base URL, e.g. `wss://broker.example/feed`.
    /// * `device_id`    - broker-assigned device id, e.g. `D1234`.
    /// * `access_token` - per-device credential from onboarding.
    pub fn new(broker_url: String, device_id: String, access_token: String) -> Self {
        Self {
            device_id,
            broker_url,
            access_token,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }

    /// Connect to the broker WebSocket endpoint.
    ///
    /// The device id and its access token travel as query parameters;
    /// the broker scopes the session to that device's topics.
    pub async fn connect(&self) -> Result<FeedConnection, ConnectionError> {
        let url = format!(
            "{}?device={}&token={}",
            self.broker_url, self.device_id, self.access_token
        );

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ConnectionError::Connect(format!(
                "Failed to connect to broker at {}: {e}",
                self.broker_url
            ))
        })?;

        tracing::info!(
            device_id = %self.device_id,
            "Connected to broker at {}",
            self.broker_url,
        );

        Ok(FeedConnection {
            device_id: self.device_id.clone(),
            ws_stream,
        })
    }
}

/// Transient connection-level failures. All trigger backoff and retry;
/// none are fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connect(String),

    /// A command frame could not be written to the socket.
    #[error("Send error: {0}")]
    Send(String),

    /// The device's session is gone or between connections; the
    /// command was not delivered.
    #[error("Feed session unavailable")]
    SessionGone,
}
