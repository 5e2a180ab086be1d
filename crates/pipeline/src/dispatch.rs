//! Alarm notification dispatch with per-channel retry.
//!
//! Every channel of an [`AlarmEvent`] is attempted independently and
//! concurrently: webhooks receive the serialized event, email channels go
//! through a relay webhook that turns the payload into outgoing mail. Failed
//! attempts are retried with exponential backoff (1 s, 2 s, 4 s by default)
//! before the channel is recorded as failed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use poolsense_core::{AlarmEvent, NotifyChannel};
use tokio::sync::mpsc;

/// Retry delays between delivery attempts (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the engine-to-dispatcher alarm queue.
pub const ALARM_QUEUE_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for notification delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("webhook returned HTTP {0}")]
    HttpStatus(u16),

    /// An email channel was configured but no relay endpoint is set.
    #[error("no email relay configured")]
    NoEmailRelay,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// HTTP seam so delivery logic can be exercised without a network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), DispatchError>;
}

/// Production transport backed by a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), DispatchError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(DispatchError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Dispatcher settings supplied by the daemon.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Webhook invoked for every alarm, in addition to per-rule channels.
    pub global_webhook_url: Option<String>,
    /// Relay endpoint that turns alarm payloads into outgoing mail.
    pub email_relay_url: Option<String>,
    /// Delays between delivery attempts; one final attempt follows the last.
    pub retry_delays: Vec<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            global_webhook_url: None,
            email_relay_url: None,
            retry_delays: RETRY_DELAYS_SECS.map(Duration::from_secs).to_vec(),
        }
    }
}

/// Outcome of one delivery channel for one alarm.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub target: String,
    pub result: Result<(), DispatchError>,
}

/// Delivers alarm events to their notification channels.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()), config)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: DispatcherConfig) -> Self {
        Self { transport, config }
    }

    /// Consume the alarm queue, dispatching each event in its own task so a
    /// slow endpoint never blocks the queue.
    ///
    /// Exits when the engine side of the queue is dropped; in-flight
    /// deliveries run to completion on the runtime.
    pub async fn run(self: Arc<Self>, mut alarms: mpsc::Receiver<AlarmEvent>) {
        while let Some(event) = alarms.recv().await {
            let dispatcher = Arc::clone(&self);
            tokio::spawn(async move {
                dispatcher.dispatch(&event).await;
            });
        }
        tracing::info!("alarm queue closed, dispatcher shutting down");
    }

    /// Deliver one alarm to every channel independently.
    ///
    /// Channels run concurrently; one channel exhausting its retries is
    /// recorded as a per-channel failure and never affects siblings.
    pub async fn dispatch(&self, event: &AlarmEvent) -> Vec<ChannelOutcome> {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(alarm = %event.alarm_name, error = %e, "alarm payload serialization failed");
                return Vec::new();
            }
        };

        let mut targets = event.channels.clone();
        if let Some(url) = &self.config.global_webhook_url {
            targets.push(NotifyChannel::Webhook { url: url.clone() });
        }

        let deliveries = targets
            .iter()
            .map(|channel| self.deliver_channel(channel, event, &payload));
        let outcomes = future::join_all(deliveries).await;

        for outcome in &outcomes {
            match &outcome.result {
                Ok(()) => tracing::info!(
                    alarm = %event.alarm_name,
                    target = %outcome.target,
                    "alarm notification delivered"
                ),
                Err(e) => tracing::error!(
                    alarm = %event.alarm_name,
                    target = %outcome.target,
                    error = %e,
                    "alarm notification failed after all retries"
                ),
            }
        }
        outcomes
    }

    async fn deliver_channel(
        &self,
        channel: &NotifyChannel,
        event: &AlarmEvent,
        payload: &serde_json::Value,
    ) -> ChannelOutcome {
        match channel {
            NotifyChannel::Webhook { url } => ChannelOutcome {
                target: url.clone(),
                result: self.deliver(url, payload).await,
            },
            NotifyChannel::Email { to } => {
                let result = match &self.config.email_relay_url {
                    Some(relay) => {
                        let body = email_payload(event, payload, to);
                        self.deliver(relay, &body).await
                    }
                    None => Err(DispatchError::NoEmailRelay),
                };
                ChannelOutcome {
                    target: format!("mailto:{to}"),
                    result,
                }
            }
        }
    }

    /// Deliver a payload to one URL with retry.
    ///
    /// Returns `Ok(())` on the first successful attempt.
    async fn deliver(&self, url: &str, payload: &serde_json::Value) -> Result<(), DispatchError> {
        for (attempt, delay) in self.config.retry_delays.iter().enumerate() {
            match self.transport.post(url, payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        error = %e,
                        "notification attempt failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        self.transport.post(url, payload).await
    }
}

/// Email deliveries reuse the alarm payload, adding routing hints for the
/// relay.
fn email_payload(
    event: &AlarmEvent,
    payload: &serde_json::Value,
    to: &str,
) -> serde_json::Value {
    let mut body = payload.clone();
    if let serde_json::Value::Object(map) = &mut body {
        map.insert(
            "email".to_string(),
            serde_json::json!({
                "to": to,
                "subject": format!("Pool Alarm: {}", event.alarm_name),
            }),
        );
    }
    body
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
