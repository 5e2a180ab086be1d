//! Per-connection feed session loop.
//!
//! [`run_session`] drives one live WebSocket connection for one device:
//! it re-issues the device's full subscription set, requests current
//! values, then reads value frames and writes queued commands via
//! `tokio::select!` until the connection drops or the device is
//! stopped. Decode and topic errors drop the single frame, never the
//! connection.

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use poolsense_core::device::{DeviceRecord, DeviceStatus};
use poolsense_core::{points, ReadingEvent};
use poolsense_pipeline::EventHub;

use crate::client::{ConnectionError, FeedConnection};
use crate::frames::{parse_frame, Command, FeedChannel, FeedFrame, Topic};

/// Commands routed from the manager handle into the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Write a command frame to the broker socket and report the result.
    Publish {
        command: Command,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
}

impl SessionCommand {
    /// Fail the command without attempting delivery.
    ///
    /// Used while the device is between connections, so publishes fail
    /// fast instead of queueing until the next session.
    pub fn reject(self) {
        match self {
            SessionCommand::Publish { reply, .. } => {
                let _ = reply.send(Err(ConnectionError::SessionGone));
            }
        }
    }
}

/// Drive a single feed session until the connection ends.
///
/// Returns when the WebSocket closes, a fatal send/receive error
/// occurs, or `cancel` is triggered. The caller owns reconnection.
pub async fn run_session(
    conn: FeedConnection,
    record: &DeviceRecord,
    hub: &EventHub,
    commands: &mut mpsc::Receiver<SessionCommand>,
    status: &RwLock<DeviceStatus>,
    cancel: &CancellationToken,
) {
    let (mut sink, mut stream) = conn.ws_stream.split();

    match send_subscriptions(&mut sink, record).await {
        Ok(count) => {
            tracing::info!(
                device_id = %record.id,
                sensors = count,
                "Subscribed to device topics and requested current values",
            );
        }
        Err(e) => {
            tracing::error!(device_id = %record.id, error = %e, "Subscription burst failed");
            return;
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(device_id = %record.id, "Feed session cancelled");
                return;
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(SessionCommand::Publish { command, reply }) => {
                        let result = sink
                            .send(Message::Text(command.to_text()))
                            .await
                            .map_err(|e| ConnectionError::Send(e.to_string()));
                        let failed = result.is_err();
                        let _ = reply.send(result);
                        if failed {
                            tracing::error!(
                                device_id = %record.id,
                                "Command write failed, ending session",
                            );
                            return;
                        }
                    }
                    None => {
                        // The manager dropped its handle; the device is
                        // being torn down.
                        return;
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, record, hub, status).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(device_id = %record.id, ?frame, "Broker closed WebSocket");
                        return;
                    }
                    Some(Ok(_)) => {
                        // Binary / Frame payloads are not part of the feed protocol.
                    }
                    Some(Err(e)) => {
                        tracing::error!(device_id = %record.id, error = %e, "WebSocket receive error");
                        return;
                    }
                    None => {
                        tracing::info!(device_id = %record.id, "WebSocket stream exhausted");
                        return;
                    }
                }
            }
        }
    }
}

/// Send the full subscription set, then one value request per sensor so
/// the broker replays current values without waiting for the next
/// device report.
async fn send_subscriptions<S>(
    sink: &mut S,
    record: &DeviceRecord,
) -> Result<usize, tokio_tungstenite::tungstenite::Error>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let mut count = 0;
    for spec in points::sensor_specs(record.kind) {
        let cmd = Command::subscribe(&record.id, spec.code);
        sink.send(Message::Text(cmd.to_text())).await?;
        count += 1;
    }
    for spec in points::sensor_specs(record.kind) {
        let cmd = Command::get(&record.id, spec.code);
        sink.send(Message::Text(cmd.to_text())).await?;
    }
    Ok(count)
}

/// Parse one inbound text frame and publish the decoded reading.
///
/// Every drop path logs and returns; a bad frame never ends the
/// session.
async fn handle_frame(
    text: &str,
    record: &DeviceRecord,
    hub: &EventHub,
    status: &RwLock<DeviceStatus>,
) {
    let data = match parse_frame(text) {
        Ok(FeedFrame::Value(data)) => data,
        Err(e) => {
            tracing::warn!(
                device_id = %record.id,
                error = %e,
                raw_frame = %text,
                "Failed to parse broker frame",
            );
            return;
        }
    };

    let topic = match Topic::parse(&data.topic) {
        Ok(topic) => topic,
        Err(e) => {
            tracing::warn!(device_id = %record.id, error = %e, "Dropping frame with bad topic");
            return;
        }
    };
    if topic.channel != FeedChannel::Value || topic.device_id != record.id {
        tracing::warn!(
            device_id = %record.id,
            topic = %data.topic,
            "Dropping frame addressed to a foreign topic",
        );
        return;
    }

    status.write().await.last_seen = Some(Utc::now());

    let observed_at = data.timestamp.unwrap_or_else(Utc::now);
    match ReadingEvent::from_wire(record.kind, &record.id, &topic.sensor, &data.value, observed_at)
    {
        Ok(event) => {
            tracing::debug!(
                device_id = %record.id,
                sensor = %event.sensor,
                value = %event.value,
                "Reading decoded",
            );
            hub.publish(event);
        }
        Err(e) => {
            tracing::warn!(
                device_id = %record.id,
                sensor = %topic.sensor,
                error = %e,
                "Dropping undecodable frame",
            );
        }
    }
}
