//! Multi-device feed manager.
//!
//! [`FeedManager`] owns one connection task per started device (connect
//! -> session -> reconnect loop) and exposes setpoint publishing and
//! connection status APIs. Decoded readings flow out through the shared
//! [`EventHub`]; the manager itself never touches the pipeline beyond
//! publishing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use poolsense_core::device::{ConnectionState, DeviceRecord, DeviceStatus};
use poolsense_core::types::DeviceId;
use poolsense_core::{encode_select, DecodeError};
use poolsense_pipeline::EventHub;

use crate::client::{BrokerClient, ConnectionError};
use crate::frames::Command;
use crate::reconnect::{Backoff, ReconnectConfig};
use crate::session::{run_session, SessionCommand};

/// Capacity of each device's command queue.
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Manages persistent broker connections for all started devices.
///
/// Created once at application startup via [`FeedManager::new`]. The
/// returned `Arc` can be cheaply cloned wherever feeds are controlled.
pub struct FeedManager {
    /// Active feed tasks indexed by device id.
    devices: RwLock<HashMap<DeviceId, ManagedDevice>>,
    hub: Arc<EventHub>,
    broker_url: String,
    reconnect: ReconnectConfig,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

/// Internal bookkeeping for a single device feed.
struct ManagedDevice {
    record: DeviceRecord,
    command_tx: mpsc::Sender<SessionCommand>,
    task_handle: tokio::task::JoinHandle<()>,
    /// Per-device cancellation token (child of the master token).
    cancel: CancellationToken,
    status: Arc<RwLock<DeviceStatus>>,
}

impl FeedManager {
    pub fn new(broker_url: String, hub: Arc<EventHub>, reconnect: ReconnectConfig) -> Arc<Self> {
        Arc::new(Self {
            devices: RwLock::new(HashMap::new()),
            hub,
            broker_url,
            reconnect,
            cancel: CancellationToken::new(),
        })
    }

    /// Start the feed task for a device.
    ///
    /// Idempotent: a second start for the same device id is a no-op
    /// while the first task is still managed.
    pub async fn start(&self, record: DeviceRecord) {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&record.id) {
            tracing::debug!(device_id = %record.id, "Feed already running");
            return;
        }

        let device_id = record.id.clone();
        let client = BrokerClient::new(
            self.broker_url.clone(),
            record.id.clone(),
            record.access_token.clone(),
        );
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let status = Arc::new(RwLock::new(DeviceStatus::new()));
        let device_cancel = self.cancel.child_token();

        let hub = Arc::clone(&self.hub);
        let status_clone = Arc::clone(&status);
        let cancel_clone = device_cancel.clone();
        let config = self.reconnect.clone();
        let record_clone = record.clone();

        let task_handle = tokio::spawn(async move {
            tracing::info!(
                device_id = %record_clone.id,
                name = %record_clone.name,
                "Starting device feed task",
            );
            run_connection_loop(
                &client,
                &record_clone,
                &hub,
                command_rx,
                &status_clone,
                config,
                &cancel_clone,
            )
            .await;
            tracing::info!(device_id = %record_clone.id, "Device feed task exited");
        });

        let managed = ManagedDevice {
            record,
            command_tx,
            task_handle,
            cancel: device_cancel,
            status,
        };

        devices.insert(device_id, managed);
    }

    /// Stop the feed task for a device and release its connection.
    ///
    /// Waits up to 5 seconds for a clean exit. Stopping an unknown
    /// device is a no-op.
    pub async fn stop(&self, device_id: &str) {
        let removed = self.devices.write().await.remove(device_id);
        let Some(managed) = removed else {
            tracing::debug!(device_id, "Stop requested for unknown device");
            return;
        };

        tracing::info!(device_id, "Stopping device feed");
        managed.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await;
    }

    /// Write a select/setpoint value to a device.
    ///
    /// `value` is the display form (an option label or a target
    /// number); encoding to the wire representation happens here.
    /// Best-effort: no retry, failures surface to the caller.
    pub async fn publish(
        &self,
        device_id: &str,
        sensor: &str,
        value: &str,
    ) -> Result<(), FeedError> {
        let (kind, command_tx) = {
            let devices = self.devices.read().await;
            let managed = devices
                .get(device_id)
                .ok_or_else(|| FeedError::NotStarted(device_id.to_string()))?;
            (managed.record.kind, managed.command_tx.clone())
        };

        let raw = encode_select(kind, sensor, value)?;
        let command = Command::set(device_id, sensor, &raw);

        let (reply_tx, reply_rx) = oneshot::channel();
        command_tx
            .send(SessionCommand::Publish {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ConnectionError::SessionGone)?;
        reply_rx.await.map_err(|_| ConnectionError::SessionGone)??;

        tracing::info!(device_id, sensor, value, "Setpoint published");
        Ok(())
    }

    /// Current connection status of a device, if it is managed.
    pub async fn status(&self, device_id: &str) -> Option<DeviceStatus> {
        let devices = self.devices.read().await;
        let managed = devices.get(device_id)?;
        let status = managed.status.read().await.clone();
        Some(status)
    }

    /// Gracefully shut down all feed tasks.
    ///
    /// Cancels the master token, then waits up to 5 seconds per task
    /// for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down feed manager");
        self.cancel.cancel();

        let mut devices = self.devices.write().await;
        for (id, managed) in devices.drain() {
            tracing::info!(device_id = %id, "Stopping device feed task");
            managed.cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await;
        }

        tracing::info!("Feed manager shut down complete");
    }
}

/// Core device loop: connect -> session -> backoff -> reconnect.
///
/// Runs until the cancellation token is triggered. The [`Backoff`]
/// lives here so the schedule carries across sessions.
async fn run_connection_loop(
    client: &BrokerClient,
    record: &DeviceRecord,
    hub: &EventHub,
    mut commands: mpsc::Receiver<SessionCommand>,
    status: &RwLock<DeviceStatus>,
    config: ReconnectConfig,
    cancel: &CancellationToken,
) {
    let mut backoff = Backoff::new(config);

    loop {
        // Past the failure threshold the surfaced state stays
        // Disconnected until a connect succeeds.
        if !backoff.threshold_crossed() {
            set_state(status, ConnectionState::Connecting, None).await;
        }

        let conn = tokio::select! {
            _ = cancel.cancelled() => return,
            result = client.connect() => match result {
                Ok(conn) => conn,
                Err(e) => {
                    let wait = backoff.record_failure();
                    if backoff.threshold_crossed() {
                        tracing::warn!(
                            device_id = %record.id,
                            error = %e,
                            "Failure threshold crossed, surfacing device as disconnected (retries continue)",
                        );
                        set_state(status, ConnectionState::Disconnected, Some(e.to_string())).await;
                    } else {
                        tracing::warn!(
                            device_id = %record.id,
                            error = %e,
                            delay_ms = wait.as_millis() as u64,
                            "Connect failed, backing off",
                        );
                        set_state(status, ConnectionState::Backoff, Some(e.to_string())).await;
                    }
                    if !wait_for_retry(wait, &mut commands, cancel).await {
                        return;
                    }
                    continue;
                }
            }
        };

        backoff.record_connected();
        set_state(status, ConnectionState::Connected, None).await;

        let connected_at = tokio::time::Instant::now();
        run_session(conn, record, hub, &mut commands, status, cancel).await;
        backoff.record_session_end(connected_at.elapsed());

        if cancel.is_cancelled() {
            set_state(status, ConnectionState::Disconnected, None).await;
            return;
        }

        tracing::info!(device_id = %record.id, "Feed session ended, scheduling reconnect");
        set_state(status, ConnectionState::Backoff, None).await;
        if !wait_for_retry(backoff.delay(), &mut commands, cancel).await {
            return;
        }
    }
}

/// Sleep out a backoff delay.
///
/// Publish commands arriving meanwhile are rejected so callers fail
/// fast instead of queueing into the next session. Returns `false`
/// when cancelled or the manager handle is gone.
async fn wait_for_retry(
    delay: Duration,
    commands: &mut mpsc::Receiver<SessionCommand>,
    cancel: &CancellationToken,
) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep_until(deadline) => return true,
            cmd = commands.recv() => match cmd {
                Some(cmd) => cmd.reject(),
                None => return false,
            }
        }
    }
}

async fn set_state(status: &RwLock<DeviceStatus>, state: ConnectionState, reason: Option<String>) {
    let mut guard = status.write().await;
    guard.state = state;
    guard.reason = reason;
}

/// Errors surfaced by manager operations.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// No feed task is running for the device.
    #[error("No running feed for device {0}")]
    NotStarted(String),

    /// The display value could not be encoded for the wire.
    #[error("Value encoding failed: {0}")]
    Encode(#[from] DecodeError),

    /// The command could not be delivered or the write failed.
    #[error("Command delivery failed: {0}")]
    Connection(#[from] ConnectionError),
}
