//! Current-value store for sensor readings.
//!
//! The in-memory map is the source of truth for "current"; the time-series
//! sink is advisory history. An update applies only when strictly newer
//! than the stored entry, so replayed or out-of-order readings never
//! regress it.

use std::collections::HashMap;
use std::sync::Arc;

use poolsense_core::types::{DeviceId, SensorCode, Timestamp};
use poolsense_core::{DecodedValue, ReadingEvent};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use crate::ports::TimeSeriesSink;

/// One retained value for a (device, sensor) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredValue {
    pub value: DecodedValue,
    pub unit: Option<String>,
    pub observed_at: Timestamp,
}

/// Last-known value per (device, sensor) pair.
#[derive(Debug, Default)]
pub struct StateStore {
    values: RwLock<HashMap<DeviceId, HashMap<SensorCode, StoredValue>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a reading. Returns `false` when the stored entry is as new as
    /// or newer than the event; a timestamp tie keeps the first value seen.
    pub async fn update(&self, event: &ReadingEvent) -> bool {
        let mut values = self.values.write().await;
        let sensors = values.entry(event.device_id.clone()).or_default();
        if let Some(existing) = sensors.get(&event.sensor) {
            if event.observed_at <= existing.observed_at {
                return false;
            }
        }
        sensors.insert(
            event.sensor.clone(),
            StoredValue {
                value: event.value.clone(),
                unit: event.unit.clone(),
                observed_at: event.observed_at,
            },
        );
        true
    }

    /// Current value for one sensor.
    pub async fn get(&self, device_id: &str, sensor: &str) -> Option<StoredValue> {
        let values = self.values.read().await;
        values.get(device_id)?.get(sensor).cloned()
    }

    /// Current values for every sensor of one device.
    pub async fn snapshot(&self, device_id: &str) -> HashMap<SensorCode, StoredValue> {
        let values = self.values.read().await;
        values.get(device_id).cloned().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// StateWriter
// ---------------------------------------------------------------------------

/// Background service that applies readings to the store and appends them to
/// the history sink.
pub struct StateWriter;

impl StateWriter {
    /// Run the writer loop.
    ///
    /// Every received reading goes to the sink; only readings strictly newer
    /// than the stored value become current. Sink failures are logged and
    /// do not roll back the in-memory application. The loop exits when the
    /// hub is dropped.
    pub async fn run(
        store: Arc<StateStore>,
        sink: Arc<dyn TimeSeriesSink>,
        mut receiver: broadcast::Receiver<ReadingEvent>,
    ) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if !store.update(&event).await {
                        tracing::debug!(
                            device_id = %event.device_id,
                            sensor = %event.sensor,
                            "stale reading kept out of current state"
                        );
                    }
                    if let Err(e) = sink.append(&event).await {
                        tracing::warn!(
                            error = %e,
                            device_id = %event.device_id,
                            sensor = %event.sensor,
                            "time-series append failed"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "state writer lagged, some readings were not recorded");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event hub closed, state writer shutting down");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
