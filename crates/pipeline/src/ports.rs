//! Integration seams for external collaborators.
//!
//! The pipeline does not own device provisioning, rule storage, or history
//! persistence. The daemon wires in implementations of these traits; tests
//! substitute in-memory fakes.

use std::collections::HashMap;

use async_trait::async_trait;
use poolsense_core::{AlarmRule, DeviceRecord, ReadingEvent};

/// Source of the active device list with credentials and device types.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn active_devices(&self) -> anyhow::Result<Vec<DeviceRecord>>;
}

/// One pull from the external rule store.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    pub rules: Vec<AlarmRule>,
    /// Display names keyed by device id, for notification payloads.
    pub device_names: HashMap<String, String>,
}

/// Source of the current alarm rule set.
#[async_trait]
pub trait RuleProvider: Send + Sync {
    async fn load_rules(&self) -> anyhow::Result<RuleSnapshot>;
}

/// Append-only history sink for readings.
///
/// Every decoded reading is offered, including out-of-order ones the state
/// store rejects as stale. Failures are logged by the caller and never stop
/// the pipeline.
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    async fn append(&self, reading: &ReadingEvent) -> anyhow::Result<()>;
}
