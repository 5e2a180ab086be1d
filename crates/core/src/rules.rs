//! Alarm rule definitions and the immutable rule snapshot.
//!
//! Rules are supplied by an external rule store; the engine never
//! mutates them. Each refresh builds a fresh [`RuleSet`] snapshot that
//! is swapped in whole, so evaluation never races a mid-flight edit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, RuleId, SensorCode, Timestamp};

/// Threshold comparison applied to incoming values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmCondition {
    /// value < `threshold_min`
    Below,
    /// value > `threshold_max`
    Above,
    /// |value − `threshold_min`| within epsilon, or the status label
    /// equals `status_value` for non-numeric sensors.
    Equals,
    /// value < `threshold_min` or value > `threshold_max`
    OutOfRange,
}

impl AlarmCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmCondition::Below => "below",
            AlarmCondition::Above => "above",
            AlarmCondition::Equals => "equals",
            AlarmCondition::OutOfRange => "out_of_range",
        }
    }
}

impl std::fmt::Display for AlarmCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivery target for alarm notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifyChannel {
    /// Direct HTTP POST of the alarm payload.
    Webhook { url: String },
    /// Delivery through the configured email-relay webhook.
    Email { to: String },
}

fn default_enabled() -> bool {
    true
}

/// A user-defined threshold alarm.
///
/// `last_triggered` is the persisted record of the most recent firing;
/// on refresh the engine uses it to rebuild cooldown state after a
/// restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRule {
    pub id: RuleId,
    pub name: String,
    pub device_id: DeviceId,
    pub sensor: SensorCode,
    pub condition: AlarmCondition,
    #[serde(default)]
    pub threshold_min: Option<f64>,
    #[serde(default)]
    pub threshold_max: Option<f64>,
    /// Target status label for `equals` rules on status sensors.
    #[serde(default)]
    pub status_value: Option<String>,
    pub cooldown_minutes: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub channels: Vec<NotifyChannel>,
    #[serde(default)]
    pub last_triggered: Option<Timestamp>,
}

impl AlarmRule {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes)
    }

    /// Whether two rules define the same alarm, ignoring trigger
    /// history. Used by the engine to decide if a refreshed rule keeps
    /// its state machine or restarts it.
    pub fn definition_eq(&self, other: &AlarmRule) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.device_id == other.device_id
            && self.sensor == other.sensor
            && self.condition == other.condition
            && self.threshold_min == other.threshold_min
            && self.threshold_max == other.threshold_max
            && self.status_value == other.status_value
            && self.cooldown_minutes == other.cooldown_minutes
            && self.enabled == other.enabled
            && self.channels == other.channels
    }
}

/// Immutable snapshot of the enabled rules plus lookup indexes.
///
/// Built once per refresh; disabled rules are dropped at build time so
/// the engine never sees them. `device_names` carries display names for
/// alarm payloads.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: HashMap<RuleId, AlarmRule>,
    index: HashMap<DeviceId, HashMap<SensorCode, Vec<RuleId>>>,
    device_names: HashMap<DeviceId, String>,
}

impl RuleSet {
    pub fn build(rules: Vec<AlarmRule>, device_names: HashMap<DeviceId, String>) -> Self {
        let mut by_id = HashMap::new();
        let mut index: HashMap<DeviceId, HashMap<SensorCode, Vec<RuleId>>> = HashMap::new();

        for rule in rules.into_iter().filter(|r| r.enabled) {
            index
                .entry(rule.device_id.clone())
                .or_default()
                .entry(rule.sensor.clone())
                .or_default()
                .push(rule.id);
            by_id.insert(rule.id, rule);
        }

        Self {
            rules: by_id,
            index,
            device_names,
        }
    }

    /// Rules watching a (device, sensor) pair. O(1); the common case of
    /// an unwatched sensor returns the empty slice.
    pub fn rules_for(&self, device_id: &str, sensor: &str) -> &[RuleId] {
        self.index
            .get(device_id)
            .and_then(|sensors| sensors.get(sensor))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, id: RuleId) -> Option<&AlarmRule> {
        self.rules.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlarmRule> {
        self.rules.values()
    }

    pub fn device_name(&self, device_id: &str) -> Option<&str> {
        self.device_names.get(device_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
