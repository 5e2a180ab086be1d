//! Alarm rule evaluation.
//!
//! Pure logic, no I/O. Readings come in one at a time, rules watching the
//! same (device, sensor) pair advance their state machines, and qualifying
//! transitions come back as [`AlarmEvent`]s for the dispatcher. The caller
//! swaps in refreshed rule sets via [`AlarmEngine::apply_rules`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::decode::DecodedValue;
use crate::reading::ReadingEvent;
use crate::rules::{AlarmCondition, AlarmRule, NotifyChannel, RuleSet};
use crate::types::{DeviceId, RuleId, SensorCode, Timestamp};

/// Relative tolerance for `equals` comparisons, as a fraction of the
/// threshold (0.001 = 0.1%).
const DEFAULT_EQUALS_EPSILON_RATIO: f64 = 0.001;

/// Floor for the equality tolerance so a zero threshold still matches itself.
const MIN_EPSILON: f64 = 1e-9;

/// Tuning knobs for rule evaluation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub equals_epsilon_ratio: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            equals_epsilon_ratio: DEFAULT_EQUALS_EPSILON_RATIO,
        }
    }
}

/// Position of a rule's state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    /// Watching; the next matching value is evaluated against the condition.
    #[default]
    Idle,
    /// Condition just matched; held only while the event is being emitted.
    Triggered,
    /// Suppressing repeats until the cooldown window has elapsed.
    Cooldown,
}

/// Per-rule evaluation state. One instance per enabled rule.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlarmState {
    pub status: AlarmStatus,
    pub last_value: Option<DecodedValue>,
    pub last_triggered: Option<Timestamp>,
    #[serde(skip)]
    config_error: bool,
}

impl AlarmState {
    /// Whether the rule has been sidelined by a configuration error.
    pub fn has_config_error(&self) -> bool {
        self.config_error
    }
}

/// A rule/value combination that can never evaluate.
///
/// Surfaced once per rule, not per event; the rule is skipped until its
/// definition changes.
#[derive(Debug, Error, PartialEq)]
pub enum RuleConfigError {
    #[error("condition `{condition}` requires a numeric value, got `{value}`")]
    NonNumericValue {
        condition: AlarmCondition,
        value: String,
    },
    #[error("condition `{condition}` is missing a threshold bound")]
    MissingThreshold { condition: AlarmCondition },
    #[error("status comparison with condition `{condition}` is not supported")]
    StatusComparison { condition: AlarmCondition },
}

/// Notification payload emitted on an `Idle -> Triggered` transition.
///
/// Serializes to the delivered webhook body; `channels` rides along for the
/// dispatcher and is not part of the payload.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmEvent {
    pub alarm_id: RuleId,
    pub device_id: DeviceId,
    pub device_name: String,
    pub alarm_name: String,
    pub sensor_type: SensorCode,
    pub sensor_name: String,
    pub sensor_value: DecodedValue,
    pub formatted_value: String,
    pub condition_met: String,
    pub triggered_at: Timestamp,
    pub threshold_min: Option<f64>,
    pub threshold_max: Option<f64>,
    pub cooldown_minutes: i64,
    #[serde(skip)]
    pub channels: Vec<NotifyChannel>,
}

/// Evaluates readings against the active rule set.
#[derive(Debug)]
pub struct AlarmEngine {
    config: EngineConfig,
    rules: Arc<RuleSet>,
    states: HashMap<RuleId, AlarmState>,
}

impl AlarmEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            rules: Arc::new(RuleSet::default()),
            states: HashMap::new(),
        }
    }

    /// Swap in a refreshed rule set.
    ///
    /// State carries over for rules whose definition is unchanged. Changed
    /// rules restart, seeded into `Cooldown` when the store supplies a
    /// `last_triggered` timestamp, and states of removed rules are dropped.
    pub fn apply_rules(&mut self, rules: Arc<RuleSet>) {
        let mut states = HashMap::with_capacity(rules.len());
        for rule in rules.iter() {
            let state = match self.states.remove(&rule.id) {
                Some(prev)
                    if self
                        .rules
                        .get(rule.id)
                        .is_some_and(|old| old.definition_eq(rule)) =>
                {
                    prev
                }
                _ => seeded_state(rule),
            };
            states.insert(rule.id, state);
        }
        self.states = states;
        self.rules = rules;
    }

    /// Run one reading through every rule watching its (device, sensor) pair.
    ///
    /// Unrelated readings are rejected in O(1) by the rule index.
    pub fn evaluate(&mut self, event: &ReadingEvent) -> Vec<AlarmEvent> {
        let rules = Arc::clone(&self.rules);
        let mut triggered = Vec::new();

        for &id in rules.rules_for(&event.device_id, &event.sensor) {
            let Some(rule) = rules.get(id) else {
                continue;
            };
            let state = self.states.entry(id).or_default();
            if state.config_error {
                continue;
            }
            state.last_value = Some(event.value.clone());

            if state.status == AlarmStatus::Cooldown {
                let elapsed = state
                    .last_triggered
                    .map(|at| event.observed_at.signed_duration_since(at));
                match elapsed {
                    Some(e) if e < rule.cooldown() => continue,
                    // Expired (or no trigger on record): this same reading is
                    // evaluated normally.
                    _ => state.status = AlarmStatus::Idle,
                }
            }

            let checked = check_condition(
                rule,
                &event.sensor_name,
                &event.formatted_value(),
                &event.value,
                self.config.equals_epsilon_ratio,
            );
            match checked {
                Ok(Some(condition_met)) => {
                    state.status = AlarmStatus::Triggered;
                    state.last_triggered = Some(event.observed_at);
                    info!(
                        rule_id = %rule.id,
                        device_id = %event.device_id,
                        "alarm triggered: {}",
                        condition_met
                    );
                    triggered.push(AlarmEvent {
                        alarm_id: rule.id,
                        device_id: event.device_id.clone(),
                        device_name: rules
                            .device_name(&event.device_id)
                            .unwrap_or(event.device_id.as_str())
                            .to_string(),
                        alarm_name: rule.name.clone(),
                        sensor_type: event.sensor.clone(),
                        sensor_name: event.sensor_name.clone(),
                        sensor_value: event.value.clone(),
                        formatted_value: event.formatted_value(),
                        condition_met,
                        triggered_at: event.observed_at,
                        threshold_min: rule.threshold_min,
                        threshold_max: rule.threshold_max,
                        cooldown_minutes: rule.cooldown_minutes,
                        channels: rule.channels.clone(),
                    });
                    state.status = AlarmStatus::Cooldown;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        sensor = %event.sensor,
                        "alarm rule cannot evaluate: {}",
                        e
                    );
                    state.config_error = true;
                }
            }
        }

        triggered
    }

    /// Current state machine for a rule, if it is active.
    pub fn state(&self, id: RuleId) -> Option<&AlarmState> {
        self.states.get(&id)
    }
}

/// Initial state for a rule entering the engine.
fn seeded_state(rule: &AlarmRule) -> AlarmState {
    match rule.last_triggered {
        // Restart case: resume the cooldown instead of re-firing on the
        // first reading. The expiry check lets an old timestamp straight
        // back into `Idle`.
        Some(at) => AlarmState {
            status: AlarmStatus::Cooldown,
            last_triggered: Some(at),
            ..AlarmState::default()
        },
        None => AlarmState::default(),
    }
}

/// Evaluate one rule condition against a decoded value.
///
/// Returns the human condition description when met, `None` when not met,
/// and an error when the rule can never evaluate against this sensor.
fn check_condition(
    rule: &AlarmRule,
    sensor_name: &str,
    formatted_value: &str,
    value: &DecodedValue,
    epsilon_ratio: f64,
) -> Result<Option<String>, RuleConfigError> {
    // Status rules compare the display token; a numeric reading on the same
    // sensor (e.g. an unmapped firmware code) simply does not match.
    if let Some(expected) = &rule.status_value {
        if rule.condition != AlarmCondition::Equals {
            return Err(RuleConfigError::StatusComparison {
                condition: rule.condition,
            });
        }
        let met = value.as_str() == Some(expected.as_str());
        return Ok(met.then(|| {
            format!("{sensor_name} {formatted_value} = {expected} (equals threshold)")
        }));
    }

    let Some(number) = value.as_f64() else {
        return Err(RuleConfigError::NonNumericValue {
            condition: rule.condition,
            value: value.to_string(),
        });
    };

    let description = match rule.condition {
        AlarmCondition::Below => {
            let min = require_bound(rule.threshold_min, rule.condition)?;
            (number < min).then(|| {
                format!("{sensor_name} {formatted_value} < {min} (below threshold)")
            })
        }
        AlarmCondition::Above => {
            let max = require_bound(rule.threshold_max, rule.condition)?;
            (number > max).then(|| {
                format!("{sensor_name} {formatted_value} > {max} (above threshold)")
            })
        }
        AlarmCondition::Equals => {
            let target = require_bound(rule.threshold_min, rule.condition)?;
            let epsilon = (target.abs() * epsilon_ratio).max(MIN_EPSILON);
            ((number - target).abs() < epsilon).then(|| {
                format!("{sensor_name} {formatted_value} = {target} (equals threshold)")
            })
        }
        AlarmCondition::OutOfRange => {
            let min = require_bound(rule.threshold_min, rule.condition)?;
            let max = require_bound(rule.threshold_max, rule.condition)?;
            (number < min || number > max).then(|| {
                format!("{sensor_name} {formatted_value} outside range [{min}, {max}]")
            })
        }
    };
    Ok(description)
}

fn require_bound(
    bound: Option<f64>,
    condition: AlarmCondition,
) -> Result<f64, RuleConfigError> {
    bound.ok_or(RuleConfigError::MissingThreshold { condition })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn num(v: f64) -> DecodedValue {
        DecodedValue::Number(v)
    }

    fn reading(value: DecodedValue, at: Timestamp) -> ReadingEvent {
        ReadingEvent {
            device_id: "device-1".to_string(),
            sensor: "4.182".to_string(),
            sensor_name: "pH".to_string(),
            value,
            unit: None,
            observed_at: at,
        }
    }

    fn rule(
        condition: AlarmCondition,
        min: Option<f64>,
        max: Option<f64>,
        cooldown_minutes: i64,
    ) -> AlarmRule {
        AlarmRule {
            id: Uuid::new_v4(),
            name: "pH guard".to_string(),
            device_id: "device-1".to_string(),
            sensor: "4.182".to_string(),
            condition,
            threshold_min: min,
            threshold_max: max,
            status_value: None,
            cooldown_minutes,
            enabled: true,
            channels: Vec::new(),
            last_triggered: None,
        }
    }

    fn names() -> HashMap<DeviceId, String> {
        HashMap::from([("device-1".to_string(), "Backyard pool".to_string())])
    }

    fn engine_with(rules: Vec<AlarmRule>) -> AlarmEngine {
        let mut engine = AlarmEngine::new(EngineConfig::default());
        engine.apply_rules(Arc::new(RuleSet::build(rules, names())));
        engine
    }

    #[test]
    fn below_rule_fires_once_then_again_after_cooldown() {
        let r = rule(AlarmCondition::Below, Some(7.0), None, 60);
        let id = r.id;
        let mut engine = engine_with(vec![r]);
        let t0 = Utc::now();

        let first = engine.evaluate(&reading(num(6.8), t0));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].condition_met, "pH 6.8 < 7 (below threshold)");

        // Matching values inside the cooldown window stay quiet.
        let inside1 = engine.evaluate(&reading(num(6.7), t0 + Duration::seconds(20)));
        assert!(inside1.is_empty());
        let inside2 = engine.evaluate(&reading(num(6.9), t0 + Duration::seconds(40)));
        assert!(inside2.is_empty());

        // Same value after expiry fires a second event.
        let second = engine.evaluate(&reading(num(6.8), t0 + Duration::minutes(61)));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].alarm_id, id);
    }

    #[test]
    fn value_satisfying_nothing_stays_idle() {
        let r = rule(AlarmCondition::Below, Some(7.0), None, 60);
        let id = r.id;
        let mut engine = engine_with(vec![r]);

        assert!(engine.evaluate(&reading(num(7.2), Utc::now())).is_empty());
        let state = engine.state(id).unwrap();
        assert_eq!(state.status, AlarmStatus::Idle);
        assert_eq!(state.last_value, Some(num(7.2)));
        assert!(state.last_triggered.is_none());
    }

    #[test]
    fn above_condition_reports_threshold_in_description() {
        let mut r = rule(AlarmCondition::Above, None, Some(800.0), 60);
        r.sensor = "4.2".to_string();
        let mut engine = engine_with(vec![r]);

        let event = ReadingEvent {
            device_id: "device-1".to_string(),
            sensor: "4.2".to_string(),
            sensor_name: "Redox".to_string(),
            value: num(820.0),
            unit: Some("mV".to_string()),
            observed_at: Utc::now(),
        };
        let events = engine.evaluate(&event);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].condition_met, "Redox 820 mV > 800 (above threshold)");
        assert_eq!(events[0].formatted_value, "820 mV");
    }

    #[test]
    fn out_of_range_fires_on_both_sides() {
        let r = rule(AlarmCondition::OutOfRange, Some(6.8), Some(7.6), 0);
        let mut engine = engine_with(vec![r]);
        let t0 = Utc::now();

        let low = engine.evaluate(&reading(num(6.5), t0));
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].condition_met, "pH 6.5 outside range [6.8, 7.6]");

        // Zero cooldown: eligible again immediately.
        let high = engine.evaluate(&reading(num(7.9), t0 + Duration::seconds(1)));
        assert_eq!(high.len(), 1);

        let inside = engine.evaluate(&reading(num(7.2), t0 + Duration::seconds(2)));
        assert!(inside.is_empty());
    }

    #[test]
    fn equals_matches_within_relative_tolerance() {
        let r = rule(AlarmCondition::Equals, Some(7.0), None, 0);
        let mut engine = engine_with(vec![r]);
        let t0 = Utc::now();

        // 0.1% of 7.0 is 0.007.
        assert_eq!(engine.evaluate(&reading(num(7.005), t0)).len(), 1);
        let missed = engine.evaluate(&reading(num(7.01), t0 + Duration::seconds(1)));
        assert!(missed.is_empty());
    }

    #[test]
    fn equals_on_zero_threshold_matches_exact_zero() {
        let r = rule(AlarmCondition::Equals, Some(0.0), None, 0);
        let mut engine = engine_with(vec![r]);

        assert_eq!(engine.evaluate(&reading(num(0.0), Utc::now())).len(), 1);
    }

    #[test]
    fn status_rule_matches_exact_token() {
        let mut r = rule(AlarmCondition::Equals, None, None, 60);
        r.sensor = "5.80".to_string();
        r.status_value = Some("Off".to_string());
        let id = r.id;
        let mut engine = engine_with(vec![r]);
        let t0 = Utc::now();

        let filtration = |value: DecodedValue, at: Timestamp| ReadingEvent {
            device_id: "device-1".to_string(),
            sensor: "5.80".to_string(),
            sensor_name: "Filtration".to_string(),
            value,
            unit: None,
            observed_at: at,
        };

        let on = engine.evaluate(&filtration(DecodedValue::Status("On".to_string()), t0));
        assert!(on.is_empty());

        // An unmapped numeric code is not a match, and not a config error.
        let raw = engine.evaluate(&filtration(num(7002.0), t0 + Duration::seconds(1)));
        assert!(raw.is_empty());
        assert!(!engine.state(id).unwrap().has_config_error());

        let off = engine.evaluate(&filtration(
            DecodedValue::Status("Off".to_string()),
            t0 + Duration::seconds(2),
        ));
        assert_eq!(off.len(), 1);
        assert_eq!(off[0].condition_met, "Filtration Off = Off (equals threshold)");
    }

    #[test]
    fn numeric_condition_against_status_value_is_latched() {
        let r = rule(AlarmCondition::Below, Some(7.0), None, 60);
        let id = r.id;
        let ruleset = vec![r.clone()];
        let mut engine = engine_with(ruleset);
        let t0 = Utc::now();

        let status = reading(DecodedValue::Status("On".to_string()), t0);
        assert!(engine.evaluate(&status).is_empty());
        assert!(engine.state(id).unwrap().has_config_error());

        // Latched: even a value that would satisfy the condition stays quiet.
        let quiet = engine.evaluate(&reading(num(6.0), t0 + Duration::seconds(5)));
        assert!(quiet.is_empty());

        // A definition change clears the latch.
        let mut changed = r;
        changed.threshold_min = Some(7.5);
        engine.apply_rules(Arc::new(RuleSet::build(vec![changed], names())));
        let after = engine.evaluate(&reading(num(6.0), t0 + Duration::seconds(10)));
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn missing_threshold_is_surfaced_once() {
        // out_of_range with no upper bound can never evaluate.
        let r = rule(AlarmCondition::OutOfRange, Some(6.8), None, 60);
        let id = r.id;
        let mut engine = engine_with(vec![r]);
        let t0 = Utc::now();

        assert!(engine.evaluate(&reading(num(6.5), t0)).is_empty());
        assert!(engine.state(id).unwrap().has_config_error());
        let repeat = engine.evaluate(&reading(num(6.5), t0 + Duration::seconds(1)));
        assert!(repeat.is_empty());
    }

    #[test]
    fn rule_refresh_keeps_state_when_definition_unchanged() {
        let r = rule(AlarmCondition::Below, Some(7.0), None, 60);
        let mut engine = engine_with(vec![r.clone()]);
        let t0 = Utc::now();

        assert_eq!(engine.evaluate(&reading(num(6.8), t0)).len(), 1);

        // Identical definition: the running cooldown survives the refresh.
        engine.apply_rules(Arc::new(RuleSet::build(vec![r.clone()], names())));
        let held = engine.evaluate(&reading(num(6.8), t0 + Duration::minutes(1)));
        assert!(held.is_empty());

        // A changed threshold resets the state machine.
        let mut changed = r;
        changed.threshold_min = Some(7.2);
        engine.apply_rules(Arc::new(RuleSet::build(vec![changed], names())));
        let reset = engine.evaluate(&reading(num(6.8), t0 + Duration::minutes(2)));
        assert_eq!(reset.len(), 1);
    }

    #[test]
    fn removed_rule_drops_state() {
        let r = rule(AlarmCondition::Below, Some(7.0), None, 60);
        let id = r.id;
        let mut engine = engine_with(vec![r]);
        let t0 = Utc::now();

        assert_eq!(engine.evaluate(&reading(num(6.8), t0)).len(), 1);

        engine.apply_rules(Arc::new(RuleSet::default()));
        assert!(engine.state(id).is_none());
        let after = engine.evaluate(&reading(num(6.0), t0 + Duration::minutes(90)));
        assert!(after.is_empty());
    }

    #[test]
    fn persisted_last_triggered_seeds_cooldown() {
        let now = Utc::now();
        let mut running = rule(AlarmCondition::Below, Some(7.0), None, 60);
        running.last_triggered = Some(now - Duration::minutes(10));
        let mut engine = engine_with(vec![running.clone()]);
        assert!(engine.evaluate(&reading(num(6.8), now)).is_empty());

        let mut expired = running;
        expired.id = Uuid::new_v4();
        expired.last_triggered = Some(now - Duration::minutes(120));
        let mut engine = engine_with(vec![expired]);
        assert_eq!(engine.evaluate(&reading(num(6.8), now)).len(), 1);
    }

    #[test]
    fn unwatched_sensor_is_ignored() {
        let mut engine = engine_with(vec![rule(AlarmCondition::Below, Some(7.0), None, 60)]);

        let mut other = reading(num(1.0), Utc::now());
        other.sensor = "4.26".to_string();
        assert!(engine.evaluate(&other).is_empty());
    }

    #[test]
    fn webhook_payload_shape() {
        let mut r = rule(AlarmCondition::Below, Some(7.0), None, 30);
        r.channels = vec![NotifyChannel::Webhook {
            url: "https://hooks.example.net/pool".to_string(),
        }];
        let mut engine = engine_with(vec![r]);

        let events = engine.evaluate(&reading(num(6.5), Utc::now()));
        assert_eq!(events.len(), 1);
        let body = serde_json::to_value(&events[0]).unwrap();

        assert_eq!(body["device_name"], "Backyard pool");
        assert_eq!(body["sensor_type"], "4.182");
        assert_eq!(body["sensor_name"], "pH");
        assert_eq!(body["sensor_value"], 6.5);
        assert_eq!(body["formatted_value"], "6.5");
        assert_eq!(body["threshold_min"], 7.0);
        assert_eq!(body["threshold_max"], serde_json::Value::Null);
        assert_eq!(body["cooldown_minutes"], 30);
        assert!(body["triggered_at"].is_string());
        // Delivery targets are engine-internal.
        assert!(body.get("channels").is_none());
    }
}
