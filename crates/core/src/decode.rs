//! Raw broker values to typed domain values, and back for setpoints.
//!
//! [`decode`] is the single translation point for inbound frames: it
//! resolves the sensor's decode rule from [`crate::points`] and applies
//! status-token maps, coefficient scaling, or pass-through. It performs
//! no I/O; the feed connector logs and drops the frame on error.
//!
//! [`encode_select`] is the reverse direction for writable selects, and
//! [`format_value`] renders values for push messages and alarm text.

use serde::Serialize;

use crate::device::DeviceKind;
use crate::points::{self, SensorKind};
use crate::types::SensorCode;

/// A sensor reading after wire translation.
///
/// Serializes untagged, so numeric values appear as JSON numbers and
/// enumerated states as plain strings in outbound payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    /// Coefficient-scaled numeric reading.
    Number(f64),
    /// Raw boolean passed through unmapped.
    Bool(bool),
    /// Enumerated state label from the status maps (e.g. `"Auto"`).
    Status(String),
    /// Raw text passed through or kept verbatim (coefficient `-1`).
    Text(String),
}

impl DecodedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DecodedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DecodedValue::Status(s) | DecodedValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodedValue::Number(n) => write!(f, "{n}"),
            DecodedValue::Bool(b) => write!(f, "{b}"),
            DecodedValue::Status(s) | DecodedValue::Text(s) => f.write_str(s),
        }
    }
}

/// Errors from value translation. Both are per-frame and non-fatal;
/// the caller drops the frame and continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// No decode rule exists for this (device kind, sensor code) pair.
    #[error("Unknown sensor {code} for device type {kind}")]
    UnknownSensor { kind: DeviceKind, code: SensorCode },

    /// The raw value has the wrong type or shape for the sensor's rule.
    #[error("Malformed value for sensor {code}: {reason}")]
    Malformed { code: SensorCode, reason: String },
}

fn malformed(code: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::Malformed {
        code: code.to_string(),
        reason: reason.into(),
    }
}

/// Render a raw scalar the way the status maps are keyed.
///
/// Wire tokens like `19.18` arrive either as JSON strings or as bare
/// numbers depending on the broker path; both render to `"19.18"`.
fn value_token(raw: &serde_json::Value) -> Option<String> {
    match raw {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric(raw: &serde_json::Value) -> Option<f64> {
    match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decode a raw broker value for one sensor.
///
/// Translation order matches the controller protocol: status tokens
/// first, then integer state codes, then the coefficient rule.
pub fn decode(
    kind: DeviceKind,
    code: &str,
    raw: &serde_json::Value,
) -> Result<DecodedValue, DecodeError> {
    let spec = points::sensor_spec(kind, code).ok_or_else(|| DecodeError::UnknownSensor {
        kind,
        code: code.to_string(),
    })?;

    if let Some(token) = value_token(raw) {
        if let Some(label) = points::status_label(&token) {
            return Ok(DecodedValue::Status(label.to_string()));
        }
    }
    if let Some(state_code) = raw.as_i64() {
        if let Some(label) = points::status_label_for_code(state_code) {
            return Ok(DecodedValue::Status(label.to_string()));
        }
    }

    match spec.coefficient {
        Some(c) if c != -1.0 => {
            let value = numeric(raw)
                .ok_or_else(|| malformed(code, format!("expected a number, got {raw}")))?;
            Ok(DecodedValue::Number(value / c))
        }
        Some(_) => {
            // Coefficient -1: keep the raw rendering as text.
            let token = value_token(raw)
                .ok_or_else(|| malformed(code, format!("expected a scalar, got {raw}")))?;
            Ok(DecodedValue::Text(token))
        }
        None => match raw {
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(DecodedValue::Number)
                .ok_or_else(|| malformed(code, "numeric value out of range")),
            serde_json::Value::String(s) => Ok(DecodedValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Ok(DecodedValue::Bool(*b)),
            other => Err(malformed(code, format!("expected a scalar, got {other}"))),
        },
    }
}

/// Encode a select display value into its raw wire representation.
///
/// Enumerated options go through the family's option map; numeric
/// setpoints are scaled back up by the coefficient and sent as integer
/// strings (a pH target of `7.2` with coefficient 10 becomes `"72"`).
pub fn encode_select(
    kind: DeviceKind,
    code: &str,
    display: &str,
) -> Result<String, DecodeError> {
    let spec = points::sensor_spec(kind, code).ok_or_else(|| DecodeError::UnknownSensor {
        kind,
        code: code.to_string(),
    })?;

    if spec.kind != SensorKind::Select {
        return Err(malformed(code, "sensor is not writable"));
    }

    if let Some(token) = points::select_token(kind, display) {
        return Ok(token.to_string());
    }

    match spec.coefficient {
        Some(c) if c > 0.0 => {
            let value: f64 = display
                .trim()
                .parse()
                .map_err(|_| malformed(code, format!("option {display:?} is not numeric")))?;
            Ok(((value * c).round() as i64).to_string())
        }
        _ => Err(malformed(code, format!("option {display:?} has no wire encoding"))),
    }
}

/// Human-readable rendering for push messages and alarm descriptions.
///
/// Numeric values carry their unit (`"7.2 pH"` stays bare when the
/// sensor has none); enumerated and text states render as-is.
pub fn format_value(value: &DecodedValue, unit: Option<&str>) -> String {
    match (value, unit) {
        (DecodedValue::Number(n), Some(unit)) => format!("{n} {unit}"),
        (value, _) => value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
