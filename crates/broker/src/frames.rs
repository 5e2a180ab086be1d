//! Broker wire protocol: topics, commands, and inbound frames.
//!
//! The broker speaks JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. Topics address one sensor of one
//! device as `{device_id}/{channel}/{sensor_code}`, where the channel
//! letter selects the direction: `v` for device reports, `g` for value
//! requests, `s` for setpoint writes.

use serde::{Deserialize, Serialize};

use poolsense_core::types::Timestamp;

/// Direction marker inside a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedChannel {
    /// Device to cloud value report.
    Value,
    /// Request the current value of a sensor.
    Get,
    /// Write a setpoint or select value.
    Set,
}

impl FeedChannel {
    /// The single-letter channel token as it appears in topics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedChannel::Value => "v",
            FeedChannel::Get => "g",
            FeedChannel::Set => "s",
        }
    }
}

impl std::fmt::Display for FeedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `{device_id}/{channel}/{sensor_code}` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub device_id: String,
    pub channel: FeedChannel,
    pub sensor: String,
}

impl Topic {
    pub fn new(device_id: &str, channel: FeedChannel, sensor: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            channel,
            sensor: sensor.to_string(),
        }
    }

    /// Parse a topic string.
    ///
    /// Topics have exactly three `/`-separated segments; device ids and
    /// sensor codes never contain slashes.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let parts: Vec<&str> = raw.split('/').collect();
        let [device_id, channel, sensor] = parts.as_slice() else {
            return Err(FrameError::MalformedTopic(raw.to_string()));
        };
        if device_id.is_empty() || sensor.is_empty() {
            return Err(FrameError::MalformedTopic(raw.to_string()));
        }
        let channel = match *channel {
            "v" => FeedChannel::Value,
            "g" => FeedChannel::Get,
            "s" => FeedChannel::Set,
            other => return Err(FrameError::UnknownChannel(other.to_string())),
        };
        Ok(Self::new(device_id, channel, sensor))
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.device_id, self.channel, self.sensor)
    }
}

/// Errors from topic parsing. Per-frame and non-fatal; the session drops
/// the frame and continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed topic: {0:?}")]
    MalformedTopic(String),

    #[error("Unknown topic channel: {0:?}")]
    UnknownChannel(String),
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

/// Commands the connector sends to the broker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Command {
    /// Register interest in a device report topic.
    Subscribe { topic: String },
    /// Ask the broker to replay the current value of a sensor.
    Get { topic: String },
    /// Write a raw (pre-coefficient) value to a setpoint topic.
    Set { topic: String, value: String },
}

impl Command {
    /// Subscribe to a sensor's report topic (`v` channel).
    pub fn subscribe(device_id: &str, sensor: &str) -> Self {
        Command::Subscribe {
            topic: Topic::new(device_id, FeedChannel::Value, sensor).to_string(),
        }
    }

    /// Request the current value of a sensor (`g` channel).
    pub fn get(device_id: &str, sensor: &str) -> Self {
        Command::Get {
            topic: Topic::new(device_id, FeedChannel::Get, sensor).to_string(),
        }
    }

    /// Write a setpoint value (`s` channel).
    pub fn set(device_id: &str, sensor: &str, value: &str) -> Self {
        Command::Set {
            topic: Topic::new(device_id, FeedChannel::Set, sensor).to_string(),
            value: value.to_string(),
        }
    }

    /// Render the command as a WebSocket text payload.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("Command is always serialisable")
    }
}

// ---------------------------------------------------------------------------
// Inbound frames
// ---------------------------------------------------------------------------

/// All known broker frame types.
///
/// Deserialized via the internally-tagged `"type"` field with associated
/// `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedFrame {
    /// A sensor value report.
    #[serde(rename = "value")]
    Value(ValueData),
}

/// Payload of a `value` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ValueData {
    /// Report topic, `{device_id}/v/{sensor_code}`.
    pub topic: String,
    /// Raw wire scalar; strings and numbers both occur.
    pub value: serde_json::Value,
    /// Broker-side observation time. Absent on replayed values; the
    /// session falls back to receive time.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Parse a broker WebSocket text message into a typed frame.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// should log unknown types and continue.
pub fn parse_frame(text: &str) -> Result<FeedFrame, serde_json::Error> {
    serde_json::from_str(text)
}
