//! Device identity and connection lifecycle types.

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, Timestamp};

/// Supported pool-controller families.
///
/// The wire name (serde rename) is the device-type tag used by the
/// broker and by device definitions; it also selects which sensor
/// catalogue applies (see [`crate::points`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    #[serde(rename = "Automatic SALT")]
    AutomaticSalt,
    #[serde(rename = "Automatic Cl-pH")]
    AutomaticClPh,
    #[serde(rename = "PM5 Chlorine")]
    Pm5Chlorine,
}

impl DeviceKind {
    /// The device-type tag as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::AutomaticSalt => "Automatic SALT",
            DeviceKind::AutomaticClPh => "Automatic Cl-pH",
            DeviceKind::Pm5Chlorine => "PM5 Chlorine",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device as supplied by the device directory.
///
/// The access token is the credential obtained during onboarding (an
/// external concern); the connector only forwards it to the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRecord {
    /// External broker-assigned device id, e.g. `"D1234"`.
    pub id: DeviceId,
    /// Controller family; determines the decode table.
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    /// Human-readable display name.
    pub name: String,
    /// Broker access token for this device's feed.
    pub access_token: String,
}

/// Connection lifecycle of a device feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and no imminent attempt, or the failure threshold
    /// was crossed (the connector still keeps retrying).
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The feed is live.
    Connected,
    /// Waiting out the delay before the next attempt.
    Backoff,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// Observable status of a managed device feed.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub state: ConnectionState,
    /// Why the device is disconnected, when known (e.g. the last
    /// connect error after the failure threshold was crossed).
    pub reason: Option<String>,
    /// When the last frame was accepted from this device.
    pub last_seen: Option<Timestamp>,
}

impl DeviceStatus {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reason: None,
            last_seen: None,
        }
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_kind_round_trips_through_wire_name() {
        let json = "\"Automatic SALT\"";
        let kind: DeviceKind = serde_json::from_str(json).unwrap();
        assert_eq!(kind, DeviceKind::AutomaticSalt);
        assert_eq!(serde_json::to_string(&kind).unwrap(), json);
    }

    #[test]
    fn device_record_parses_type_tag() {
        let json = r#"{
            "id": "D1234",
            "type": "PM5 Chlorine",
            "name": "Main pool",
            "access_token": "tok-1"
        }"#;
        let record: DeviceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, DeviceKind::Pm5Chlorine);
        assert_eq!(record.name, "Main pool");
    }

    #[test]
    fn connection_state_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionState::Backoff).unwrap();
        assert_eq!(json, "\"backoff\"");
    }

    #[test]
    fn new_status_is_disconnected() {
        let status = DeviceStatus::new();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.reason.is_none());
        assert!(status.last_seen.is_none());
    }
}
