//! Normalized telemetry events emitted by the feed connector.

use serde::Serialize;

use crate::decode::{self, format_value, DecodeError, DecodedValue};
use crate::device::DeviceKind;
use crate::points;
use crate::types::{DeviceId, SensorCode, Timestamp};

/// One decoded sensor reading.
///
/// Produced only by the feed connector; immutable once emitted. The
/// state store, alarm engine, and subscriber registry each consume
/// their own clone off the event hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingEvent {
    pub device_id: DeviceId,
    /// Sensor code, e.g. `"4.182"`.
    pub sensor: SensorCode,
    /// Display name from the sensor catalogue, e.g. `"pH"`.
    pub sensor_name: String,
    pub value: DecodedValue,
    pub unit: Option<String>,
    /// Broker-reported observation time, or receive time when the
    /// frame carried none.
    pub observed_at: Timestamp,
}

impl ReadingEvent {
    /// Decode a raw wire value into a reading.
    ///
    /// Resolves the sensor's catalogue entry for its display name and
    /// unit, then translates the raw scalar via [`decode::decode`].
    pub fn from_wire(
        kind: DeviceKind,
        device_id: &str,
        sensor: &str,
        raw: &serde_json::Value,
        observed_at: Timestamp,
    ) -> Result<Self, DecodeError> {
        let value = decode::decode(kind, sensor, raw)?;
        let spec = points::sensor_spec(kind, sensor).ok_or_else(|| DecodeError::UnknownSensor {
            kind,
            code: sensor.to_string(),
        })?;
        Ok(Self {
            device_id: device_id.to_string(),
            sensor: sensor.to_string(),
            sensor_name: spec.name.to_string(),
            value,
            unit: spec.unit.map(str::to_string),
            observed_at,
        })
    }

    /// Render the value with its unit for display surfaces.
    pub fn formatted_value(&self) -> String {
        format_value(&self.value, self.unit.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn formatted_value_includes_unit() {
        let event = ReadingEvent {
            device_id: "D1".into(),
            sensor: "4.98".into(),
            sensor_name: "Temperature".into(),
            value: DecodedValue::Number(21.4),
            unit: Some("°C".into()),
            observed_at: Utc::now(),
        };
        assert_eq!(event.formatted_value(), "21.4 °C");
    }

    #[test]
    fn formatted_value_for_status_is_bare() {
        let event = ReadingEvent {
            device_id: "D1".into(),
            sensor: "5.6012".into(),
            sensor_name: "pH Pump".into(),
            value: DecodedValue::Status("Off".into()),
            unit: None,
            observed_at: Utc::now(),
        };
        assert_eq!(event.formatted_value(), "Off");
    }

    #[test]
    fn from_wire_fills_catalogue_fields() {
        let event = ReadingEvent::from_wire(
            DeviceKind::AutomaticSalt,
            "D1",
            "4.98",
            &serde_json::json!("214"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(event.sensor_name, "Temperature");
        assert_eq!(event.unit.as_deref(), Some("°C"));
        assert_eq!(event.value, DecodedValue::Number(21.4));
    }

    #[test]
    fn from_wire_rejects_unknown_sensors() {
        let err = ReadingEvent::from_wire(
            DeviceKind::AutomaticSalt,
            "D1",
            "9.999",
            &serde_json::json!("1"),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::UnknownSensor { .. }));
    }
}
