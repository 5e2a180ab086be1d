/// Broker-assigned device identifiers are opaque strings.
pub type DeviceId = String;

/// Sensor codes follow the controller's dotted numbering (e.g. `"4.182"`).
pub type SensorCode = String;

/// Alarm rules are identified by UUID.
pub type RuleId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
