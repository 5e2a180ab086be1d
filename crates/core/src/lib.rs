//! Domain types and pure logic for the poolsense telemetry pipeline.
//!
//! This crate has no I/O. It provides:
//!
//! - [`points`]: the static sensor catalogue for all supported
//!   controller families, validated at load time.
//! - [`decode`]: translation between raw broker values and typed
//!   [`DecodedValue`]s, plus select encoding and display formatting.
//! - [`alarm`]: the per-rule alarm state machines and condition
//!   evaluation that turn [`ReadingEvent`]s into [`AlarmEvent`]s.
//!
//! The connector, pipeline, and daemon crates build on these types; the
//! caller is responsible for wiring streams and channels around them.

pub mod alarm;
pub mod decode;
pub mod device;
pub mod points;
pub mod reading;
pub mod rules;
pub mod types;

pub use alarm::{AlarmEngine, AlarmEvent, AlarmState, AlarmStatus, EngineConfig};
pub use decode::{decode, encode_select, format_value, DecodeError, DecodedValue};
pub use device::{ConnectionState, DeviceKind, DeviceRecord, DeviceStatus};
pub use reading::ReadingEvent;
pub use rules::{AlarmCondition, AlarmRule, NotifyChannel, RuleSet};
