//! Shared telemetry pipeline.
//!
//! The broker crate feeds decoded readings into the [`hub::EventHub`]; the
//! services here fan them out: the state store keeps the current value per
//! sensor, the alarm service evaluates rules, the dispatcher delivers alarm
//! notifications, and the subscriber registry pushes live updates. External
//! collaborators (device registry, rule store, time-series sink) plug in
//! through the traits in [`ports`].

pub mod dispatch;
pub mod engine;
pub mod hub;
pub mod ports;
pub mod registry;
pub mod store;

pub use dispatch::{Dispatcher, DispatcherConfig, Transport};
pub use engine::{AlarmService, RuleRefresher};
pub use hub::EventHub;
pub use ports::{DeviceDirectory, RuleProvider, RuleSnapshot, TimeSeriesSink};
pub use registry::{DropPolicy, PushMessage, SubscriberRegistry, Subscription};
pub use store::{StateStore, StateWriter, StoredValue};
