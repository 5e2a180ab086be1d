//! Broker feed connector for pool controllers.
//!
//! Provides the wire protocol (topics, commands, value frames), the
//! per-device WebSocket client and session loop, reconnection with
//! exponential backoff, and the [`manager::FeedManager`] that owns one
//! supervised connection task per started device.

pub mod client;
pub mod frames;
pub mod manager;
pub mod reconnect;
pub mod session;
