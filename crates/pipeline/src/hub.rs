//! In-process reading fan-out backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventHub`] is the hand-off point between device feed tasks and the
//! pipeline services. It is designed to be shared via `Arc<EventHub>` across
//! the application.

use poolsense_core::ReadingEvent;
use tokio::sync::broadcast;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out hub for decoded readings.
///
/// Wraps a [`broadcast::Sender`] so that the state writer, the alarm service,
/// and the subscriber fan-out each receive every published [`ReadingEvent`]
/// independently.
pub struct EventHub {
    sender: broadcast::Sender<ReadingEvent>,
}

impl EventHub {
    /// Create a hub with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed readings are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a reading to all current consumers.
    ///
    /// If there are no active consumers the reading is silently dropped.
    pub fn publish(&self, event: ReadingEvent) {
        // A SendError only means there are zero receivers right now.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all readings published on this hub.
    pub fn subscribe(&self) -> broadcast::Receiver<ReadingEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
