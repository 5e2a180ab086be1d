//! Live subscriber registry.
//!
//! Fans decoded readings and alarm events out to per-device subscribers,
//! each owning a bounded queue. Publishing never blocks the feed or the
//! alarm engine: when a queue is full the configured [`DropPolicy`] is
//! applied instead of waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use poolsense_core::types::{DeviceId, SensorCode, Timestamp};
use poolsense_core::{AlarmEvent, DecodedValue, ReadingEvent};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};

/// Default bound for a subscriber's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Backpressure policy applied when a subscriber queue is full.
///
/// Drop-oldest is the default: a slow subscriber keeps its subscription and
/// always converges on the newest values. Disconnect trades that liveness
/// for predictability; the subscriber must resubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    #[default]
    DropOldest,
    Disconnect,
}

// ---------------------------------------------------------------------------
// Push messages
// ---------------------------------------------------------------------------

/// Live update for one sensor, shaped for the outbound wire.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingPush {
    pub device_id: DeviceId,
    pub sensor_type: SensorCode,
    pub sensor_name: String,
    pub value: DecodedValue,
    pub formatted_value: String,
    pub unit: Option<String>,
    pub timestamp: Timestamp,
}

impl From<&ReadingEvent> for ReadingPush {
    fn from(event: &ReadingEvent) -> Self {
        Self {
            device_id: event.device_id.clone(),
            sensor_type: event.sensor.clone(),
            sensor_name: event.sensor_name.clone(),
            value: event.value.clone(),
            formatted_value: event.formatted_value(),
            unit: event.unit.clone(),
            timestamp: event.observed_at,
        }
    }
}

/// Message delivered to live subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    Reading(ReadingPush),
    Alarm(AlarmEvent),
}

// ---------------------------------------------------------------------------
// Subscriber queue
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SubscriberQueue {
    device_id: DeviceId,
    messages: Mutex<VecDeque<PushMessage>>,
    closed: AtomicBool,
    notify: Notify,
}

impl SubscriberQueue {
    fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            messages: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Enqueue one message, applying the overflow policy.
    ///
    /// Returns `false` when the queue is (or just became) closed.
    async fn push(&self, message: PushMessage, capacity: usize, policy: DropPolicy) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut messages = self.messages.lock().await;
        if messages.len() >= capacity {
            match policy {
                DropPolicy::DropOldest => {
                    messages.pop_front();
                    tracing::debug!(device_id = %self.device_id, "slow subscriber, oldest update dropped");
                }
                DropPolicy::Disconnect => {
                    drop(messages);
                    tracing::warn!(device_id = %self.device_id, "slow subscriber disconnected");
                    self.close();
                    return false;
                }
            }
        }
        messages.push_back(message);
        drop(messages);
        self.notify.notify_one();
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Receiving half handed to one connected subscriber.
///
/// Dropping the handle unsubscribes; a disconnected subscriber can only
/// resume by subscribing again.
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Next queued message.
    ///
    /// Messages queued before a close are still drained; `None` marks the
    /// end of the subscription.
    pub async fn recv(&mut self) -> Option<PushMessage> {
        loop {
            {
                let mut messages = self.queue.messages.lock().await;
                if let Some(message) = messages.pop_front() {
                    return Some(message);
                }
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn device_id(&self) -> &str {
        &self.queue.device_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
    }
}

// ---------------------------------------------------------------------------
// SubscriberRegistry
// ---------------------------------------------------------------------------

/// Registry of live subscribers, keyed by device.
///
/// Created once at process start and shared via `Arc`; closed subscriptions
/// are pruned lazily on the next push to their device.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<DeviceId, Vec<Arc<SubscriberQueue>>>>,
    capacity: usize,
    policy: DropPolicy,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity,
            policy,
        }
    }

    /// Attach a new subscriber to a device's update stream.
    pub async fn subscribe(&self, device_id: impl Into<DeviceId>) -> Subscription {
        let device_id = device_id.into();
        let queue = Arc::new(SubscriberQueue::new(device_id.clone()));
        self.subscribers
            .write()
            .await
            .entry(device_id)
            .or_default()
            .push(Arc::clone(&queue));
        tracing::info!(device_id = %queue.device_id, "live subscriber attached");
        Subscription { queue }
    }

    /// Fan a decoded reading out to the device's subscribers.
    pub async fn push_reading(&self, event: &ReadingEvent) {
        self.push_to(&event.device_id, PushMessage::Reading(ReadingPush::from(event)))
            .await;
    }

    /// Fan an alarm out to the device's subscribers.
    pub async fn push_alarm(&self, event: &AlarmEvent) {
        self.push_to(&event.device_id, PushMessage::Alarm(event.clone()))
            .await;
    }

    async fn push_to(&self, device_id: &str, message: PushMessage) {
        let targets: Vec<Arc<SubscriberQueue>> = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(device_id) {
                Some(queues) => queues.clone(),
                None => return,
            }
        };

        let mut closed: Vec<Arc<SubscriberQueue>> = Vec::new();
        for queue in &targets {
            if !queue.push(message.clone(), self.capacity, self.policy).await {
                closed.push(Arc::clone(queue));
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            if let Some(queues) = subscribers.get_mut(device_id) {
                queues.retain(|q| !closed.iter().any(|c| Arc::ptr_eq(c, q)));
                if queues.is_empty() {
                    subscribers.remove(device_id);
                }
            }
            tracing::debug!(device_id, removed = closed.len(), "closed subscriptions pruned");
        }
    }

    /// Number of attached (possibly not yet pruned) subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .await
            .values()
            .map(|queues| queues.iter().filter(|q| !q.is_closed()).count())
            .sum()
    }

    /// Close every subscription. Queued messages remain drainable.
    pub async fn shutdown(&self) {
        let mut subscribers = self.subscribers.write().await;
        for queues in subscribers.values() {
            for queue in queues {
                queue.close();
            }
        }
        subscribers.clear();
        tracing::info!("subscriber registry shut down");
    }

    /// Background task: forward every decoded reading to its device's
    /// subscribers. The loop exits when the hub is dropped.
    pub async fn run_reading_fan_out(
        self: Arc<Self>,
        mut receiver: broadcast::Receiver<ReadingEvent>,
    ) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.push_reading(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "subscriber fan-out lagged, some updates were not pushed");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event hub closed, subscriber fan-out shutting down");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
