//! Typed publish/subscribe event bus.
//!
//! The supervisor announces instance status changes and forwarded child
//! output here; consumers subscribe per topic and never touch process
//! handles. Publish snapshots the subscriber list before iterating, so
//! subscribing or unsubscribing concurrently with a publish is safe, and a
//! panicking handler is isolated from the rest of the fan-out.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

/// Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Subscription channels.
///
/// `Started` and `Failed` are supervisor-wide lifecycle channels; output,
/// stderr, and status channels are per-instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// An instance reached running (`instance:started`)
    Started,
    /// An instance exhausted its restart budget (`instance:failed`)
    Failed,
    /// Status transitions for one instance (`<key>:status`)
    Status(String),
    /// Stdout chunks from one instance (`<key>:output`)
    Output(String),
    /// Stderr chunks from one instance (`<key>:error`)
    Stderr(String),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Started => write!(f, "instance:started"),
            Topic::Failed => write!(f, "instance:failed"),
            Topic::Status(key) => write!(f, "{}:status", key),
            Topic::Output(key) => write!(f, "{}:output", key),
            Topic::Stderr(key) => write!(f, "{}:error", key),
        }
    }
}

/// Event payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEvent {
    /// Instance the event concerns
    pub key: String,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
    /// Event-specific data
    pub data: EventData,
}

/// Event-specific payload data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum EventData {
    /// Process created and wired; instance is running
    Started,
    /// Restart budget exhausted; instance is permanently failed
    Failed,
    /// Status transition
    StatusChanged { from: String, to: String },
    /// Verbatim stdout chunk
    Output(String),
    /// Verbatim stderr chunk
    Stderr(String),
}

impl InstanceEvent {
    /// Create an event for `key` with the given data, timestamped now.
    pub fn new(key: &str, data: EventData) -> Self {
        Self {
            key: key.to_string(),
            timestamp_ms: now_ms(),
            data,
        }
    }
}

type Handler = Arc<dyn Fn(&InstanceEvent) + Send + Sync>;

struct BusInner {
    subscribers: Mutex<HashMap<Topic, Vec<(u64, Handler)>>>,
    next_id: Mutex<u64>,
}

/// Fan-out event bus keyed by [`Topic`].
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: Mutex::new(0),
            }),
        }
    }

    /// Register a handler for a topic.
    ///
    /// Handlers on the same topic run in subscription order. The returned
    /// [`Subscription`] removes the handler via `unsubscribe`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&InstanceEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.inner.next_id.lock().unwrap();
            *next += 1;
            *next
        };

        self.inner
            .subscribers
            .lock()
            .unwrap()
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Deliver an event to every subscriber of `topic`.
    ///
    /// Best-effort and isolated per handler: a panicking handler is logged
    /// and skipped, the remaining handlers still run.
    pub fn publish(&self, topic: &Topic, event: &InstanceEvent) {
        // Snapshot under the lock, call outside it.
        let handlers: Vec<Handler> = {
            let subscribers = self.inner.subscribers.lock().unwrap();
            match subscribers.get(topic) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::warn!("event handler panicked on topic {}", topic);
            }
        }
    }

    /// Number of subscribers currently registered on a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .get(topic)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

/// Handle to one registered subscriber.
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// Remove the handler from the bus.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut subscribers = inner.subscribers.lock().unwrap();
            if let Some(list) = subscribers.get_mut(&self.topic) {
                list.retain(|(id, _)| *id != self.id);
                if list.is_empty() {
                    subscribers.remove(&self.topic);
                }
            }
        }
    }
}
