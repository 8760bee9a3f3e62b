//! Typed publish/subscribe register for stream events.
//!
//! Handlers are registered per [`Topic`] and invoked synchronously, in
//! registration order, on the task that emits. A panicking handler is
//! caught and logged; the remaining handlers for the topic still run.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, error};

use park_core::error::ParkError;

use crate::events::VehicleEvent;

/// Topics a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CarIn,
    CarOut,
    RecordAdded,
    Connected,
    Disconnected,
    Error,
    Heartbeat,
    Message,
}

impl Topic {
    /// Every topic, in a stable order.
    pub const ALL: [Topic; 8] = [
        Topic::CarIn,
        Topic::CarOut,
        Topic::RecordAdded,
        Topic::Connected,
        Topic::Disconnected,
        Topic::Error,
        Topic::Heartbeat,
        Topic::Message,
    ];

    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CarIn => "carIn",
            Self::CarOut => "carOut",
            Self::RecordAdded => "recordAdded",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Heartbeat => "heartbeat",
            Self::Message => "message",
        }
    }

    /// Look a topic up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event published on the bus. Each variant belongs to exactly one topic.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A vehicle entered.
    CarIn(Arc<VehicleEvent>),
    /// A vehicle left.
    CarOut(Arc<VehicleEvent>),
    /// A record was added to the history, after `CarIn`/`CarOut`.
    RecordAdded(Arc<VehicleEvent>),
    /// The socket opened (`endpoint` set) or the backend acknowledged the
    /// handshake (`ack` set).
    Connected {
        endpoint: Option<String>,
        ack: Option<serde_json::Value>,
    },
    /// The socket closed.
    Disconnected { reason: String },
    /// A failure surfaced to consumers.
    Error(ParkError),
    /// Keep-alive frame from the backend.
    Heartbeat(serde_json::Value),
    /// Any frame without a dedicated topic.
    Message(serde_json::Value),
}

impl StreamEvent {
    /// The topic this event is published on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::CarIn(_) => Topic::CarIn,
            Self::CarOut(_) => Topic::CarOut,
            Self::RecordAdded(_) => Topic::RecordAdded,
            Self::Connected { .. } => Topic::Connected,
            Self::Disconnected { .. } => Topic::Disconnected,
            Self::Error(_) => Topic::Error,
            Self::Heartbeat(_) => Topic::Heartbeat,
            Self::Message(_) => Topic::Message,
        }
    }

    /// The vehicle record carried by this event, if any.
    pub fn vehicle(&self) -> Option<&Arc<VehicleEvent>> {
        match self {
            Self::CarIn(v) | Self::CarOut(v) | Self::RecordAdded(v) => Some(v),
            _ => None,
        }
    }

    /// The error carried by this event, if any.
    pub fn error(&self) -> Option<&ParkError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Handler callback stored by the bus.
pub type Handler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`]; pass it to [`EventBus::off`] to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// Topic the handler is registered on.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<Topic, Vec<(u64, Handler)>>>,
}

/// Topic-keyed register of ordered handler lists.
///
/// Cloning the bus shares the same register.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` on `topic`. Handlers run in registration order.
    pub fn on<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!("event_bus: handler #{id} registered on {topic}");
        Subscription { topic, id }
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off(&self, subscription: &Subscription) -> bool {
        let mut handlers = self.lock();
        let Some(list) = handlers.get_mut(&subscription.topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&subscription.topic);
        }
        removed
    }

    /// Invoke every handler registered on the event's topic.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn emit(&self, event: StreamEvent) -> usize {
        let topic = event.topic();
        // Snapshot so handlers can subscribe or unsubscribe while running.
        let snapshot: Vec<(u64, Handler)> = match self.lock().get(&topic) {
            Some(list) => list.clone(),
            None => {
                debug!("event_bus: no handlers for {topic}");
                return 0;
            }
        };

        let mut completed = 0;
        for (id, handler) in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => completed += 1,
                Err(payload) => {
                    error!(
                        "event_bus: {topic} handler #{id} panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        debug!("event_bus: emitted {topic} to {completed}/{} handler(s)", snapshot.len());
        completed
    }

    /// Number of handlers registered on `topic`.
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.lock().get(&topic).map_or(0, Vec::len)
    }

    /// Forward events on the given topics into an unbounded channel, for
    /// consumers that prefer to `.await` events.
    pub fn forward_to_channel(
        &self,
        topics: &[Topic],
    ) -> (Vec<Subscription>, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = topics
            .iter()
            .map(|&topic| {
                let tx = tx.clone();
                self.on(topic, move |event| {
                    let _ = tx.send(event.clone());
                })
            })
            .collect();
        (subscriptions, rx)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Topic, Vec<(u64, Handler)>>> {
        // Handlers never run under this lock, so a poisoned map is still consistent.
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
