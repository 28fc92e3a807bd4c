//! Event Bus - typed broadcast system
//!
//! Publishing is synchronous so it can happen from any layer, including code
//! that holds no runtime context. Listeners are invoked after every lock on
//! the bus has been released.

use super::types::{BusEvent, EventRecord};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

// ============================================================================
// EventListener Trait
// ============================================================================

/// Listener ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Event listener
///
/// Implemented by components that react to events in-line with publishing.
/// `on_event` must not block; hand long work to a task.
pub trait EventListener<E: BusEvent>: Send + Sync {
    /// Listener name (debugging)
    fn name(&self) -> &str;

    /// Event names of interest (None = everything)
    fn interests(&self) -> Option<Vec<&'static str>> {
        None
    }

    /// Handle an event
    fn on_event(&self, event: &E);
}

// ============================================================================
// EventBus
// ============================================================================

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Broadcast channel capacity
    pub channel_capacity: usize,

    /// Number of events kept in history
    pub history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_size: 256,
        }
    }
}

fn wants<E: BusEvent>(listener: &dyn EventListener<E>, event: &E) -> bool {
    match listener.interests() {
        Some(names) => names.contains(&event.name()),
        None => true,
    }
}

/// Typed event bus
///
/// ```ignore
/// let bus: EventBus<EngineEvent> = EventBus::new();
///
/// // stream style
/// let mut rx = bus.receiver();
///
/// // listener style
/// let id = bus.subscribe(Arc::new(MyListener));
///
/// bus.publish(EngineEvent::Destroyed);
/// bus.unsubscribe(id);
/// ```
pub struct EventBus<E: BusEvent> {
    config: EventBusConfig,

    sender: broadcast::Sender<E>,

    listeners: RwLock<HashMap<ListenerId, Arc<dyn EventListener<E>>>>,

    listener_counter: AtomicU64,

    history: RwLock<VecDeque<EventRecord<E>>>,

    event_count: AtomicU64,
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            history: RwLock::new(VecDeque::with_capacity(config.history_size)),
            config,
            sender,
            listeners: RwLock::new(HashMap::new()),
            listener_counter: AtomicU64::new(0),
            event_count: AtomicU64::new(0),
        }
    }

    /// Register a listener
    pub fn subscribe(&self, listener: Arc<dyn EventListener<E>>) -> ListenerId {
        let id = ListenerId::new(self.listener_counter.fetch_add(1, Ordering::SeqCst));

        debug!(
            listener_name = listener.name(),
            listener_id = %id,
            "Registering event listener"
        );

        self.listeners.write().insert(id, listener);
        id
    }

    /// Remove a listener
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = self.listeners.write().remove(&id).is_some();
        if removed {
            debug!(listener_id = %id, "Unregistered event listener");
        }
        removed
    }

    /// Publish an event
    pub fn publish(&self, event: E) {
        let seq = self.event_count.fetch_add(1, Ordering::SeqCst) + 1;

        trace!(event = event.name(), seq, "Publishing event");

        if self.config.history_size > 0 {
            let mut history = self.history.write();
            if history.len() >= self.config.history_size {
                history.pop_front();
            }
            history.push_back(EventRecord {
                seq,
                timestamp: Utc::now(),
                event: event.clone(),
            });
        }

        // No receivers is fine
        let _ = self.sender.send(event.clone());

        let targets: Vec<Arc<dyn EventListener<E>>> = {
            let listeners = self.listeners.read();
            listeners
                .values()
                .filter(|l| wants(l.as_ref(), &event))
                .cloned()
                .collect()
        };

        for listener in targets {
            listener.on_event(&event);
        }
    }

    /// New broadcast receiver (stream style)
    pub fn receiver(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Most recent events, newest first
    pub fn history(&self, limit: Option<usize>) -> Vec<EventRecord<E>> {
        let history = self.history.read();
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Total events published
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types::EventSeverity;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Ping(u32),
        Alarm(String),
    }

    impl BusEvent for TestEvent {
        fn name(&self) -> &'static str {
            match self {
                TestEvent::Ping(_) => "ping",
                TestEvent::Alarm(_) => "alarm",
            }
        }

        fn severity(&self) -> EventSeverity {
            match self {
                TestEvent::Ping(_) => EventSeverity::Debug,
                TestEvent::Alarm(_) => EventSeverity::Error,
            }
        }
    }

    struct CountingListener {
        count: AtomicUsize,
        interests: Option<Vec<&'static str>>,
    }

    impl CountingListener {
        fn new(interests: Option<Vec<&'static str>>) -> Self {
            Self {
                count: AtomicUsize::new(0),
                interests,
            }
        }

        fn calls(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    impl EventListener<TestEvent> for CountingListener {
        fn name(&self) -> &str {
            "counting"
        }

        fn interests(&self) -> Option<Vec<&'static str>> {
            self.interests.clone()
        }

        fn on_event(&self, _event: &TestEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listener_interests() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let all = Arc::new(CountingListener::new(None));
        let alarms = Arc::new(CountingListener::new(Some(vec!["alarm"])));

        bus.subscribe(all.clone());
        let id = bus.subscribe(alarms.clone());
        assert_eq!(bus.listener_count(), 2);

        bus.publish(TestEvent::Ping(1));
        bus.publish(TestEvent::Alarm("fire".into()));

        assert_eq!(all.calls(), 2);
        assert_eq!(alarms.calls(), 1);

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus: EventBus<TestEvent> = EventBus::with_config(EventBusConfig {
            history_size: 5,
            ..Default::default()
        });

        for i in 0..10 {
            bus.publish(TestEvent::Ping(i));
        }

        let history = bus.history(None);
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].event, TestEvent::Ping(9));
        assert_eq!(history[0].seq, 10);
        assert_eq!(bus.event_count(), 10);
    }

    #[tokio::test]
    async fn test_broadcast_receiver() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let mut rx = bus.receiver();

        bus.publish(TestEvent::Alarm("smoke".into()));

        let received = rx.recv().await.expect("event");
        assert_eq!(received, TestEvent::Alarm("smoke".into()));
    }
}
