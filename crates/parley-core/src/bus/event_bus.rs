//! Event bus
//!
//! Typed publish/subscribe router. Delivery is synchronous: `publish` runs
//! every matching handler before returning. The subscriber list is
//! snapshotted before fan-out, so handlers may publish, subscribe or cancel
//! re-entrantly without deadlocking.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::events::{Event, EventKind, EventPayload};
use crate::config::ConfigHandle;
use crate::error::{CoreError, Result};

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;
type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Identifier of a live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    kinds: Vec<EventKind>,
    predicate: Option<Predicate>,
    handler: Handler,
    /// Cleared on cancel; checked again right before each delivery
    active: Arc<AtomicBool>,
}

impl Subscriber {
    fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }
}

struct BusInner {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    history: Mutex<VecDeque<Event>>,
    next_id: AtomicU64,
    config: ConfigHandle,
}

impl BusInner {
    fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| {
            if s.id == id {
                s.active.store(false, Ordering::SeqCst);
                false
            } else {
                true
            }
        });
        before != subscribers.len()
    }
}

/// Handle to a subscription. Dropping it leaves the subscription live;
/// call [`SubscriptionHandle::cancel`] to stop delivery.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    bus: Weak<BusInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop delivery. No event published after this call reaches the handler
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Typed publish/subscribe router
///
/// Cloning is cheap; clones share subscribers and history.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                history: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.inner.config
    }

    /// Deliver `event` to every live subscriber of its kind
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let (log_events, debug_mode, history_size, max_handlers) = self.inner.config.read(|c| {
            (
                c.bus.log_events,
                c.bus.debug,
                c.bus.history_size,
                c.bus.max_concurrent_handlers,
            )
        });

        if debug_mode {
            self.record(&event, history_size);
        }

        let targets: Vec<Arc<Subscriber>> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.accepts(kind))
            .cloned()
            .collect();

        if log_events {
            debug!(
                kind = %kind,
                source = %event.source,
                subscribers = targets.len(),
                "Publishing event"
            );
        }

        if max_handlers > 0 && targets.len() > max_handlers {
            warn!(
                "Event {} fans out to {} handlers (advisory limit {})",
                kind,
                targets.len(),
                max_handlers
            );
        }

        for subscriber in targets {
            if !subscriber.active.load(Ordering::SeqCst) {
                continue;
            }
            deliver(&subscriber, &event);
        }
    }

    /// Build an event from `source` and `payload` and publish it
    pub fn emit(&self, source: &str, payload: EventPayload) {
        self.publish(Event::new(source, payload));
    }

    /// Receive every subsequent event of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(vec![kind], None, Arc::new(handler))
    }

    /// Receive subsequent events of `kind` for which `predicate` holds
    pub fn subscribe_filtered<P, F>(
        &self,
        kind: EventKind,
        predicate: P,
        handler: F,
    ) -> SubscriptionHandle
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let predicate: Predicate = Arc::new(predicate);
        self.register(vec![kind], Some(predicate), Arc::new(handler))
    }

    /// One subscription covering several kinds
    pub fn subscribe_many<F>(&self, kinds: &[EventKind], handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut unique = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if !unique.contains(kind) {
                unique.push(*kind);
            }
        }
        self.register(unique, None, Arc::new(handler))
    }

    /// Cancel a subscription. Returns false if it was already gone
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        handle.active.store(false, Ordering::SeqCst);
        self.inner.remove(handle.id)
    }

    /// Number of live subscriptions receiving `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.accepts(kind))
            .count()
    }

    /// Synchronously replay buffered events of `kind`, oldest first.
    /// Diagnostic only; requires debug mode.
    pub fn replay_history<F>(&self, kind: EventKind, handler: F) -> Result<usize>
    where
        F: Fn(&Event),
    {
        if !self.inner.config.read(|c| c.bus.debug) {
            return Err(CoreError::HistoryDisabled);
        }

        let events: Vec<Event> = self
            .inner
            .history
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect();

        for event in &events {
            handler(event);
        }
        Ok(events.len())
    }

    /// Snapshot of the debug history, oldest first
    pub fn history(&self) -> Vec<Event> {
        self.inner.history.lock().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    fn register(
        &self,
        kinds: Vec<EventKind>,
        predicate: Option<Predicate>,
        handler: Handler,
    ) -> SubscriptionHandle {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let active = Arc::new(AtomicBool::new(true));

        trace!("Subscription {:?} registered for {:?}", id, kinds);
        self.inner.subscribers.lock().push(Arc::new(Subscriber {
            id,
            kinds,
            predicate,
            handler,
            active: Arc::clone(&active),
        }));

        SubscriptionHandle {
            id,
            active,
            bus: Arc::downgrade(&self.inner),
        }
    }

    fn record(&self, event: &Event, history_size: usize) {
        let mut history = self.inner.history.lock();
        if history_size == 0 {
            history.clear();
            return;
        }
        while history.len() >= history_size {
            history.pop_front();
        }
        history.push_back(event.clone());
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.inner.subscribers.lock().len())
            .field("history", &self.inner.history.lock().len())
            .finish()
    }
}

/// Run one subscriber, isolating panics so the rest of the fan-out proceeds
fn deliver(subscriber: &Subscriber, event: &Event) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        if let Some(predicate) = &subscriber.predicate {
            if !predicate(event) {
                return;
            }
        }
        (subscriber.handler)(event);
    }));

    if let Err(panic) = result {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(
            subscription = ?subscriber.id,
            kind = %event.kind(),
            "Event handler panicked: {}",
            reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_support::{bus_with, record};
    use crate::config::CoreConfig;

    fn token(text: &str) -> EventPayload {
        EventPayload::NormalToken {
            token: text.to_string(),
        }
    }

    #[test]
    fn test_delivers_to_matching_subscribers_only() {
        let bus = EventBus::new(ConfigHandle::default());
        let (_a, tokens_a) = record(&bus, EventKind::NormalToken);
        let (_b, tokens_b) = record(&bus, EventKind::NormalToken);
        let (_c, errors) = record(&bus, EventKind::ParsingError);

        bus.emit("test", token("one"));
        bus.emit("test", token("two"));

        assert_eq!(tokens_a.lock().len(), 2);
        assert_eq!(tokens_b.lock().len(), 2);
        assert!(errors.lock().is_empty());
    }

    #[test]
    fn test_no_replay_of_past_events() {
        let bus = EventBus::new(ConfigHandle::default());
        bus.emit("test", token("early"));

        let (_handle, seen) = record(&bus, EventKind::NormalToken);
        bus.emit("test", token("late"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload, token("late"));
    }

    #[test]
    fn test_cancel_stops_delivery() {
        let bus = EventBus::new(ConfigHandle::default());
        let (handle, seen) = record(&bus, EventKind::NormalToken);

        bus.emit("test", token("before"));
        handle.cancel();
        bus.emit("test", token("after"));

        assert_eq!(seen.lock().len(), 1);
        assert!(!handle.is_active());
        assert_eq!(bus.subscriber_count(EventKind::NormalToken), 0);
        assert!(!bus.unsubscribe(&handle));
    }

    #[test]
    fn test_cancel_from_sibling_handler_mid_publish() {
        let bus = EventBus::new(ConfigHandle::default());
        let victim: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let victim_ref = Arc::clone(&victim);
        let _canceller = bus.subscribe(EventKind::NormalToken, move |_| {
            if let Some(handle) = victim_ref.lock().as_ref() {
                handle.cancel();
            }
        });
        let (handle, seen) = record(&bus, EventKind::NormalToken);
        *victim.lock() = Some(handle);

        bus.emit("test", token("x"));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_filtered_subscription() {
        let bus = EventBus::new(ConfigHandle::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = bus.subscribe_filtered(
            EventKind::NormalToken,
            |event| {
                matches!(
                    &event.payload,
                    EventPayload::NormalToken { token } if token.starts_with('a')
                )
            },
            move |event| sink.lock().push(event.clone()),
        );

        bus.emit("test", token("apple"));
        bus.emit("test", token("banana"));
        bus.emit("test", token("avocado"));

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_subscribe_many() {
        let bus = EventBus::new(ConfigHandle::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = bus.subscribe_many(
            &[
                EventKind::MachineTrimComplete,
                EventKind::FullyInferableResponse,
                EventKind::MachineTrimComplete,
            ],
            move |event| sink.lock().push(event.kind()),
        );

        bus.emit(
            "test",
            EventPayload::MachineTrimComplete {
                content: "x".into(),
            },
        );
        bus.emit("test", EventPayload::FullyInferableResponse);
        bus.emit("test", token("ignored"));

        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::MachineTrimComplete,
                EventKind::FullyInferableResponse
            ]
        );
    }

    #[test]
    fn test_panicking_handler_does_not_block_others() {
        let bus = EventBus::new(ConfigHandle::default());
        let _bad = bus.subscribe(EventKind::NormalToken, |_| panic!("boom"));
        let (_good, seen) = record(&bus, EventKind::NormalToken);

        bus.emit("test", token("still delivered"));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_reentrant_publish() {
        let bus = EventBus::new(ConfigHandle::default());
        let inner_bus = bus.clone();
        let _relay = bus.subscribe(EventKind::NormalToken, move |_| {
            inner_bus.emit("relay", EventPayload::FullyInferableResponse);
        });
        let (_handle, seen) = record(&bus, EventKind::FullyInferableResponse);

        bus.emit("test", token("x"));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].source, "relay");
    }

    #[test]
    fn test_history_requires_debug() {
        let bus = EventBus::new(ConfigHandle::default());
        bus.emit("test", token("x"));

        assert!(bus.history().is_empty());
        let result = bus.replay_history(EventKind::NormalToken, |_| {});
        assert!(matches!(result, Err(CoreError::HistoryDisabled)));
    }

    #[test]
    fn test_history_is_bounded_and_replayable() {
        let mut config = CoreConfig::default();
        config.bus.debug = true;
        config.bus.history_size = 3;
        let bus = bus_with(config);

        for i in 0..5 {
            bus.emit("test", token(&i.to_string()));
        }
        bus.emit("test", EventPayload::FullyInferableResponse);

        let history = bus.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].payload, token("3"));

        let replayed = Mutex::new(Vec::new());
        let count = bus
            .replay_history(EventKind::NormalToken, |event| {
                replayed.lock().push(event.payload.clone())
            })
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(*replayed.lock(), vec![token("3"), token("4")]);
    }

    #[test]
    fn test_history_size_follows_config_reload() {
        let mut config = CoreConfig::default();
        config.bus.debug = true;
        let bus = bus_with(config.clone());

        for i in 0..10 {
            bus.emit("test", token(&i.to_string()));
        }
        assert_eq!(bus.history().len(), 10);

        config.bus.history_size = 2;
        bus.config().replace(config);
        bus.emit("test", token("10"));

        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].payload, token("10"));
    }
}
