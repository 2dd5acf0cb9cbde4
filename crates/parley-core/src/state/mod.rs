//! Shared state store
//!
//! Keyed store with bounded FIFO eviction. Every mutation is announced on
//! the event bus.
//!
//! Eviction is by insertion order, not recency: reading a key never protects
//! it. When a new key arrives at capacity, the key inserted earliest goes,
//! even if it is read constantly and the newest key never is. Overwriting an
//! existing key keeps its original position in that order.

mod value;

pub use value::{StateKey, StateValue, ValueKindMismatch};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::bus::{EventBus, EventPayload};
use crate::config::ConfigHandle;

const SOURCE: &str = "state_bus";

/// Keyed shared store with change notification
pub struct StateBus {
    entries: Mutex<IndexMap<String, StateValue>>,
    bus: EventBus,
    config: ConfigHandle,
}

impl StateBus {
    /// Create a store that publishes on `bus` and reads capacity from the bus config
    pub fn new(bus: EventBus) -> Self {
        let config = bus.config().clone();
        Self {
            entries: Mutex::new(IndexMap::new()),
            bus,
            config,
        }
    }

    pub fn get(&self, key: &str) -> Option<StateValue> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Insert or overwrite. Inserting a new key at capacity evicts the oldest key first
    pub fn set(&self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.apply(key.into(), Some(value.into()));
    }

    /// Equivalent to setting the key to absent. Returns the removed value
    pub fn remove(&self, key: &str) -> Option<StateValue> {
        self.apply(key.to_string(), None)
    }

    /// Empty the store, announcing it with a single cleared event
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.entries.lock();
            let removed = entries.len();
            entries.clear();
            removed
        };
        debug!("State cleared ({} entries)", removed);
        self.bus.emit(SOURCE, EventPayload::StateCleared { removed });
    }

    pub fn get_typed<T>(&self, key: &StateKey<T>) -> Option<T>
    where
        T: TryFrom<StateValue>,
    {
        self.get(key.name()).and_then(|v| T::try_from(v).ok())
    }

    pub fn set_typed<T>(&self, key: &StateKey<T>, value: T)
    where
        T: Into<StateValue>,
    {
        self.set(key.name(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Keys in insertion order, oldest first
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn apply(&self, key: String, value: Option<StateValue>) -> Option<StateValue> {
        let max_entries = self.config.read(|c| c.state.max_entries);
        let mut evicted = Vec::new();

        let old = {
            let mut entries = self.entries.lock();
            match &value {
                Some(new) if entries.contains_key(&key) => entries.insert(key.clone(), new.clone()),
                Some(new) => {
                    while max_entries > 0 && entries.len() >= max_entries {
                        match entries.shift_remove_index(0) {
                            Some(oldest) => evicted.push(oldest),
                            None => break,
                        }
                    }
                    entries.insert(key.clone(), new.clone())
                }
                None => entries.shift_remove(&key),
            }
        };

        // Lock released: handlers may read the store
        for (evicted_key, evicted_value) in evicted {
            debug!("State key '{}' evicted (capacity {})", evicted_key, max_entries);
            self.bus.emit(
                SOURCE,
                EventPayload::StateChanged {
                    key: evicted_key,
                    old: Some(evicted_value),
                    new: None,
                },
            );
        }

        self.bus.emit(
            SOURCE,
            EventPayload::StateChanged {
                key,
                old: old.clone(),
                new: value,
            },
        );
        old
    }
}

impl std::fmt::Debug for StateBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateBus")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_support::{bus_with, record};
    use crate::bus::EventKind;
    use crate::config::CoreConfig;

    fn store_with_capacity(max_entries: usize) -> StateBus {
        let mut config = CoreConfig::default();
        config.state.max_entries = max_entries;
        StateBus::new(bus_with(config))
    }

    #[test]
    fn test_set_get_contains() {
        let state = store_with_capacity(10);
        assert!(state.get("persona").is_none());
        assert!(!state.contains("persona"));

        state.set("persona", "Boss");
        assert_eq!(state.get("persona"), Some(StateValue::from("Boss")));
        assert!(state.contains("persona"));
    }

    #[test]
    fn test_set_emits_old_and_new() {
        let state = store_with_capacity(10);
        let (_handle, changes) = record(&state.bus, EventKind::StateChanged);

        state.set("count", 1);
        state.set("count", 2);

        let changes = changes.lock();
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes[1].payload,
            EventPayload::StateChanged {
                key: "count".into(),
                old: Some(StateValue::Int(1)),
                new: Some(StateValue::Int(2)),
            }
        );
        assert_eq!(changes[1].source, "state_bus");
    }

    #[test]
    fn test_remove_is_set_to_absent() {
        let state = store_with_capacity(10);
        state.set("model", "small");
        let (_handle, changes) = record(&state.bus, EventKind::StateChanged);

        assert_eq!(state.remove("model"), Some(StateValue::from("small")));
        assert!(!state.contains("model"));

        // Removing an absent key still announces the (absent -> absent) change
        assert_eq!(state.remove("model"), None);

        let changes = changes.lock();
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes[1].payload,
            EventPayload::StateChanged {
                key: "model".into(),
                old: None,
                new: None,
            }
        );
    }

    #[test]
    fn test_fifo_eviction_beyond_capacity() {
        let capacity = 3;
        let state = store_with_capacity(capacity);

        for i in 0..7 {
            state.set(format!("key{}", i), i);
        }

        // Oldest (7 - 3) keys are gone, newest 3 remain
        for i in 0..4 {
            assert!(!state.contains(&format!("key{}", i)));
        }
        assert_eq!(state.keys(), vec!["key4", "key5", "key6"]);
    }

    #[test]
    fn test_eviction_ignores_read_access() {
        let state = store_with_capacity(2);
        state.set("early", 1);
        state.set("middle", 2);

        // Reading the early key repeatedly does not protect it
        for _ in 0..10 {
            assert!(state.get("early").is_some());
        }
        state.set("late", 3);

        assert!(!state.contains("early"));
        assert!(state.contains("middle"));
        assert!(state.contains("late"));
    }

    #[test]
    fn test_overwrite_keeps_insertion_position() {
        let state = store_with_capacity(2);
        state.set("a", 1);
        state.set("b", 2);
        state.set("a", 10);
        state.set("c", 3);

        // "a" was inserted first, so it is evicted despite the later overwrite
        assert_eq!(state.keys(), vec!["b", "c"]);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let state = store_with_capacity(2);
        state.set("a", 1);
        state.set("b", 2);
        state.set("b", 3);
        assert_eq!(state.len(), 2);
        assert!(state.contains("a"));
    }

    #[test]
    fn test_eviction_is_announced() {
        let state = store_with_capacity(1);
        state.set("a", 1);
        let (_handle, changes) = record(&state.bus, EventKind::StateChanged);

        state.set("b", 2);

        let changes = changes.lock();
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes[0].payload,
            EventPayload::StateChanged {
                key: "a".into(),
                old: Some(StateValue::Int(1)),
                new: None,
            }
        );
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let state = store_with_capacity(0);
        for i in 0..50 {
            state.set(format!("k{}", i), i);
        }
        assert_eq!(state.len(), 50);
    }

    #[test]
    fn test_capacity_shrink_on_reload() {
        let state = store_with_capacity(10);
        for i in 0..5 {
            state.set(format!("k{}", i), i);
        }

        let mut config = CoreConfig::default();
        config.state.max_entries = 2;
        state.config.replace(config);
        state.set("new", 99);

        assert_eq!(state.keys(), vec!["k4", "new"]);
    }

    #[test]
    fn test_clear_emits_exactly_one_event() {
        for prior in [0usize, 1, 25] {
            let state = store_with_capacity(100);
            for i in 0..prior {
                state.set(format!("k{}", i), true);
            }
            let (_handle, cleared) = record(&state.bus, EventKind::StateCleared);

            state.clear();

            let cleared = cleared.lock();
            assert_eq!(cleared.len(), 1, "prior size {}", prior);
            assert_eq!(
                cleared[0].payload,
                EventPayload::StateCleared { removed: prior }
            );
            assert!(state.is_empty());
        }
    }

    #[test]
    fn test_typed_keys() {
        const TEMPERATURE: StateKey<f64> = StateKey::new("temperature");
        const PERSONA: StateKey<String> = StateKey::new("persona");

        let state = store_with_capacity(10);
        state.set_typed(&TEMPERATURE, 0.7);
        state.set_typed(&PERSONA, "Boss".to_string());

        assert_eq!(state.get_typed(&TEMPERATURE), Some(0.7));
        assert_eq!(state.get_typed(&PERSONA), Some("Boss".to_string()));

        // Same name, different stored kind
        state.set("temperature", "hot");
        assert_eq!(state.get_typed(&TEMPERATURE), None);
    }

    #[test]
    fn test_handler_can_read_store() {
        let state = std::sync::Arc::new(store_with_capacity(10));
        let seen = std::sync::Arc::new(Mutex::new(None));

        let reader = std::sync::Arc::clone(&state);
        let sink = std::sync::Arc::clone(&seen);
        let _handle = state.bus.subscribe(EventKind::StateChanged, move |_| {
            *sink.lock() = reader.get("persona");
        });

        state.set("persona", "Boss");
        assert_eq!(*seen.lock(), Some(StateValue::from("Boss")));
    }
}
