//! Subscription registry: weakly-held listeners and the per-type handler index.
//!
//! Two views over the same descriptors are kept in lockstep:
//!
//! - `by_listener`: listener identity → that listener's descriptors (used by
//!   unsubscribe and re-subscribe)
//! - `by_event_type`: declared event type → descriptors from all listeners
//!   (used by publish-time matching)
//!
//! A descriptor is in `by_event_type[T]` iff it belongs to a listener in
//! `by_listener` and its declared type is `T`. Both maps are only touched under
//! one mutex, which is never held across a handler invocation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use herald_core::{HandlerId, SubscriptionId, TypeKey};

use crate::handler::{ExtractedHandlers, HandlerDescriptor, Listener, ListenerKey};

struct ListenerEntry {
    subscription: SubscriptionId,
    listener: Weak<Listener>,
    handlers: Vec<Arc<HandlerDescriptor>>,
}

/// Listener count at which `subscribe` first sweeps out dropped listeners.
pub const SWEEP_FLOOR: usize = 64;

struct Index {
    by_listener: HashMap<ListenerKey, ListenerEntry>,
    by_event_type: HashMap<TypeKey, HashMap<HandlerId, Arc<HandlerDescriptor>>>,
    /// Listener count that triggers the next sweep on subscribe.
    sweep_at: usize,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            by_listener: HashMap::new(),
            by_event_type: HashMap::new(),
            sweep_at: SWEEP_FLOOR,
        }
    }
}

impl Index {
    fn insert(&mut self, key: ListenerKey, entry: ListenerEntry) -> Option<ListenerEntry> {
        let previous = self.remove(key);
        for handler in &entry.handlers {
            self.by_event_type
                .entry(handler.event_type())
                .or_default()
                .insert(handler.id().clone(), handler.clone());
        }
        self.by_listener.insert(key, entry);
        previous
    }

    fn remove(&mut self, key: ListenerKey) -> Option<ListenerEntry> {
        let entry = self.by_listener.remove(&key)?;
        for handler in &entry.handlers {
            let event_type = handler.event_type();
            if let Some(set) = self.by_event_type.get_mut(&event_type) {
                set.remove(handler.id());
                if set.is_empty() {
                    self.by_event_type.remove(&event_type);
                }
            }
        }
        Some(entry)
    }

    /// Remove every listener that has been dropped. Returns how many were removed.
    fn sweep(&mut self) -> usize {
        let dead: Vec<ListenerKey> = self
            .by_listener
            .iter()
            .filter(|(_, entry)| entry.listener.strong_count() == 0)
            .map(|(key, _)| *key)
            .collect();

        for key in &dead {
            self.remove(*key);
        }
        dead.len()
    }
}

/// Registry of subscribed listeners and their handlers.
#[derive(Default)]
pub struct SubscriptionRegistry {
    index: Mutex<Index>,
    purged: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        // Nothing panics while the index is half-updated, so a poisoned lock
        // still guards a consistent index.
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `extracted` under its listener, replacing any earlier subscription
    /// of the same listener. Returns the replaced subscription id, if any.
    pub(crate) fn subscribe(&self, extracted: ExtractedHandlers) -> Option<SubscriptionId> {
        let ExtractedHandlers {
            subscription,
            listener_key,
            listener,
            handlers,
        } = extracted;

        let mut index = self.lock();
        let previous = index.insert(
            listener_key,
            ListenerEntry {
                subscription,
                listener,
                handlers,
            },
        );

        // Matching never reaches listeners of unpublished types, so growth
        // triggers a sweep. The next threshold is twice the survivors.
        if index.by_listener.len() >= index.sweep_at {
            let swept = index.sweep();
            self.purged.fetch_add(swept as u64, Ordering::Relaxed);
            index.sweep_at = (index.by_listener.len() * 2).max(SWEEP_FLOOR);
            if swept > 0 {
                debug!(swept, live = index.by_listener.len(), "swept dropped listeners");
            }
        }

        previous.map(|entry| entry.subscription)
    }

    /// Remove a listener and all of its handlers. Returns `false` if the
    /// listener was not subscribed.
    pub fn unsubscribe(&self, key: ListenerKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Whether `key` refers to a subscribed listener that is still alive.
    pub fn contains(&self, key: ListenerKey) -> bool {
        self.lock()
            .by_listener
            .get(&key)
            .is_some_and(|entry| entry.listener.strong_count() > 0)
    }

    /// Handlers of all live listeners declared for any type in `types`.
    ///
    /// Handlers whose listener has been dropped are skipped, and their listener
    /// is purged from both views. The order of the result is unspecified.
    pub fn match_handlers(&self, types: &HashSet<TypeKey>) -> Vec<Arc<HandlerDescriptor>> {
        let mut index = self.lock();
        let mut matched = Vec::new();
        let mut dead = HashSet::new();

        for event_type in types {
            let Some(set) = index.by_event_type.get(event_type) else {
                continue;
            };
            for handler in set.values() {
                if handler.is_alive() {
                    matched.push(handler.clone());
                } else {
                    dead.insert(handler.listener_key());
                }
            }
        }

        for key in dead {
            if index.remove(key).is_some() {
                self.purged.fetch_add(1, Ordering::Relaxed);
                debug!(listener = ?key, "purged dropped listener");
            }
        }

        matched
    }

    /// Drop every listener that is no longer alive. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let purged = self.lock().sweep();
        self.purged.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    /// Total listeners removed because they were dropped, since creation.
    pub fn purged_total(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }

    /// Number of subscribed listeners (including dropped ones not purged yet).
    pub fn listener_count(&self) -> usize {
        self.lock().by_listener.len()
    }

    /// Number of indexed handlers across all listeners.
    pub fn handler_count(&self) -> usize {
        self.lock().by_event_type.values().map(HashMap::len).sum()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let index = self.lock();
        let from_listeners: HashSet<HandlerId> = index
            .by_listener
            .values()
            .flat_map(|entry| entry.handlers.iter().map(|h| h.id().clone()))
            .collect();
        let mut from_types = HashSet::new();
        for (event_type, set) in &index.by_event_type {
            for (id, handler) in set {
                assert_eq!(handler.event_type(), *event_type);
                from_types.insert(id.clone());
            }
        }
        assert_eq!(from_listeners, from_types);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerSet;
    use herald_core::{AnyEvent, ancestor_types};
    use proptest::prelude::*;

    #[derive(Debug)]
    struct Parent;
    #[derive(Debug)]
    struct Child;
    herald_core::event_type!(Parent);
    herald_core::event_type!(Child: Parent);

    struct Probe;

    fn extract(
        listener: &Arc<Probe>,
        build: impl FnOnce(&mut HandlerSet<Probe>),
    ) -> ExtractedHandlers {
        let mut set = HandlerSet::new(listener);
        build(&mut set);
        set.finish().unwrap()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn names(handlers: &[Arc<HandlerDescriptor>]) -> HashSet<String> {
        handlers.iter().map(|h| h.id().name().to_string()).collect()
    }

    #[test]
    fn matching_uses_the_ancestor_set() {
        let registry = SubscriptionRegistry::new();
        let listener = Arc::new(Probe);
        registry.subscribe(extract(&listener, |set| {
            set.on::<AnyEvent, _, _>("any", |_, _| Ok(()))
                .on::<Parent, _, _>("parent", |_, _| Ok(()))
                .on::<Child, _, _>("child", |_, _| Ok(()));
        }));

        let for_child = registry.match_handlers(&ancestor_types(TypeKey::of::<Child>()));
        assert_eq!(names(&for_child), set(&["any", "parent", "child"]));

        let for_parent = registry.match_handlers(&ancestor_types(TypeKey::of::<Parent>()));
        assert_eq!(names(&for_parent), set(&["any", "parent"]));
        registry.assert_consistent();
    }

    #[test]
    fn resubscribe_replaces_instead_of_merging() {
        let registry = SubscriptionRegistry::new();
        let listener = Arc::new(Probe);
        let first = extract(&listener, |set| {
            set.on::<Parent, _, _>("old", |_, _| Ok(()));
        });
        let first_id = first.subscription;
        assert_eq!(registry.subscribe(first), None);

        let replaced = registry.subscribe(extract(&listener, |set| {
            set.on::<Child, _, _>("new", |_, _| Ok(()));
        }));
        assert_eq!(replaced, Some(first_id));
        assert_eq!(registry.listener_count(), 1);
        assert_eq!(registry.handler_count(), 1);

        let matched = registry.match_handlers(&ancestor_types(TypeKey::of::<Child>()));
        assert_eq!(names(&matched), set(&["new"]));
        registry.assert_consistent();
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let listener = Arc::new(Probe);
        registry.subscribe(extract(&listener, |set| {
            set.on::<Parent, _, _>("parent", |_, _| Ok(()));
        }));

        let key = ListenerKey::of(&listener);
        assert!(registry.contains(key));
        assert!(registry.unsubscribe(key));
        assert!(!registry.unsubscribe(key));
        assert!(!registry.contains(key));
        assert_eq!(registry.handler_count(), 0);
        registry.assert_consistent();
    }

    #[test]
    fn dropped_listeners_are_purged_during_matching() {
        let registry = SubscriptionRegistry::new();
        let alive = Arc::new(Probe);
        let dropped = Arc::new(Probe);
        registry.subscribe(extract(&alive, |set| {
            set.on::<Parent, _, _>("alive", |_, _| Ok(()));
        }));
        registry.subscribe(extract(&dropped, |set| {
            set.on::<Parent, _, _>("dropped", |_, _| Ok(()))
                .on::<Child, _, _>("dropped-child", |_, _| Ok(()));
        }));
        drop(dropped);

        let matched = registry.match_handlers(&ancestor_types(TypeKey::of::<Parent>()));
        assert_eq!(names(&matched), set(&["alive"]));
        assert_eq!(registry.listener_count(), 1);
        assert_eq!(registry.handler_count(), 1);
        registry.assert_consistent();
    }

    #[test]
    fn purge_removes_only_dead_listeners() {
        let registry = SubscriptionRegistry::new();
        let alive = Arc::new(Probe);
        let dropped = Arc::new(Probe);
        for listener in [&alive, &dropped] {
            registry.subscribe(extract(listener, |set| {
                set.on::<AnyEvent, _, _>("any", |_, _| Ok(()));
            }));
        }
        drop(dropped);

        assert_eq!(registry.purge(), 1);
        assert_eq!(registry.purge(), 0);
        assert_eq!(registry.listener_count(), 1);
        assert_eq!(registry.purged_total(), 1);
        registry.assert_consistent();
    }

    #[test]
    fn subscribe_sweeps_listeners_of_unpublished_types() {
        let registry = SubscriptionRegistry::new();
        let live = Arc::new(Probe);
        registry.subscribe(extract(&live, |set| {
            set.on::<Parent, _, _>("hot", |_, _| Ok(()));
        }));

        for _ in 0..10_000 {
            let short_lived = Arc::new(Probe);
            registry.subscribe(extract(&short_lived, |set| {
                set.on::<Child, _, _>("rare", |_, _| Ok(()));
            }));
        }

        assert!(registry.listener_count() <= SWEEP_FLOOR);
        assert!(registry.handler_count() <= SWEEP_FLOOR);
        assert!(registry.purged_total() >= (10_001 - SWEEP_FLOOR) as u64);
        assert!(registry.contains(ListenerKey::of(&live)));
        registry.assert_consistent();
    }

    #[test]
    fn sweep_threshold_scales_with_live_listeners() {
        let registry = SubscriptionRegistry::new();
        let live: Vec<_> = (0..SWEEP_FLOOR * 2).map(|_| Arc::new(Probe)).collect();
        for listener in &live {
            registry.subscribe(extract(listener, |set| {
                set.on::<Parent, _, _>("hot", |_, _| Ok(()));
            }));
        }
        assert_eq!(registry.listener_count(), live.len());
        assert_eq!(registry.purged_total(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(usize, u8),
        Unsubscribe(usize),
        Drop(usize),
        Match(bool),
        Purge,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, 0..8u8).prop_map(|(i, mask)| Op::Subscribe(i, mask)),
            (0..4usize).prop_map(Op::Unsubscribe),
            (0..4usize).prop_map(Op::Drop),
            any::<bool>().prop_map(Op::Match),
            Just(Op::Purge),
        ]
    }

    proptest! {
        /// Property: whatever happens to listeners, both views describe the same handlers
        /// and matching never returns a handler whose listener is gone.
        #[test]
        fn index_views_stay_in_lockstep(ops in proptest::collection::vec(op(), 1..40)) {
            let registry = SubscriptionRegistry::new();
            let mut listeners: Vec<Option<Arc<Probe>>> =
                (0..4).map(|_| Some(Arc::new(Probe))).collect();

            for op in ops {
                match op {
                    Op::Subscribe(i, mask) => {
                        if let Some(listener) = &listeners[i] {
                            registry.subscribe(extract(listener, |set| {
                                if mask & 1 != 0 {
                                    set.on::<AnyEvent, _, _>("any", |_, _| Ok(()));
                                }
                                if mask & 2 != 0 {
                                    set.on::<Parent, _, _>("parent", |_, _| Ok(()));
                                }
                                if mask & 4 != 0 {
                                    set.on::<Child, _, _>("child", |_, _| Ok(()));
                                }
                            }));
                        }
                    }
                    Op::Unsubscribe(i) => {
                        if let Some(listener) = &listeners[i] {
                            registry.unsubscribe(ListenerKey::of(listener));
                        }
                    }
                    Op::Drop(i) => listeners[i] = None,
                    Op::Match(child) => {
                        let key = if child {
                            TypeKey::of::<Child>()
                        } else {
                            TypeKey::of::<Parent>()
                        };
                        for handler in registry.match_handlers(&ancestor_types(key)) {
                            prop_assert!(handler.is_alive());
                        }
                    }
                    Op::Purge => {
                        registry.purge();
                    }
                }
                registry.assert_consistent();
            }
        }
    }
}
