//! Asynchronous in-process event bus (dispatch and ordering engine).
//!
//! Listeners register interest in event types; publishers submit events; the
//! bus notifies every live matching listener on a worker pool without blocking
//! the publisher.
//!
//! ## Matching
//!
//! An event matches a handler when the handler's declared type is in the
//! event's ancestor set (the event's own type, every declared supertype and
//! `AnyEvent`).
//!
//! ## Weak listeners
//!
//! The bus only holds listeners weakly. A listener dropped by its owner stops
//! receiving events without being unsubscribed; if it is dropped after an
//! event was matched but before the handler ran, that notification completes
//! with `NotificationError::ListenerGone`. Publishers should ignore that.
//!
//! ## Ordering
//!
//! - [`publish`](EventBus::publish): no ordering with respect to anything.
//! - [`publish_ordered`](EventBus::publish_ordered): ordered publishes form a
//!   total order equal to call order. All listeners of event N have finished
//!   before any listener of event N+1 is notified. Unordered publishes may
//!   interleave freely with them.
//! - Within one event, handlers run concurrently in no particular order.
//!
//! ## Errors
//!
//! Publishing never fails. Per-handler problems (dropped listener, handler
//! error, panic) are logged and reported only through the returned futures;
//! they never affect sibling handlers or the ordered chain. The only
//! synchronous error is a rejected subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, trace};

use herald_core::{Event, SubscriptionId, ancestor_types};

use crate::config::BusConfig;
use crate::error::{BusError, SubscribeError};
use crate::handler::{HandlerSet, ListenerKey, Subscriber};
use crate::notification::{NotificationFuture, NotificationTask};
use crate::ordering::{OrderedLink, OrderedPublish};
use crate::pool::Pool;
use crate::registry::SubscriptionRegistry;
use crate::source::EventSource;
use crate::stats::{BusStats, Counters};

pub(crate) struct BusShared {
    config: BusConfig,
    registry: SubscriptionRegistry,
    /// Most recently created ordered publish.
    last_ordered: Mutex<Option<Arc<OrderedLink>>>,
    ordered_sequence: AtomicU64,
    stats: Arc<Counters>,
    pool: Pool,
}

impl BusShared {
    pub(crate) fn config(&self) -> &BusConfig {
        &self.config
    }
}

/// Asynchronous publish/subscribe event bus.
///
/// Cheap to clone; clones share subscriptions, the ordered chain and the pool.
/// When the bus owns its pool, dropping the last handle shuts the pool down and
/// notifications that have not run yet complete as `Cancelled`.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl EventBus {
    /// Create a bus with its own notification pool of `config.parallelism` workers.
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        let pool = Pool::owned(&config)?;
        Ok(Self::build(config, pool))
    }

    /// Create a bus that runs notifications on an existing tokio runtime.
    pub fn with_handle(handle: Handle, config: BusConfig) -> Self {
        Self::build(config, Pool::shared(handle))
    }

    fn build(config: BusConfig, pool: Pool) -> Self {
        debug!(
            bus = %config.name,
            parallelism = config.parallelism,
            "event bus created"
        );
        Self {
            shared: Arc::new(BusShared {
                config,
                registry: SubscriptionRegistry::new(),
                last_ordered: Mutex::new(None),
                ordered_sequence: AtomicU64::new(0),
                stats: Arc::new(Counters::default()),
                pool,
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<BusShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<BusShared> {
        &self.shared
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    /// Subscribe `listener` using its [`Subscriber`] handlers.
    ///
    /// Subscribing the same listener again replaces its previous handlers.
    pub fn subscribe<L: Subscriber>(
        &self,
        listener: &Arc<L>,
    ) -> Result<SubscriptionId, SubscribeError> {
        self.subscribe_with(listener, |l, set| l.handlers(set))
    }

    /// Subscribe `listener` with an explicit handler extraction step.
    ///
    /// Extraction errors are returned as-is and nothing is registered.
    pub fn subscribe_with<L, F>(
        &self,
        listener: &Arc<L>,
        extract: F,
    ) -> Result<SubscriptionId, SubscribeError>
    where
        L: Send + Sync + 'static,
        F: FnOnce(&L, &mut HandlerSet<L>) -> Result<(), SubscribeError>,
    {
        let mut set = HandlerSet::new(listener);
        extract(listener, &mut set)?;
        let extracted = set.finish()?;

        let subscription = extracted.subscription;
        let handlers = extracted.handlers.len();
        let replaced = self.shared.registry.subscribe(extracted);

        debug!(
            bus = %self.shared.config.name,
            listener = core::any::type_name::<L>(),
            subscription = %subscription,
            handlers,
            replaced = ?replaced,
            "listener subscribed"
        );
        Ok(subscription)
    }

    /// Remove `listener` and all its handlers. Returns `false` if it was not
    /// subscribed; calling it again is harmless.
    pub fn unsubscribe<L: ?Sized>(&self, listener: &Arc<L>) -> bool {
        let removed = self.shared.registry.unsubscribe(ListenerKey::of(listener));
        if removed {
            debug!(
                bus = %self.shared.config.name,
                listener = core::any::type_name::<L>(),
                "listener unsubscribed"
            );
        }
        removed
    }

    pub fn is_subscribed<L: ?Sized>(&self, listener: &Arc<L>) -> bool {
        self.shared.registry.contains(ListenerKey::of(listener))
    }

    /// Number of subscribed listeners (dropped ones count until purged).
    pub fn listener_count(&self) -> usize {
        self.shared.registry.listener_count()
    }

    pub fn handler_count(&self) -> usize {
        self.shared.registry.handler_count()
    }

    /// Eagerly remove listeners that have been dropped. Publishing does this
    /// lazily for the types it touches.
    pub fn purge(&self) -> usize {
        let purged = self.shared.registry.purge();
        if purged > 0 {
            debug!(bus = %self.shared.config.name, purged, "purged dropped listeners");
        }
        purged
    }

    /// Publish `event` with no ordering guarantee.
    ///
    /// Returns one future per matched handler immediately.
    pub fn publish<E: Event>(&self, event: E) -> Vec<NotificationFuture> {
        let event: Arc<dyn Event> = Arc::new(event);
        self.publish_shared(Some(event))
    }

    /// Publish an already shared event. `None` is a no-op.
    pub fn publish_shared(&self, event: Option<Arc<dyn Event>>) -> Vec<NotificationFuture> {
        let Some(event) = event else {
            return Vec::new();
        };

        let tasks = self.collect_tasks(&event);
        if tasks.is_empty() {
            return Vec::new();
        }
        self.shared.stats.record_published();

        trace!(
            bus = %self.shared.config.name,
            event_type = %event.type_key(),
            notifications = tasks.len(),
            "publishing event"
        );

        let futures = tasks.iter().map(NotificationTask::future).collect();
        for task in tasks {
            self.shared.pool.spawn(async move { task.execute() });
        }
        futures
    }

    /// Publish `event` in total order with every other ordered publish.
    ///
    /// Returns immediately; the wait for the preceding ordered event happens on
    /// the pool, never on the caller's thread.
    pub fn publish_ordered<E: Event>(&self, event: E) -> Vec<NotificationFuture> {
        let event: Arc<dyn Event> = Arc::new(event);
        self.publish_ordered_shared(Some(event))
    }

    /// Ordered variant of [`publish_shared`](Self::publish_shared).
    pub fn publish_ordered_shared(
        &self,
        event: Option<Arc<dyn Event>>,
    ) -> Vec<NotificationFuture> {
        let Some(event) = event else {
            return Vec::new();
        };

        let tasks = self.collect_tasks(&event);
        if tasks.is_empty() {
            return Vec::new();
        }
        self.shared.stats.record_published_ordered();
        let futures = tasks.iter().map(NotificationTask::future).collect();

        // Reading the predecessor, linking and storing the new tail happen as
        // one step, so chain order equals call order.
        let mut last = self
            .shared
            .last_ordered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let sequence = self.shared.ordered_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let link = OrderedLink::new(sequence);
        let previous = last.replace(link.clone());

        trace!(
            bus = %self.shared.config.name,
            event_type = %event.type_key(),
            sequence,
            notifications = tasks.len(),
            "publishing ordered event"
        );

        self.shared
            .pool
            .spawn(OrderedPublish::new(link, previous, tasks).run());
        drop(last);

        futures
    }

    /// Weak handle to this bus, as passed to handlers.
    pub fn source(&self) -> EventSource {
        EventSource::new(&self.shared)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            purged_listeners: self.shared.registry.purged_total(),
            ..self.shared.stats.snapshot()
        }
    }

    fn collect_tasks(&self, event: &Arc<dyn Event>) -> Vec<NotificationTask> {
        let types = ancestor_types(event.type_key());
        let handlers = self.shared.registry.match_handlers(&types);
        let source = self.source();

        handlers
            .into_iter()
            .map(|handler| {
                NotificationTask::new(
                    handler,
                    event.clone(),
                    source.clone(),
                    self.shared.stats.clone(),
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.shared.config.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotificationError;
    use herald_core::AnyEvent;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug)]
    struct Ping;
    herald_core::event_type!(Ping);

    #[derive(Default)]
    struct Hits(AtomicUsize);

    impl Subscriber for Hits {
        fn handlers(&self, set: &mut HandlerSet<Self>) -> Result<(), SubscribeError> {
            set.on::<Ping, _, _>("ping", |hits, _| {
                hits.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        }
    }

    fn bus() -> EventBus {
        EventBus::new(BusConfig::default().with_name("test").with_parallelism(2)).unwrap()
    }

    #[test]
    fn publish_without_listeners_returns_nothing() {
        let bus = bus();
        assert!(bus.publish(Ping).is_empty());
        assert!(bus.publish_ordered(Ping).is_empty());
        assert!(bus.publish_shared(None).is_empty());
        assert!(bus.publish_ordered_shared(None).is_empty());
    }

    #[test]
    fn publish_notifies_subscribed_listener() {
        let bus = bus();
        let hits = Arc::new(Hits::default());
        bus.subscribe(&hits).unwrap();

        let futures = bus.publish(Ping);
        assert_eq!(futures.len(), 1);
        assert!(futures[0].wait_blocking().is_ok());
        assert_eq!(hits.0.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().delivered, 1);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let bus = bus();
        let hits = Arc::new(Hits::default());
        bus.subscribe(&hits).unwrap();
        assert!(bus.is_subscribed(&hits));

        assert!(bus.unsubscribe(&hits));
        assert!(!bus.unsubscribe(&hits));
        assert!(bus.publish(Ping).is_empty());
        assert_eq!(hits.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejected_subscription_registers_nothing() {
        let bus = bus();
        let hits = Arc::new(Hits::default());
        let err = bus
            .subscribe_with(&hits, |_, set| {
                set.on::<AnyEvent, _, _>("any", |_, _| Ok(()));
                Err(SubscribeError::invalid::<Hits>("ambiguous source parameter"))
            })
            .unwrap_err();

        assert!(matches!(err, SubscribeError::InvalidListener { .. }));
        assert!(!bus.is_subscribed(&hits));
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn dropping_the_bus_cancels_pending_ordered_notifications() {
        let bus = EventBus::new(BusConfig::default().with_parallelism(1)).unwrap();
        let gate = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
        let hits = Arc::new(Hits::default());

        let blocker = gate.clone();
        bus.subscribe_with(&hits, move |_, set| {
            set.on::<Ping, _, _>("slow", move |_, _| {
                let (lock, cond) = &*blocker;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cond.wait(open).unwrap();
                }
                Ok(())
            });
            Ok(())
        })
        .unwrap();

        let first = bus.publish_ordered(Ping);
        let second = bus.publish_ordered(Ping);
        drop(bus);

        {
            let (lock, cond) = &*gate;
            *lock.lock().unwrap() = true;
            cond.notify_all();
        }

        assert!(first[0].wait_timeout(Duration::from_secs(5)).is_some());
        match second[0].wait_timeout(Duration::from_secs(5)) {
            Some(Err(NotificationError::Cancelled)) | Some(Ok(_)) => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
