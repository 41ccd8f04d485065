//! `herald-events`: asynchronous in-process publish/subscribe.
//!
//! Listeners are held weakly, matched by declared event type hierarchy and
//! notified on a worker pool. Publishers get one [`NotificationFuture`] per
//! notified handler and never block. See [`EventBus`] for the ordering rules.

pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod notification;
mod ordering;
mod pool;
pub mod registry;
pub mod source;
pub mod stats;

pub use bus::EventBus;
pub use config::BusConfig;
pub use error::{BusError, NotificationError, SubscribeError};
pub use handler::{HandlerDescriptor, HandlerSet, Listener, ListenerKey, Reply, Subscriber};
pub use notification::{NotificationFuture, Outcome, wait_all};
pub use registry::SubscriptionRegistry;
pub use source::EventSource;
pub use stats::BusStats;

pub use herald_core::{
    AnyEvent, Event, EventType, HandlerId, SubscriptionId, TypeKey, ancestor_types, event_type,
};
