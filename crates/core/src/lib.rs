//! `herald-core`: event type model shared by the bus and its users.
//!
//! This crate contains the **pure** building blocks (no threads, no IO):
//! the declared event type hierarchy, the ancestor matcher and identifiers.

pub mod error;
pub mod hierarchy;
pub mod id;
pub mod types;

pub use error::CoreError;
pub use hierarchy::ancestor_types;
pub use id::{HandlerId, SubscriptionId};
pub use types::{AnyEvent, Event, EventType, TypeKey};
