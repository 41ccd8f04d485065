//! The event source handed to handlers.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::bus::{BusShared, EventBus};

/// Weak handle to the bus an event was published on.
///
/// Passed to handlers registered with `HandlerSet::on_with_source`. Holding it
/// does not keep the bus alive.
#[derive(Clone)]
pub struct EventSource {
    bus: Weak<BusShared>,
}

impl EventSource {
    pub(crate) fn new(bus: &Arc<BusShared>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
        }
    }

    /// A source not attached to any bus.
    pub fn detached() -> Self {
        Self { bus: Weak::new() }
    }

    /// The originating bus, if it is still running.
    pub fn bus(&self) -> Option<EventBus> {
        self.bus.upgrade().map(EventBus::from_shared)
    }

    /// Whether this source is `bus`.
    pub fn is(&self, bus: &EventBus) -> bool {
        std::ptr::eq(self.bus.as_ptr(), Arc::as_ptr(bus.shared()))
    }

    pub fn is_alive(&self) -> bool {
        self.bus.strong_count() > 0
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bus.upgrade() {
            Some(shared) => f
                .debug_struct("EventSource")
                .field("bus", &shared.config().name)
                .finish(),
            None => f.write_str("EventSource(detached)"),
        }
    }
}
