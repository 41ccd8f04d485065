//! Error model for subscription and delivery.

use std::sync::Arc;

use thiserror::Error;

use herald_core::HandlerId;

/// Raised synchronously from `subscribe` when a listener's handlers cannot be
/// extracted. Nothing is registered when this is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    /// Two handlers of the same listener were given the same name.
    #[error("listener {listener} declares handler `{handler}` more than once")]
    DuplicateHandler {
        listener: &'static str,
        handler: String,
    },

    /// The listener's handler shape is not acceptable (e.g. ambiguous binding).
    #[error("invalid listener {listener}: {reason}")]
    InvalidListener {
        listener: &'static str,
        reason: String,
    },
}

impl SubscribeError {
    pub fn invalid<L: ?Sized>(reason: impl Into<String>) -> Self {
        Self::InvalidListener {
            listener: core::any::type_name::<L>(),
            reason: reason.into(),
        }
    }
}

/// Per-notification failure, carried only inside a `NotificationFuture`.
///
/// Never thrown back at the publisher.
#[derive(Debug, Error, Clone)]
pub enum NotificationError {
    /// The listener was dropped after the event was matched but before the
    /// handler ran. Expected under weak retention; nothing needs to be done.
    #[error("listener of {handler} was dropped before notification")]
    ListenerGone { handler: HandlerId },

    /// The handler returned an error. The original error is shared, not wrapped.
    #[error("handler failed: {0}")]
    Handler(Arc<anyhow::Error>),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The worker pool shut down before the notification ran.
    #[error("notification cancelled: event bus shut down")]
    Cancelled,
}

impl NotificationError {
    pub fn is_listener_gone(&self) -> bool {
        matches!(self, Self::ListenerGone { .. })
    }

    /// The error returned by the handler, if that is what failed.
    pub fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Handler(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Errors constructing an event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The worker pool could not be started.
    #[error("failed to start notification pool: {0}")]
    Runtime(#[from] std::io::Error),
}
