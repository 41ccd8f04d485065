//! Notification tasks and the futures handed back to publishers.
//!
//! One [`NotificationTask`] is created per (matched handler, event) pair at
//! publish time. The publisher immediately receives the task's
//! [`NotificationFuture`]; the task itself runs later on the notification
//! pool and completes the future exactly once.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Notify;
use tracing::{error, warn};

use herald_core::{Event, HandlerId, TypeKey};

use crate::error::NotificationError;
use crate::handler::{HandlerDescriptor, Listener, Reply};
use crate::source::EventSource;
use crate::stats::Counters;

/// Result of one notification.
pub type Outcome = Result<Reply, NotificationError>;

/// Write-once cell that can be awaited or blocked on.
pub(crate) struct Completion<T> {
    value: OnceLock<T>,
    notify: Notify,
    lock: Mutex<()>,
    cond: Condvar,
}

impl<T> Completion<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: OnceLock::new(),
            notify: Notify::new(),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Store the value and wake all waiters. Only the first call has an effect.
    pub(crate) fn complete(&self, value: T) -> bool {
        if self.value.set(value).is_err() {
            return false;
        }
        self.notify.notify_waiters();
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
        true
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.value.get()
    }

    /// Wait without occupying the worker thread.
    pub(crate) async fn wait(&self) -> &T {
        loop {
            // Register interest before checking, so a completion between the
            // check and the await is not missed.
            let notified = self.notify.notified();
            if let Some(value) = self.value.get() {
                return value;
            }
            notified.await;
        }
    }

    pub(crate) fn wait_blocking(&self, timeout: Option<Duration>) -> Option<&T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(value) = self.value.get() {
                return Some(value);
            }
            guard = match deadline {
                None => self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.cond
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

struct Shared {
    handler: Arc<HandlerDescriptor>,
    event: Arc<dyn Event>,
    completion: Completion<Outcome>,
    completed_at: OnceLock<DateTime<Utc>>,
}

impl Shared {
    fn complete(&self, outcome: Outcome) {
        if self.completion.complete(outcome) {
            let _ = self.completed_at.set(Utc::now());
        }
    }
}

/// Handle to the eventual outcome of one handler invocation for one event.
///
/// Cheap to clone. Dropping it does not cancel the notification.
#[derive(Clone)]
pub struct NotificationFuture {
    shared: Arc<Shared>,
}

impl NotificationFuture {
    pub fn is_done(&self) -> bool {
        self.shared.completion.get().is_some()
    }

    /// Outcome, if the notification has completed.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.shared.completion.get()
    }

    /// Wait for completion without blocking the calling task's thread.
    pub async fn wait(&self) -> &Outcome {
        self.shared.completion.wait().await
    }

    /// Block the current thread until the notification completes.
    ///
    /// Do not call from a notification pool worker; use [`wait`](Self::wait).
    pub fn wait_blocking(&self) -> &Outcome {
        loop {
            if let Some(outcome) = self.shared.completion.wait_blocking(None) {
                return outcome;
            }
        }
    }

    /// Block for up to `timeout`. `None` if still pending afterwards.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<&Outcome> {
        self.shared.completion.wait_blocking(Some(timeout))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome(), Some(Ok(_)))
    }

    /// The published event.
    pub fn event(&self) -> &Arc<dyn Event> {
        &self.shared.event
    }

    pub fn event_type(&self) -> TypeKey {
        self.shared.event.type_key()
    }

    /// Identifier of the invoked handler.
    pub fn handler(&self) -> &HandlerId {
        self.shared.handler.id()
    }

    /// Type the invoked handler was declared for.
    pub fn handler_event_type(&self) -> TypeKey {
        self.shared.handler.event_type()
    }

    /// The notified listener, if it is still alive.
    pub fn listener(&self) -> Option<Arc<Listener>> {
        self.shared.handler.listener()
    }

    /// The notified listener downcast to its concrete type.
    pub fn listener_as<L: Any + Send + Sync>(&self) -> Option<Arc<L>> {
        self.listener().and_then(|l| l.downcast::<L>().ok())
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.shared.completed_at.get().copied()
    }
}

impl std::fmt::Debug for NotificationFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFuture")
            .field("handler", self.handler())
            .field("event", &self.shared.event)
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// Wait for every future in `futures`, in order.
pub async fn wait_all(futures: &[NotificationFuture]) -> Vec<&Outcome> {
    join_all(futures.iter().map(NotificationFuture::wait)).await
}

/// One handler invocation against one event. Never reused.
pub(crate) struct NotificationTask {
    shared: Arc<Shared>,
    source: EventSource,
    stats: Arc<Counters>,
}

impl NotificationTask {
    pub(crate) fn new(
        handler: Arc<HandlerDescriptor>,
        event: Arc<dyn Event>,
        source: EventSource,
        stats: Arc<Counters>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                event,
                completion: Completion::new(),
                completed_at: OnceLock::new(),
            }),
            source,
            stats,
        }
    }

    pub(crate) fn future(&self) -> NotificationFuture {
        NotificationFuture {
            shared: self.shared.clone(),
        }
    }

    /// Invoke the handler and complete the future with its outcome.
    pub(crate) fn execute(self) -> NotificationFuture {
        let outcome = self.run();
        self.shared.complete(outcome);
        self.future()
    }

    fn run(&self) -> Outcome {
        let handler = &self.shared.handler;
        let event = self.shared.event.as_ref();

        let Some(listener) = handler.listener() else {
            warn!(
                handler = %handler.id(),
                event_type = %event.type_key(),
                "listener dropped before notification"
            );
            self.stats.record_listener_gone();
            return Err(NotificationError::ListenerGone {
                handler: handler.id().clone(),
            });
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.invoke(listener.as_ref(), event, &self.source)
        }));

        match result {
            Ok(Ok(reply)) => {
                self.stats.record_delivered();
                Ok(reply)
            }
            Ok(Err(err)) => {
                error!(
                    handler = %handler.id(),
                    event = ?event,
                    error = ?err,
                    "event handler failed"
                );
                self.stats.record_failed();
                Err(NotificationError::Handler(Arc::new(err)))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    handler = %handler.id(),
                    event = ?event,
                    panic = %message,
                    "event handler panicked"
                );
                self.stats.record_panicked();
                Err(NotificationError::Panicked(message))
            }
        }
    }
}

impl Drop for NotificationTask {
    fn drop(&mut self) {
        // Dropped without running: the pool shut down first.
        if self.shared.completion.get().is_none() {
            self.stats.record_cancelled();
            self.shared.complete(Err(NotificationError::Cancelled));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
