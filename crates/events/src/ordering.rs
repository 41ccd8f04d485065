//! Ordered publish operations and the chain that totally orders them.
//!
//! Every ordered publish captures the operation created just before it (its
//! predecessor) and, when it runs:
//!
//! 1. waits until the predecessor has fully finished (forked **and** joined
//!    all of its notifications),
//! 2. forks its own notifications onto the pool,
//! 3. joins them, so its successor cannot start notifying before every
//!    listener of this event is done,
//! 4. signals its own completion.
//!
//! The predecessor reference is released as soon as its completion has been
//! observed, so a finished operation never retains the chain behind it.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, trace};

use crate::notification::{Completion, NotificationTask};

/// Completion marker of one ordered publish, shared with its successor.
pub(crate) struct OrderedLink {
    sequence: u64,
    done: Completion<()>,
}

impl OrderedLink {
    pub(crate) fn new(sequence: u64) -> Arc<Self> {
        Arc::new(Self {
            sequence,
            done: Completion::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_done(&self) -> bool {
        self.done.get().is_some()
    }
}

/// One ordered publish operation.
pub(crate) struct OrderedPublish {
    link: Arc<OrderedLink>,
    previous: Option<Arc<OrderedLink>>,
    tasks: Vec<NotificationTask>,
}

impl OrderedPublish {
    pub(crate) fn new(
        link: Arc<OrderedLink>,
        previous: Option<Arc<OrderedLink>>,
        tasks: Vec<NotificationTask>,
    ) -> Self {
        Self {
            link,
            previous,
            tasks,
        }
    }

    /// Must run inside the notification pool: children are spawned onto the
    /// current runtime.
    pub(crate) async fn run(mut self) {
        if let Some(previous) = self.previous.take() {
            trace!(
                sequence = self.link.sequence,
                waiting_for = previous.sequence,
                "ordered publish waiting for predecessor"
            );
            previous.done.wait().await;
        }

        let children: Vec<_> = self
            .tasks
            .drain(..)
            .map(|task| tokio::spawn(async move { task.execute() }))
            .collect();

        for joined in join_all(children).await {
            if let Err(err) = joined {
                // Task outcomes are already on their futures; a join error
                // only means the pool is shutting down.
                debug!(
                    sequence = self.link.sequence,
                    error = %err,
                    "ordered notification not joined"
                );
            }
        }

        trace!(sequence = self.link.sequence, "ordered publish complete");
    }
}

impl Drop for OrderedPublish {
    fn drop(&mut self) {
        // Runs after `run` finishes and also if the pool drops the operation
        // unfinished, so successors are never left waiting.
        self.previous = None;
        self.link.done.complete(());
    }
}
