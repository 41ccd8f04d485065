//! The notification pool: a fixed-size multi-thread tokio runtime.
//!
//! Notification tasks and ordered publish operations are spawned onto it.
//! Waits inside ordered publishes are `.await`s, so a waiting operation yields
//! its worker instead of pinning it.

use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::config::BusConfig;
use crate::error::BusError;

pub(crate) enum Pool {
    /// Runtime built and owned by the bus.
    Owned(OwnedRuntime),
    /// Runtime supplied by the caller.
    Shared(Handle),
}

impl Pool {
    pub(crate) fn owned(config: &BusConfig) -> Result<Self, BusError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.parallelism.max(1))
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()?;
        Ok(Self::Owned(OwnedRuntime(Some(runtime))))
    }

    pub(crate) fn shared(handle: Handle) -> Self {
        Self::Shared(handle)
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle().spawn(future)
    }

    fn handle(&self) -> &Handle {
        match self {
            Self::Owned(owned) => owned.handle(),
            Self::Shared(handle) => handle,
        }
    }
}

pub(crate) struct OwnedRuntime(Option<Runtime>);

impl OwnedRuntime {
    fn handle(&self) -> &Handle {
        match &self.0 {
            Some(runtime) => runtime.handle(),
            None => unreachable!("runtime is only taken on drop"),
        }
    }
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // The last bus handle may be released on one of the pool's own workers
        // (e.g. by a handler holding an upgraded `EventSource`), where a
        // blocking shutdown would panic.
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}
