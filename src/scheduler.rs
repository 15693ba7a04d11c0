//! Deferred one-shot callbacks for scan timeouts.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::{Error, Result};

/// Schedules one-shot callbacks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct ScanScheduler {
    runtime: Handle,
}

impl ScanScheduler {
    /// Create a scheduler that runs callbacks on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Create a scheduler on the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeUnavailable`] when called outside a tokio
    /// runtime.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| Error::RuntimeUnavailable)
    }

    /// Run `callback` once after `delay`.
    ///
    /// Dropping the returned handle does not cancel the callback.
    pub fn schedule_once<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        trace!("Scheduling callback in {:?}", delay);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerHandle { handle }
    }
}

/// Handle to a scheduled callback.
#[derive(Debug)]
pub struct TimerHandle {
    handle: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel the callback if it has not run yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Check if the callback has run or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
