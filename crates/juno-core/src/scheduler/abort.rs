//! Cooperative cancellation for running jobs.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Handle for cooperative cancellation of a running job.
///
/// `AbortHandle` can be cloned and shared across threads; any clone can
/// trigger the abort, which is visible to all other clones. Backends that
/// sleep or wait can use [`AbortHandle::wait_timeout`] to wake up as soon as
/// the job is aborted instead of finishing their work.
///
/// # Example
///
/// ```
/// use juno_core::scheduler::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let handle_clone = handle.clone();
///
/// assert!(!handle.is_aborted());
/// handle_clone.abort();
/// assert!(handle.is_aborted());
/// ```
#[derive(Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortState>,
}

#[derive(Default)]
struct AbortState {
    aborted: Mutex<bool>,
    signal: Condvar,
}

impl AbortHandle {
    /// Create a new abort handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.inner
            .aborted
            .lock()
            .map(|guard| *guard)
            .unwrap_or(true)
    }

    /// Request abort and wake every waiter.
    pub fn abort(&self) {
        if let Ok(mut guard) = self.inner.aborted.lock() {
            *guard = true;
        }
        self.inner.signal.notify_all();
    }

    /// Reset the abort flag.
    ///
    /// Called before a job starts running so an earlier abort does not leak
    /// into the next execution.
    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.aborted.lock() {
            *guard = false;
        }
    }

    /// Block for up to `timeout`, returning early if the handle is aborted.
    ///
    /// Returns `true` if the handle was aborted.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut aborted) = self.inner.aborted.lock() else {
            return true;
        };

        while !*aborted {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.inner.signal.wait_timeout(aborted, deadline - now) {
                Ok((guard, _)) => aborted = guard,
                Err(_) => return true,
            }
        }

        true
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
