//! Named scheduler registry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::error::Result;

use super::queue::{Scheduler, SchedulerPolicy};

/// Creates and owns named schedulers.
///
/// One scheduler typically exists per interpreter execution context.
/// Schedulers are created lazily on first request; the first request for a
/// name decides its policy. Dropping the factory stops every scheduler.
#[derive(Default)]
pub struct SchedulerFactory {
    schedulers: Mutex<FxHashMap<String, Arc<Scheduler>>>,
}

impl SchedulerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, Arc<Scheduler>>> {
        self.schedulers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get or create a scheduler with the given policy.
    pub fn create_or_get(&self, name: &str, policy: SchedulerPolicy) -> Result<Arc<Scheduler>> {
        let mut schedulers = self.lock();
        if let Some(scheduler) = schedulers.get(name) {
            if scheduler.policy() != policy {
                tracing::debug!(
                    "Scheduler '{}' already exists as {:?}; ignoring requested {:?}",
                    name,
                    scheduler.policy(),
                    policy
                );
            }
            return Ok(scheduler.clone());
        }

        let scheduler = Arc::new(Scheduler::new(name, policy)?);
        schedulers.insert(name.to_string(), scheduler.clone());
        tracing::info!("Created scheduler '{}' ({:?})", name, policy);
        Ok(scheduler)
    }

    /// Get or create a single-job-at-a-time scheduler.
    pub fn create_or_get_fifo(&self, name: &str) -> Result<Arc<Scheduler>> {
        self.create_or_get(name, SchedulerPolicy::Fifo)
    }

    /// Get or create a scheduler running up to `max_concurrency` jobs at once.
    pub fn create_or_get_parallel(
        &self,
        name: &str,
        max_concurrency: usize,
    ) -> Result<Arc<Scheduler>> {
        self.create_or_get(name, SchedulerPolicy::Parallel(max_concurrency))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Scheduler>> {
        self.lock().get(name).cloned()
    }

    /// Names of all live schedulers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop and drop a scheduler, aborting its remaining jobs.
    ///
    /// Returns `false` if no scheduler has that name.
    pub fn remove(&self, name: &str) -> bool {
        // Stop outside the registry lock: stopping joins worker threads.
        let removed = self.lock().remove(name);
        match removed {
            Some(scheduler) => {
                scheduler.stop();
                tracing::info!("Removed scheduler '{}'", name);
                true
            }
            None => false,
        }
    }

    /// Stop every scheduler.
    pub fn destroy(&self) {
        let schedulers: Vec<_> = self.lock().drain().map(|(_, s)| s).collect();
        for scheduler in schedulers {
            scheduler.stop();
        }
    }
}

impl Drop for SchedulerFactory {
    fn drop(&mut self) {
        self.destroy();
    }
}
