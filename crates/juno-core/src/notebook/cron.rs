//! Cron triggers.
//!
//! Each registered trigger is a tokio task that sleeps until the next fire
//! time of its schedule and then invokes its callback. Unregistering aborts
//! the task.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use rustc_hash::FxHashMap;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Callback invoked on every firing.
pub type TriggerCallback = Arc<dyn Fn() + Send + Sync>;

/// Registry of time-based triggers keyed by id (a note id).
pub trait TriggerRegistry: Send + Sync {
    /// Register `callback` under `id`, replacing any previous trigger.
    fn register(&self, id: &str, expression: &str, callback: TriggerCallback) -> Result<()>;

    /// Remove a trigger. Returns `false` if none was registered.
    fn unregister(&self, id: &str) -> bool;

    fn is_registered(&self, id: &str) -> bool;
}

/// Parse a cron expression.
///
/// Expressions have six or seven whitespace-separated fields
/// (`sec min hour day-of-month month day-of-week [year]`); `?` is accepted as
/// a synonym for `*`.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let invalid = |message: String| Error::InvalidCron {
        expression: expression.to_string(),
        message,
    };

    let fields: Vec<&str> = expression
        .split_whitespace()
        .map(|field| if field == "?" { "*" } else { field })
        .collect();
    if !(6..=7).contains(&fields.len()) {
        return Err(invalid(format!(
            "expected 6 or 7 fields, found {}",
            fields.len()
        )));
    }

    Schedule::from_str(&fields.join(" ")).map_err(|e| invalid(e.to_string()))
}

/// [`TriggerRegistry`] backed by the `cron` crate and a tokio runtime.
pub struct CronTriggers {
    runtime: Option<Runtime>,
    handle: Handle,
    tasks: Mutex<FxHashMap<String, JoinHandle<()>>>,
}

impl CronTriggers {
    /// Run triggers on a dedicated single-worker runtime.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("juno-cron")
            .enable_time()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            tasks: Mutex::new(FxHashMap::default()),
        })
    }

    /// Run triggers on an existing runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            handle,
            tasks: Mutex::new(FxHashMap::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ids with a live trigger, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl TriggerRegistry for CronTriggers {
    fn register(&self, id: &str, expression: &str, callback: TriggerCallback) -> Result<()> {
        let schedule = parse_cron(expression)?;
        let trigger_id = id.to_string();

        let task = self.handle.spawn(async move {
            let mut after = Utc::now();
            loop {
                let Some(next) = schedule.after(&after).next() else {
                    tracing::debug!("Cron trigger '{}' has no further fire times", trigger_id);
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;

                tracing::debug!("Cron trigger '{}' fired", trigger_id);
                callback();
                after = next.max(Utc::now());
            }
        });

        if let Some(previous) = self.lock().insert(id.to_string(), task) {
            previous.abort();
        }
        tracing::info!("Registered cron trigger '{}' ({})", id, expression);
        Ok(())
    }

    fn unregister(&self, id: &str) -> bool {
        match self.lock().remove(id) {
            Some(task) => {
                task.abort();
                tracing::info!("Unregistered cron trigger '{}'", id);
                true
            }
            None => false,
        }
    }

    fn is_registered(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }
}

impl Drop for CronTriggers {
    fn drop(&mut self) {
        for (_, task) in self.lock().drain() {
            task.abort();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
