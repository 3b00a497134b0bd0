//! Run queue with dedicated worker threads.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};

use super::job::{Job, JobResult, Status};

/// Concurrency policy of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// One job at a time, in submission order.
    Fifo,
    /// Up to `n` jobs at a time; order among eligible jobs is unspecified.
    Parallel(usize),
}

impl SchedulerPolicy {
    fn worker_count(self) -> usize {
        match self {
            SchedulerPolicy::Fifo => 1,
            SchedulerPolicy::Parallel(n) => n.max(1),
        }
    }
}

impl std::fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerPolicy::Fifo => f.write_str("fifo"),
            SchedulerPolicy::Parallel(n) => write!(f, "parallel({})", n),
        }
    }
}

/// Callback trait for scheduler-level progress reporting.
///
/// Invoked on the worker thread that runs the job.
pub trait SchedulerCallback: Send + Sync {
    /// Called when a job starts running.
    fn on_job_started(&self, scheduler: &str, job_id: &str);

    /// Called when a job's run ends, with the status it ended in.
    fn on_job_finished(&self, scheduler: &str, job_id: &str, status: Status);
}

struct RunningJob {
    ticket: u64,
    job: Arc<dyn Job>,
}

#[derive(Default)]
struct Queue {
    /// Jobs accepted by `submit` whose `PENDING` transition is in progress.
    staged: Vec<(u64, Arc<dyn Job>)>,
    waiting: VecDeque<Arc<dyn Job>>,
    running: Vec<RunningJob>,
    next_ticket: u64,
    terminated: bool,
}

struct Shared {
    name: String,
    queue: Mutex<Queue>,
    available: Condvar,
    callback: RwLock<Option<Arc<dyn SchedulerCallback>>>,
}

/// A named run queue that executes jobs on dedicated worker threads.
///
/// `submit` never blocks on execution: the job is moved to `PENDING`,
/// queued, and picked up by a worker waiting on the queue's condition
/// variable. A job's failure (error or panic) becomes an `ERROR` result and
/// never stops the scheduler.
pub struct Scheduler {
    shared: Arc<Shared>,
    policy: SchedulerPolicy,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

fn recover<T>(result: std::result::Result<T, PoisonError<T>>) -> T {
    result.unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("job panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("job panicked: {}", message)
    } else {
        "job panicked".to_string()
    }
}

impl Scheduler {
    /// Create a scheduler and start its workers.
    pub fn new(name: impl Into<String>, policy: SchedulerPolicy) -> Result<Self> {
        let shared = Arc::new(Shared {
            name: name.into(),
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            callback: RwLock::new(None),
        });

        let mut workers = Vec::with_capacity(policy.worker_count());
        for index in 0..policy.worker_count() {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", shared.name, index))
                .spawn(move || shared.worker_loop())?;
            workers.push(handle);
        }

        tracing::debug!(
            "Scheduler '{}' started with {} worker(s)",
            shared.name,
            workers.len()
        );

        Ok(Self {
            shared,
            policy,
            workers: Mutex::new(workers),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    /// Set the scheduler callback.
    pub fn set_callback(&self, callback: impl SchedulerCallback + 'static) {
        *recover(self.shared.callback.write()) = Some(Arc::new(callback));
    }

    /// Queue a job for execution.
    ///
    /// Fails with [`Error::SchedulerUnavailable`] once the scheduler is
    /// stopped and with [`Error::Conflict`] if the job is already pending or
    /// running.
    pub fn submit(&self, job: Arc<dyn Job>) -> Result<()> {
        if self.is_terminated() {
            return Err(self.unavailable());
        }

        // Stage first so a concurrent abort sees the job before it turns PENDING.
        let ticket = {
            let mut queue = self.shared.lock_queue();
            if queue.terminated {
                return Err(self.unavailable());
            }
            let ticket = queue.next_ticket;
            queue.next_ticket += 1;
            queue.staged.push((ticket, job.clone()));
            ticket
        };

        let pending = job.core().mark_pending();

        {
            let mut queue = self.shared.lock_queue();
            let position = queue.staged.iter().position(|(t, _)| *t == ticket);
            if let Some(index) = position {
                queue.staged.swap_remove(index);
            }

            if !pending {
                drop(queue);
                return Err(Error::Conflict(format!(
                    "job {} is already {}",
                    job.id(),
                    job.status()
                )));
            }
            if queue.terminated {
                drop(queue);
                job.core().abort();
                return Err(self.unavailable());
            }
            if position.is_none() {
                drop(queue);
                job.core().abort();
                tracing::debug!(
                    "Scheduler '{}' aborted job {} while submitting",
                    self.name(),
                    job.id()
                );
                return Ok(());
            }
            tracing::debug!("Scheduler '{}' queued job {}", self.name(), job.id());
            queue.waiting.push_back(job);
        }

        self.shared.available.notify_one();
        Ok(())
    }

    /// Abort every pending or running job matching `predicate`.
    ///
    /// Matching jobs leave the queue and move to `ABORT`; running jobs also
    /// receive [`Job::on_abort`]. Finished jobs are never in the queue and
    /// therefore never touched. Returns the number of aborted jobs.
    pub fn abort_matching(&self, predicate: impl Fn(&dyn Job) -> bool) -> usize {
        let (waiting, running) = {
            let mut queue = self.shared.lock_queue();

            let mut waiting = Vec::new();
            queue.staged.retain(|(_, job)| {
                if predicate(job.as_ref()) {
                    waiting.push(job.clone());
                    false
                } else {
                    true
                }
            });
            queue.waiting.retain(|job| {
                if predicate(job.as_ref()) {
                    waiting.push(job.clone());
                    false
                } else {
                    true
                }
            });

            let mut running = Vec::new();
            queue.running.retain(|entry| {
                if predicate(entry.job.as_ref()) {
                    running.push(entry.job.clone());
                    false
                } else {
                    true
                }
            });

            (waiting, running)
        };

        // Transitions run outside the queue lock so listeners may query the scheduler.
        let mut aborted = 0;
        for job in waiting {
            if job.core().abort() {
                aborted += 1;
            }
        }
        for job in running {
            if job.core().abort() {
                job.on_abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            tracing::info!("Scheduler '{}' aborted {} job(s)", self.name(), aborted);
        }
        aborted
    }

    /// Abort every pending or running job.
    pub fn abort_all(&self) -> usize {
        self.abort_matching(|_| true)
    }

    /// Abort a single job by id. Returns `false` if it was not queued.
    pub fn abort_job(&self, job_id: &str) -> bool {
        self.abort_matching(|job| job.id() == job_id) > 0
    }

    /// Snapshot of the jobs waiting to run.
    pub fn waiting_jobs(&self) -> Vec<Arc<dyn Job>> {
        self.shared.lock_queue().waiting.iter().cloned().collect()
    }

    /// Snapshot of the jobs currently running.
    pub fn running_jobs(&self) -> Vec<Arc<dyn Job>> {
        self.shared
            .lock_queue()
            .running
            .iter()
            .map(|entry| entry.job.clone())
            .collect()
    }

    /// Number of queued jobs, waiting and running.
    pub fn job_count(&self) -> usize {
        let queue = self.shared.lock_queue();
        queue.waiting.len() + queue.running.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.lock_queue().terminated
    }

    /// Stop the workers and abort every remaining job. Idempotent.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.lock_queue();
            if queue.terminated {
                return;
            }
            queue.terminated = true;
        }

        self.abort_all();
        self.shared.available.notify_all();

        let workers = std::mem::take(&mut *recover(self.workers.lock()));
        let current = thread::current().id();
        for worker in workers {
            // A listener may stop the scheduler from one of its own workers.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("Scheduler '{}' worker panicked", self.name());
            }
        }

        tracing::debug!("Scheduler '{}' stopped", self.name());
    }

    fn unavailable(&self) -> Error {
        Error::SchedulerUnavailable(format!("scheduler '{}' has been stopped", self.name()))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        recover(self.queue.lock())
    }

    fn callback(&self) -> Option<Arc<dyn SchedulerCallback>> {
        recover(self.callback.read()).clone()
    }

    fn worker_loop(&self) {
        while let Some((ticket, job)) = self.next_job() {
            self.run_job(job.as_ref());

            let mut queue = self.lock_queue();
            queue.running.retain(|entry| entry.ticket != ticket);
        }
    }

    /// Block until a job is available or the scheduler terminates.
    fn next_job(&self) -> Option<(u64, Arc<dyn Job>)> {
        let mut queue = self.lock_queue();
        loop {
            if queue.terminated {
                return None;
            }
            if let Some(job) = queue.waiting.pop_front() {
                let ticket = queue.next_ticket;
                queue.next_ticket += 1;
                queue.running.push(RunningJob {
                    ticket,
                    job: job.clone(),
                });
                return Some((ticket, job));
            }
            queue = recover(self.available.wait(queue));
        }
    }

    fn run_job(&self, job: &dyn Job) {
        let core = job.core();
        let Some(run) = core.mark_running() else {
            tracing::debug!(
                "Scheduler '{}' skipped job {} ({})",
                self.name,
                job.id(),
                core.status()
            );
            return;
        };

        let callback = self.callback();
        if let Some(ref callback) = callback {
            callback.on_job_started(&self.name, job.id());
        }

        let result = match panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!("Job {} on '{}' failed: {}", job.id(), self.name, e);
                JobResult::error(e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Job {} on '{}' {}", job.id(), self.name, message);
                JobResult::error(message)
            }
        };

        if !core.complete(run, result) {
            tracing::debug!(
                "Discarded result of job {} on '{}' ({})",
                job.id(),
                self.name,
                core.status()
            );
        }

        if let Some(ref callback) = callback {
            callback.on_job_finished(&self.name, job.id(), core.status());
        }
    }
}
