//! Job state machine.
//!
//! A job moves through
//!
//! ```text
//! READY ──► PENDING ──► RUNNING ──► FINISHED | ERROR
//!              │            │
//!              └────────────┴─────► ABORT
//! ```
//!
//! and returns to `READY` from any terminal state through
//! [`JobCore::clear_result`]. Every transition is serialized per job and
//! reported to the job's [`JobListener`] before and after the status field
//! changes.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::abort::AbortHandle;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created or reset, not submitted.
    #[default]
    Ready,
    /// Queued on a scheduler.
    Pending,
    /// Executing on a scheduler worker.
    Running,
    /// Completed normally.
    Finished,
    /// Completed with a failure payload.
    Error,
    /// Cancelled while pending or running.
    Abort,
}

impl Status {
    /// `PENDING` or `RUNNING`.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Status::Pending | Status::Running)
    }

    /// `FINISHED`, `ERROR` or `ABORT`.
    pub fn is_terminated(self) -> bool {
        matches!(self, Status::Finished | Status::Error | Status::Abort)
    }

    /// Terminal status reached through normal completion (carries a result).
    pub fn is_completed(self) -> bool {
        matches!(self, Status::Finished | Status::Error)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Ready => "READY",
            Status::Pending => "PENDING",
            Status::Running => "RUNNING",
            Status::Finished => "FINISHED",
            Status::Error => "ERROR",
            Status::Abort => "ABORT",
        };
        f.write_str(name)
    }
}

/// Outcome code of a job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Success,
    Incomplete,
    Error,
}

/// Output of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub code: ResultCode,
    pub message: String,
}

impl JobResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            code: ResultCode::Success,
            message: message.into(),
        }
    }

    pub fn incomplete(message: impl Into<String>) -> Self {
        Self {
            code: ResultCode::Incomplete,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: ResultCode::Error,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_error(&self) -> bool {
        self.code == ResultCode::Error
    }
}

/// Observer of job progress and status transitions.
///
/// Listeners run synchronously on whichever thread performs the
/// transition (usually a scheduler worker). They must not block for long
/// and must not trigger transitions on the same job.
pub trait JobListener: Send + Sync {
    /// Called while the job is running whenever progress changes.
    fn on_progress_update(&self, _job: &JobCore, _progress: u8) {}

    /// Called before the status field changes.
    fn before_status_change(&self, _job: &JobCore, _before: Status, _after: Status) {}

    /// Called after the status field changed.
    fn after_status_change(&self, _job: &JobCore, _before: Status, _after: Status) {}
}

/// Point-in-time copy of a job's state, used to clone and persist jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: Status,
    pub result: Option<JobResult>,
    pub date_created: DateTime<Utc>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_finished: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct JobRecord {
    status: Status,
    result: Option<JobResult>,
    progress: u8,
    run: u64,
    date_created: DateTime<Utc>,
    date_started: Option<DateTime<Utc>>,
    date_finished: Option<DateTime<Utc>>,
}

/// State holder shared by every job implementation.
///
/// Status fields live behind a mutex so they are safely readable from any
/// thread; a second lock serializes transitions so that listener callbacks
/// for one transition are never interleaved with another.
pub struct JobCore {
    id: String,
    record: Mutex<JobRecord>,
    changed: Condvar,
    transition: Mutex<()>,
    listener: RwLock<Option<Arc<dyn JobListener>>>,
    abort_handle: AbortHandle,
}

fn recover<T>(result: std::result::Result<T, PoisonError<T>>) -> T {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl JobCore {
    /// Create a `READY` job with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            record: Mutex::new(JobRecord {
                status: Status::Ready,
                result: None,
                progress: 0,
                run: 0,
                date_created: Utc::now(),
                date_started: None,
                date_finished: None,
            }),
            changed: Condvar::new(),
            transition: Mutex::new(()),
            listener: RwLock::new(None),
            abort_handle: AbortHandle::new(),
        }
    }

    /// Generate a fresh job id with the given prefix.
    pub fn generate_id(prefix: &str) -> String {
        format!(
            "{}_{}_{}",
            prefix,
            Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        )
    }

    /// Rebuild a job from a snapshot.
    ///
    /// A snapshot taken while the job was in flight restores as `ABORT`: the
    /// execution that produced it no longer exists. The result is kept only
    /// for `FINISHED` and `ERROR`.
    pub fn restore(id: impl Into<String>, snapshot: JobSnapshot) -> Self {
        let status = if snapshot.status.is_in_flight() {
            Status::Abort
        } else {
            snapshot.status
        };
        let result = if status.is_completed() {
            snapshot.result
        } else {
            None
        };

        let core = Self::new(id);
        {
            let mut record = core.lock_record();
            record.status = status;
            record.result = result;
            record.date_created = snapshot.date_created;
            if status != Status::Ready {
                record.date_started = snapshot.date_started;
                record.date_finished = snapshot.date_finished;
            }
        }
        core
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock_record(&self) -> MutexGuard<'_, JobRecord> {
        recover(self.record.lock())
    }

    pub fn status(&self) -> Status {
        self.lock_record().status
    }

    pub fn result(&self) -> Option<JobResult> {
        self.lock_record().result.clone()
    }

    pub fn progress(&self) -> u8 {
        self.lock_record().progress
    }

    pub fn date_created(&self) -> DateTime<Utc> {
        self.lock_record().date_created
    }

    pub fn date_started(&self) -> Option<DateTime<Utc>> {
        self.lock_record().date_started
    }

    pub fn date_finished(&self) -> Option<DateTime<Utc>> {
        self.lock_record().date_finished
    }

    pub fn is_terminated(&self) -> bool {
        self.status().is_terminated()
    }

    pub fn is_running(&self) -> bool {
        self.status() == Status::Running
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let record = self.lock_record();
        JobSnapshot {
            status: record.status,
            result: record.result.clone(),
            date_created: record.date_created,
            date_started: record.date_started,
            date_finished: record.date_finished,
        }
    }

    /// Abort handle tripped when the job is aborted.
    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort_handle
    }

    pub fn set_listener(&self, listener: Arc<dyn JobListener>) {
        *recover(self.listener.write()) = Some(listener);
    }

    pub fn clear_listener(&self) {
        *recover(self.listener.write()) = None;
    }

    fn listener(&self) -> Option<Arc<dyn JobListener>> {
        recover(self.listener.read()).clone()
    }

    /// Perform one transition. Caller must hold the transition lock.
    fn transition_locked(&self, from: Status, to: Status, apply: impl FnOnce(&mut JobRecord)) {
        let listener = self.listener();

        if let Some(ref listener) = listener {
            listener.before_status_change(self, from, to);
        }

        {
            let mut record = self.lock_record();
            record.status = to;
            apply(&mut record);
        }
        self.changed.notify_all();

        tracing::debug!("job {} {} -> {}", self.id, from, to);

        if let Some(ref listener) = listener {
            listener.after_status_change(self, from, to);
        }
    }

    /// Transition to `to` if the current record satisfies `allowed`.
    fn transition_if(
        &self,
        to: Status,
        allowed: impl Fn(&JobRecord) -> bool,
        apply: impl FnOnce(&mut JobRecord),
    ) -> bool {
        let _guard = recover(self.transition.lock());
        let from = {
            let record = self.lock_record();
            if !allowed(&record) {
                return false;
            }
            record.status
        };
        self.transition_locked(from, to, apply);
        true
    }

    fn reset_record(record: &mut JobRecord) {
        record.result = None;
        record.progress = 0;
        record.date_started = None;
        record.date_finished = None;
    }

    /// `READY → PENDING`.
    ///
    /// A job sitting in a terminal state is first reset to `READY`, so a
    /// finished job can be submitted again. Returns `false` if the job is
    /// already pending or running.
    pub fn mark_pending(&self) -> bool {
        let _guard = recover(self.transition.lock());
        let from = self.status();
        if from.is_in_flight() {
            return false;
        }
        if from.is_terminated() {
            self.transition_locked(from, Status::Ready, Self::reset_record);
        }
        self.transition_locked(Status::Ready, Status::Pending, |_| {});
        true
    }

    /// `PENDING → RUNNING`.
    ///
    /// Returns the run token to hand back to [`JobCore::complete`], or `None`
    /// if the job was aborted before it could start.
    pub fn mark_running(&self) -> Option<u64> {
        let _guard = recover(self.transition.lock());
        if self.status() != Status::Pending {
            return None;
        }
        self.abort_handle.reset();
        let mut run = 0;
        self.transition_locked(Status::Pending, Status::Running, |record| {
            record.run += 1;
            record.progress = 0;
            record.date_started = Some(Utc::now());
            record.date_finished = None;
            run = record.run;
        });
        Some(run)
    }

    /// `RUNNING → FINISHED | ERROR` for the run identified by `run`.
    ///
    /// A result with [`ResultCode::Error`] finishes the job as `ERROR`. If
    /// that run is no longer current (it was aborted, possibly resubmitted)
    /// the result is discarded and `false` is returned.
    pub fn complete(&self, run: u64, result: JobResult) -> bool {
        let to = if result.is_error() {
            Status::Error
        } else {
            Status::Finished
        };
        self.transition_if(
            to,
            |record| record.status == Status::Running && record.run == run,
            move |record| {
                record.result = Some(result);
                record.progress = 100;
                record.date_finished = Some(Utc::now());
            },
        )
    }

    /// `PENDING | RUNNING → ABORT`. No-op on any other status.
    pub fn abort(&self) -> bool {
        let aborted = self.transition_if(Status::Abort, |record| record.status.is_in_flight(), |record| {
            record.result = None;
            record.date_finished = Some(Utc::now());
        });
        if aborted {
            self.abort_handle.abort();
        }
        aborted
    }

    /// Terminal state → `READY`, wiping the result and run timestamps.
    ///
    /// Fails with [`Error::Conflict`] while the job is pending or running.
    pub fn clear_result(&self) -> Result<()> {
        let _guard = recover(self.transition.lock());
        let from = self.status();
        match from {
            Status::Ready => Ok(()),
            Status::Pending | Status::Running => Err(Error::Conflict(format!(
                "job {} is {}; abort it before clearing its result",
                self.id, from
            ))),
            _ => {
                self.transition_locked(from, Status::Ready, Self::reset_record);
                Ok(())
            }
        }
    }

    /// Record progress of a running job and notify the listener.
    pub fn set_progress(&self, progress: u8) {
        let progress = progress.min(100);
        {
            let mut record = self.lock_record();
            if record.status != Status::Running {
                return;
            }
            record.progress = progress;
        }
        if let Some(listener) = self.listener() {
            listener.on_progress_update(self, progress);
        }
    }

    /// Block until the status satisfies `predicate` or `timeout` elapses.
    ///
    /// Returns the matching status, or `None` on timeout.
    pub fn wait_for_status(
        &self,
        predicate: impl Fn(Status) -> bool,
        timeout: Duration,
    ) -> Option<Status> {
        let deadline = Instant::now() + timeout;
        let mut record = self.lock_record();

        loop {
            if predicate(record.status) {
                return Some(record.status);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = recover(self.changed.wait_timeout(record, deadline - now));
            record = guard;
        }
    }

    /// Block until the job is `FINISHED`, `ERROR` or `ABORT`.
    ///
    /// Returns `false` on timeout.
    pub fn wait_until_terminated(&self, timeout: Duration) -> bool {
        self.wait_for_status(Status::is_terminated, timeout).is_some()
    }
}

impl std::fmt::Debug for JobCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.lock_record();
        f.debug_struct("JobCore")
            .field("id", &self.id)
            .field("status", &record.status)
            .field("result", &record.result)
            .finish()
    }
}

/// A unit of work run by a [`Scheduler`](super::Scheduler).
pub trait Job: Send + Sync {
    /// Shared state holder.
    fn core(&self) -> &JobCore;

    /// Execute the job's work. Called on a scheduler worker thread.
    fn run(&self) -> Result<JobResult>;

    /// Best-effort cancellation hook, called after the job moved to `ABORT`.
    fn on_abort(&self) {}

    fn id(&self) -> &str {
        self.core().id()
    }

    fn status(&self) -> Status {
        self.core().status()
    }
}

type Work = dyn Fn(&JobCore) -> Result<JobResult> + Send + Sync;

/// A job backed by a closure.
pub struct FnJob {
    core: JobCore,
    work: Box<Work>,
}

impl FnJob {
    pub fn new(
        id: impl Into<String>,
        work: impl Fn(&JobCore) -> Result<JobResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(id),
            work: Box::new(work),
        })
    }
}

impl Job for FnJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self) -> Result<JobResult> {
        (self.work)(&self.core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl JobListener for RecordingListener {
        fn on_progress_update(&self, _job: &JobCore, progress: u8) {
            self.events.lock().unwrap().push(format!("progress {}", progress));
        }

        fn before_status_change(&self, job: &JobCore, before: Status, after: Status) {
            // Field has not changed yet
            assert_eq!(job.status(), before);
            self.events
                .lock()
                .unwrap()
                .push(format!("before {} {}", before, after));
        }

        fn after_status_change(&self, job: &JobCore, before: Status, after: Status) {
            assert_eq!(job.status(), after);
            self.events
                .lock()
                .unwrap()
                .push(format!("after {} {}", before, after));
        }
    }

    #[test]
    fn test_happy_path() {
        let job = JobCore::new("j1");
        assert_eq!(job.status(), Status::Ready);
        assert!(job.date_started().is_none());

        assert!(job.mark_pending());
        let run = job.mark_running().unwrap();
        assert!(job.date_started().is_some());
        assert!(job.result().is_none());

        assert!(job.complete(run, JobResult::success("done")));
        assert_eq!(job.status(), Status::Finished);
        assert_eq!(job.result().unwrap().message(), "done");
        assert!(job.date_finished().is_some());
    }

    #[test]
    fn test_error_result_finishes_as_error() {
        let job = JobCore::new("j1");
        job.mark_pending();
        let run = job.mark_running().unwrap();
        job.complete(run, JobResult::error("boom"));

        assert_eq!(job.status(), Status::Error);
        assert!(job.result().unwrap().is_error());
    }

    #[test]
    fn test_submit_rejected_while_in_flight() {
        let job = JobCore::new("j1");
        assert!(job.mark_pending());
        assert!(!job.mark_pending());
        job.mark_running();
        assert!(!job.mark_pending());
    }

    #[test]
    fn test_running_requires_pending() {
        let job = JobCore::new("j1");
        assert!(job.mark_running().is_none());
        assert_eq!(job.status(), Status::Ready);
    }

    #[test]
    fn test_abort_is_idempotent() {
        let job = JobCore::new("j1");
        assert!(!job.abort());

        job.mark_pending();
        assert!(job.abort());
        assert!(job.abort_handle().is_aborted());
        assert!(!job.abort());
        assert_eq!(job.status(), Status::Abort);
        assert!(job.result().is_none());
    }

    #[test]
    fn test_abort_does_not_touch_finished() {
        let job = JobCore::new("j1");
        job.mark_pending();
        let run = job.mark_running().unwrap();
        job.complete(run, JobResult::success("ok"));

        assert!(!job.abort());
        assert_eq!(job.status(), Status::Finished);
    }

    #[test]
    fn test_late_result_after_abort_is_discarded() {
        let job = JobCore::new("j1");
        job.mark_pending();
        let run = job.mark_running().unwrap();
        job.abort();

        assert!(!job.complete(run, JobResult::success("late")));
        assert_eq!(job.status(), Status::Abort);
        assert!(job.result().is_none());
    }

    #[test]
    fn test_stale_run_cannot_complete_resubmitted_job() {
        let job = JobCore::new("j1");
        job.mark_pending();
        let stale = job.mark_running().unwrap();
        job.abort();

        job.mark_pending();
        let current = job.mark_running().unwrap();
        assert_ne!(stale, current);

        assert!(!job.complete(stale, JobResult::success("old")));
        assert_eq!(job.status(), Status::Running);
        assert!(job.complete(current, JobResult::success("new")));
        assert_eq!(job.result().unwrap().message(), "new");
    }

    #[test]
    fn test_clear_result() {
        let job = JobCore::new("j1");
        job.mark_pending();
        let run = job.mark_running().unwrap();
        job.complete(run, JobResult::success("ok"));

        job.clear_result().unwrap();
        assert_eq!(job.status(), Status::Ready);
        assert!(job.result().is_none());
        assert!(job.date_started().is_none());
        assert!(job.date_finished().is_none());
    }

    #[test]
    fn test_clear_result_conflicts_while_running() {
        let job = JobCore::new("j1");
        job.mark_pending();
        job.mark_running();

        assert!(matches!(job.clear_result(), Err(Error::Conflict(_))));
        assert_eq!(job.status(), Status::Running);
    }

    #[test]
    fn test_resubmit_from_terminal_resets_first() {
        let listener = Arc::new(RecordingListener::default());
        let job = JobCore::new("j1");
        job.mark_pending();
        let run = job.mark_running().unwrap();
        job.complete(run, JobResult::success("ok"));

        job.set_listener(listener.clone());
        assert!(job.mark_pending());
        assert!(job.result().is_none());

        let events = listener.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "before FINISHED READY",
                "after FINISHED READY",
                "before READY PENDING",
                "after READY PENDING",
            ]
        );
    }

    #[test]
    fn test_listener_sees_every_transition() {
        let listener = Arc::new(RecordingListener::default());
        let job = JobCore::new("j1");
        job.set_listener(listener.clone());

        job.mark_pending();
        let run = job.mark_running().unwrap();
        job.set_progress(50);
        job.complete(run, JobResult::success("ok"));
        // Progress is ignored once the job is no longer running
        job.set_progress(70);

        let events = listener.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "before READY PENDING",
                "after READY PENDING",
                "before PENDING RUNNING",
                "after PENDING RUNNING",
                "progress 50",
                "before RUNNING FINISHED",
                "after RUNNING FINISHED",
            ]
        );
    }

    #[test]
    fn test_restore_in_flight_becomes_abort() {
        let snapshot = JobSnapshot {
            status: Status::Running,
            result: Some(JobResult::success("stale")),
            date_created: Utc::now(),
            date_started: Some(Utc::now()),
            date_finished: None,
        };
        let job = JobCore::restore("j1", snapshot);
        assert_eq!(job.status(), Status::Abort);
        assert!(job.result().is_none());
    }

    #[test]
    fn test_restore_finished_keeps_result() {
        let source = JobCore::new("src");
        source.mark_pending();
        let run = source.mark_running().unwrap();
        source.complete(run, JobResult::success("kept"));

        let job = JobCore::restore("copy", source.snapshot());
        assert_eq!(job.status(), Status::Finished);
        assert_eq!(job.result().unwrap().message(), "kept");
        assert_eq!(job.date_finished(), source.date_finished());
    }

    #[test]
    fn test_wait_until_terminated_times_out() {
        let job = JobCore::new("j1");
        assert!(!job.wait_until_terminated(Duration::from_millis(20)));
    }

    #[test]
    fn test_wait_wakes_on_transition() {
        let job = Arc::new(JobCore::new("j1"));
        job.mark_pending();
        let run = job.mark_running().unwrap();

        let worker = {
            let job = job.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                job.complete(run, JobResult::success("ok"));
            })
        };

        assert!(job.wait_until_terminated(Duration::from_secs(5)));
        worker.join().unwrap();
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&Status::Finished).unwrap();
        assert_eq!(json, "\"FINISHED\"");
        let status: Status = serde_json::from_str("\"ABORT\"").unwrap();
        assert_eq!(status, Status::Abort);
    }

    #[test]
    fn test_abort_racing_complete_notifies_once() {
        for round in 0..200 {
            let job = Arc::new(JobCore::new(format!("race-{}", round)));
            let listener = Arc::new(RecordingListener::default());
            job.set_listener(listener.clone());
            job.mark_pending();
            let run = job.mark_running().unwrap();

            let barrier = Arc::new(std::sync::Barrier::new(2));
            let completer = {
                let job = job.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    job.complete(run, JobResult::success("done"))
                })
            };
            let aborter = {
                let job = job.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    job.abort()
                })
            };
            let completed = completer.join().unwrap();
            let aborted = aborter.join().unwrap();
            assert!(completed ^ aborted, "exactly one transition must win");

            let last = if completed { "FINISHED" } else { "ABORT" };
            let events = listener.events.lock().unwrap().clone();
            assert_eq!(
                events,
                vec![
                    "before READY PENDING".to_string(),
                    "after READY PENDING".to_string(),
                    "before PENDING RUNNING".to_string(),
                    "after PENDING RUNNING".to_string(),
                    format!("before RUNNING {}", last),
                    format!("after RUNNING {}", last),
                ]
            );
            assert_eq!(job.status().to_string(), last);
        }
    }
}
