//! Echo backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scheduler::{JobResult, SchedulerPolicy};

use super::{Interpreter, InterpreterContext};

/// Returns `"<prefix>: <script>"`.
///
/// An optional delay simulates a long-running execution; the delay ends
/// early when the job is aborted.
pub struct EchoInterpreter {
    name: String,
    prefix: String,
    delay: Duration,
    policy: SchedulerPolicy,
    open: AtomicBool,
}

impl EchoInterpreter {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            delay: Duration::ZERO,
            policy: SchedulerPolicy::Fifo,
            open: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_policy(mut self, policy: SchedulerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Interpreter for EchoInterpreter {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn interpret(&self, script: &str, ctx: &InterpreterContext<'_>) -> Result<JobResult> {
        if !self.is_open() {
            return Err(Error::Execution(format!(
                "interpreter '{}' is not open",
                self.name
            )));
        }

        if !self.delay.is_zero() {
            ctx.set_progress(0);
            if ctx.abort_handle().wait_timeout(self.delay) {
                return Ok(JobResult::incomplete("aborted"));
            }
        }

        ctx.set_progress(100);
        Ok(JobResult::success(format!("{}: {}", self.prefix, script)))
    }

    fn scheduler_policy(&self) -> SchedulerPolicy {
        self.policy
    }
}
