//! `sh -c` backend.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::scheduler::{JobResult, SchedulerPolicy};

use super::{Interpreter, InterpreterContext};

/// Runs paragraph scripts through the system shell.
///
/// Each running paragraph owns one child process; `cancel` kills it.
pub struct ShellInterpreter {
    name: String,
    policy: SchedulerPolicy,
    shell: Mutex<Option<PathBuf>>,
    running: Mutex<FxHashMap<String, u32>>,
}

impl ShellInterpreter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: SchedulerPolicy::Fifo,
            shell: Mutex::new(None),
            running: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn with_policy(mut self, policy: SchedulerPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn running(&self) -> MutexGuard<'_, FxHashMap<String, u32>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shell_path(&self) -> Result<PathBuf> {
        let mut shell = self.shell.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(path) = shell.as_ref() {
            return Ok(path.clone());
        }
        let path = which::which("sh")
            .map_err(|e| Error::Execution(format!("Shell 'sh' not found: {}", e)))?;
        *shell = Some(path.clone());
        Ok(path)
    }
}

impl Interpreter for ShellInterpreter {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<()> {
        let path = self.shell_path()?;
        tracing::debug!("Shell interpreter '{}' using {}", self.name, path.display());
        Ok(())
    }

    fn close(&self) {
        let pids: Vec<u32> = self.running().drain().map(|(_, pid)| pid).collect();
        for pid in pids {
            kill(pid);
        }
    }

    fn interpret(&self, script: &str, ctx: &InterpreterContext<'_>) -> Result<JobResult> {
        let shell = self.shell_path()?;

        let mut command = Command::new(&shell);
        command
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so cancel reaches the script's children too.
            command.process_group(0);
        }
        let child = command
            .spawn()
            .map_err(|e| Error::Execution(format!("Failed to spawn {}: {}", shell.display(), e)))?;

        let paragraph_id = ctx.paragraph_id.to_string();
        self.running().insert(paragraph_id.clone(), child.id());

        // Abort may have landed between spawn and registration.
        if ctx.abort_handle().is_aborted() {
            kill(child.id());
        }

        let output = child.wait_with_output();
        self.running().remove(&paragraph_id);
        let output = output?;

        if ctx.abort_handle().is_aborted() {
            return Ok(JobResult::incomplete("interrupted"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            ctx.set_progress(100);
            return Ok(JobResult::success(stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut message = stdout;
        message.push_str(&stderr);
        if message.is_empty() {
            message = match output.status.code() {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            };
        }
        Ok(JobResult::error(message))
    }

    fn cancel(&self, ctx: &InterpreterContext<'_>) {
        let pid = self.running().get(ctx.paragraph_id).copied();
        if let Some(pid) = pid {
            tracing::debug!("Killing shell process {} for {}", pid, ctx.paragraph_id);
            kill(pid);
        }
    }

    fn scheduler_policy(&self) -> SchedulerPolicy {
        self.policy
    }
}

#[cfg(unix)]
fn kill(pid: u32) {
    // SAFETY: kill(2) has no memory-safety requirements; a stale group id
    // only yields ESRCH.
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill(pid: u32) {
    tracing::warn!("Cannot kill process {} on this platform", pid);
}
