//! Language backends and their execution contexts.
//!
//! # Architecture
//!
//! ```text
//! InterpreterFactory
//!     │
//!     └── InterpreterSetting (id, name)
//!             │
//!             └── InterpreterGroup
//!                     ├── interpreters (echo, sh, ...)
//!                     ├── VariableRegistry (scoped live values)
//!                     └── scheduler name ──► SchedulerFactory
//!
//! NoteInterpreterLoader: settings bound to one note, resolves `%name`
//! ```
//!
//! # Module Structure
//!
//! - `echo` - Echo backend (prefix + text)
//! - `factory` - Settings, groups, restart
//! - `loader` - Per-note interpreter binding
//! - `registry` - Scoped variable registry
//! - `shell` - `sh -c` backend

mod echo;
mod factory;
mod loader;
mod registry;
mod shell;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scheduler::{AbortHandle, JobCore, JobResult, SchedulerPolicy};

pub use echo::EchoInterpreter;
pub use factory::{
    InterpreterFactory, InterpreterGroup, InterpreterSetting, InterpreterSpec, RestartListener,
};
pub use loader::{NoteInterpreterLoader, ResolvedInterpreter};
pub use registry::{RegistryListener, Variable, VariableRegistry};
pub use shell::ShellInterpreter;

/// A language backend.
///
/// Implementations are shared across scheduler workers and must be
/// thread-safe. `interpret` runs on a worker thread; `cancel` is called from
/// whichever thread aborts the job.
pub trait Interpreter: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}

    /// Execute `script` and return its result.
    ///
    /// Errors are captured by the scheduler as an `ERROR` job result.
    fn interpret(&self, script: &str, ctx: &InterpreterContext<'_>) -> Result<JobResult>;

    /// Best-effort cancellation of the execution described by `ctx`.
    fn cancel(&self, _ctx: &InterpreterContext<'_>) {}

    /// Concurrency policy of the scheduler this backend runs on.
    fn scheduler_policy(&self) -> SchedulerPolicy {
        SchedulerPolicy::Fifo
    }
}

/// Everything an interpreter sees about one paragraph execution.
pub struct InterpreterContext<'a> {
    pub note_id: &'a str,
    pub paragraph_id: &'a str,
    pub paragraph_title: Option<&'a str>,
    pub paragraph_text: &'a str,
    pub config: &'a serde_json::Map<String, serde_json::Value>,
    pub registry: &'a Arc<VariableRegistry>,
    job: &'a JobCore,
}

impl<'a> InterpreterContext<'a> {
    pub(crate) fn new(
        job: &'a JobCore,
        note_id: &'a str,
        paragraph_title: Option<&'a str>,
        paragraph_text: &'a str,
        config: &'a serde_json::Map<String, serde_json::Value>,
        registry: &'a Arc<VariableRegistry>,
    ) -> Self {
        Self {
            note_id,
            paragraph_id: job.id(),
            paragraph_title,
            paragraph_text,
            config,
            registry,
            job,
        }
    }

    /// Abort handle of the running job.
    pub fn abort_handle(&self) -> &AbortHandle {
        self.job.abort_handle()
    }

    /// Report progress (0..=100) of the running job.
    pub fn set_progress(&self, progress: u8) {
        self.job.set_progress(progress);
    }
}

/// Closed set of backends, selected by configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterpreterKind {
    /// Returns `"<prefix>: <script>"`, optionally after a delay.
    Echo {
        prefix: String,
        #[serde(default)]
        delay_ms: u64,
    },
    /// Runs the script with `sh -c`.
    Shell,
}

impl InterpreterKind {
    /// Parse a configuration key (`echo`, `sh`).
    pub fn from_key(key: &str) -> Result<Self> {
        match key.trim() {
            "echo" => Ok(InterpreterKind::Echo {
                prefix: "echo".to_string(),
                delay_ms: 0,
            }),
            "sh" | "shell" => Ok(InterpreterKind::Shell),
            other => Err(Error::NotFound(format!("interpreter backend '{}'", other))),
        }
    }

    /// Instantiate the backend under `name`.
    pub fn build(&self, name: &str, policy: SchedulerPolicy) -> Arc<dyn Interpreter> {
        match self {
            InterpreterKind::Echo { prefix, delay_ms } => Arc::new(
                EchoInterpreter::new(name, prefix.as_str())
                    .with_delay(Duration::from_millis(*delay_ms))
                    .with_policy(policy),
            ),
            InterpreterKind::Shell => Arc::new(ShellInterpreter::new(name).with_policy(policy)),
        }
    }
}
