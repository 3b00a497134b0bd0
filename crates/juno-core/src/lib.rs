//! Core engine for Juno interactive notebooks.
//!
//! This crate provides:
//! - Job state machine with listener hooks
//! - Named schedulers (single-flight FIFO or pooled)
//! - Interpreter settings, restart and a scoped variable registry
//! - Notes, paragraphs and the notebook manager
//! - Cron-driven re-runs of whole notes
//! - Filesystem and in-memory note storage
//!
//! # Example
//!
//! ```no_run
//! use juno_core::{Notebook, NotebookConfig};
//!
//! # fn main() -> juno_core::Result<()> {
//! let notebook = Notebook::from_config(&NotebookConfig::from_env(), None)?;
//! let note = notebook.create_note("demo")?;
//! note.add_paragraph().set_text("%sh echo hello");
//! note.run_all()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod interpreter;
pub mod notebook;
pub mod paths;
pub mod repo;
pub mod scheduler;

pub use config::NotebookConfig;
pub use error::{Error, Result};
pub use interpreter::{
    Interpreter, InterpreterContext, InterpreterFactory, InterpreterKind, InterpreterSetting,
    InterpreterSpec, NoteInterpreterLoader, RegistryListener, Variable, VariableRegistry,
};
pub use notebook::{
    CronTriggers, JobListenerFactory, Note, NoteConfig, Notebook, Paragraph, ParagraphConfig,
    TriggerRegistry,
};
pub use paths::JunoDirs;
pub use repo::{FsNoteRepo, MemoryNoteRepo, NoteDocument, NoteInfo, NoteRepo, ParagraphDocument};
pub use scheduler::{
    Job, JobCore, JobListener, JobResult, ResultCode, Scheduler, SchedulerFactory,
    SchedulerPolicy, Status,
};
