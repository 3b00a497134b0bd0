//! Notes, paragraphs and their lifecycle.
//!
//! # Architecture
//!
//! ```text
//! Notebook ──── NoteRepo (storage)
//!    │     └─── TriggerRegistry (cron) ──► Note::run_all
//!    │
//!    └── Note
//!          ├── NoteInterpreterLoader ──► interpreter + scheduler
//!          └── Paragraph (Job) ──► Scheduler ──► Interpreter::interpret
//! ```
//!
//! # Module Structure
//!
//! - `cron` - Cron trigger registry
//! - `manager` - Notebook: create, clone, remove, list, cron refresh
//! - `note` - Note: paragraph editing and run operations
//! - `paragraph` - Paragraph job and `%name` interpreter selection

mod cron;
mod manager;
mod note;
mod paragraph;

pub use cron::{CronTriggers, TriggerCallback, TriggerRegistry, parse_cron};
pub use manager::Notebook;
pub use note::{JobListenerFactory, Note, NoteConfig};
pub use paragraph::{Paragraph, ParagraphConfig, split_interpreter};
