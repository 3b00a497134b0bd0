//! Job lifecycle and scheduling.
//!
//! # Architecture
//!
//! ```text
//! SchedulerFactory
//!     │
//!     └── Scheduler (one per interpreter context, by name)
//!             │
//!             ├── waiting queue ──► worker thread(s) ──► Job::run
//!             │
//!             └── abort_matching / abort_all ──► ABORT
//! ```
//!
//! # Module Structure
//!
//! - `abort` - Cooperative cancellation handle
//! - `job` - Status state machine, results and listeners
//! - `queue` - Scheduler with FIFO or pooled workers
//! - `factory` - Named scheduler registry

mod abort;
mod factory;
mod job;
mod queue;

pub use abort::AbortHandle;
pub use factory::SchedulerFactory;
pub use job::{FnJob, Job, JobCore, JobListener, JobResult, JobSnapshot, ResultCode, Status};
pub use queue::{Scheduler, SchedulerCallback, SchedulerPolicy};
