//! Bulk import pipeline for the statistical business register.
//!
//! A queued upload is extracted into raw records, each record is built
//! into a unit (mapping, code resolution, child matching), the dispatcher
//! applies the create/edit rules, and the bulk buffer persists batches in
//! one transaction per flush. Every record leaves an upload-log entry.

pub mod builder;
pub mod bulk;
pub mod dispatcher;
pub mod error;
pub mod log_buffer;
pub mod memory;
pub mod orchestrator;
pub mod resolver;
pub mod search;

pub use error::{ImportError, JobError, RecordError};
pub use orchestrator::{run_stuck_sweep, sweep_stuck_once, ImportServices, JobReport, QueueProcessor};
pub use search::HttpSearchIndex;
