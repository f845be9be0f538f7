//! # Run Persistence
//!
//! File-backed records written at the end of a run: the append-only CSV run
//! log and the single-record error output file.

pub mod error_output;
pub mod run_log;

pub use error_output::{ErrorOutputWriter, ErrorRecord};
pub use run_log::{RunLogRecord, RunLogger};
