#![allow(clippy::doc_markdown)] // Allow technical terms like RetryNumber, ScriptName in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Automation Harness
//!
//! Run-harness for one-off automation scripts.
//!
//! ## Overview
//!
//! A run settles its configuration, executes the wrapped task under a retry
//! budget, escalates exhausted retries into a recorded error, and always ends
//! by appending a row to the run log (script name, timestamp, operator,
//! success flag).
//!
//! ## Lifecycle
//!
//! ```text
//! Initialization ──ok──▶ Processing ──ok(bool)──▶ End
//!        │                    │                    ▲
//!        └──retries spent─────┴──▶ Error ──────────┘
//! ```
//!
//! Every transition resets the retry counter. Error is never terminal: it
//! writes the error output file and hands over to End.
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration loading and the settled [`ConfigMap`]
//! - [`state_machine`] - Run states, the run context, and retry policy
//! - [`persistence`] - Run log and error output writers
//! - [`task`] - The [`Task`] trait and its stock implementations
//! - [`logging`] - Console and file logging
//! - [`error`] - Harness error types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use automation_harness::config::{ConfigMap, LayeredConfigProvider};
//! use automation_harness::{RunContext, TaskFn};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = LayeredConfigProvider::builder().build()?;
//! let task = TaskFn::arc("nightly_sync", |config: Arc<ConfigMap>| async move {
//!     tracing::info!(script = ?config.get_str("ScriptName"), "syncing");
//!     Ok::<_, anyhow::Error>(true)
//! });
//!
//! let summary = RunContext::new(Arc::new(provider), task).start().await?;
//! println!("run {} succeeded: {}", summary.run_id, summary.success);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod state_machine;
pub mod task;

pub use config::{
    ConfigMap, ConfigProvider, ConfigurationError, FallbackSettings, LayeredConfigProvider,
    RunSettings,
};
pub use error::{HarnessError, HarnessResult};
pub use logging::{init_structured_logging, LoggingHandle, LoggingOptions};
pub use persistence::{ErrorOutputWriter, ErrorRecord, RunLogRecord, RunLogger};
pub use state_machine::{
    RetryExhausted, RetryPolicy, RunContext, RunFailure, RunState, RunStateKind, RunSummary,
};
pub use task::{CommandTask, PlaceholderTask, Task, TaskFn};
