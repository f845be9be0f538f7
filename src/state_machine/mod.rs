// Run lifecycle state machine
//
// A run moves Initialization -> Processing -> End, escalating into Error when an
// operation exhausts its retry budget. Error always hands over to End, which
// appends the run log record.

pub mod context;
pub mod retry;
pub mod states;

// Re-export main types for convenient access
pub use context::{RunContext, RunContextBuilder, RunSummary};
pub use retry::{RetryExhausted, RetryPolicy, RunFailure};
pub use states::{RunState, RunStateKind, Transition};
