use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::context::RunContext;
use super::retry::RunFailure;
use crate::config::{ConfigMap, ConfigProvider, RunSettings};
use crate::error::{HarnessError, HarnessResult};
use crate::persistence::{ErrorOutputWriter, ErrorRecord, RunLogRecord, RunLogger};
use crate::task::Task;

/// Run lifecycle state names, without payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStateKind {
    /// Settling configuration
    Initialization,
    /// Running the task
    Processing,
    /// Writing the run log; terminal
    End,
    /// Writing the error output; always followed by End
    Error,
}

impl RunStateKind {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Check if this is the escalation state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: RunStateKind) -> bool {
        matches!(
            (self, next),
            (Self::Initialization, Self::Processing)
                | (Self::Initialization, Self::End)
                | (Self::Initialization, Self::Error)
                | (Self::Processing, Self::End)
                | (Self::Processing, Self::Error)
                | (Self::Error, Self::End)
        )
    }
}

impl fmt::Display for RunStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialization => write!(f, "initialization"),
            Self::Processing => write!(f, "processing"),
            Self::End => write!(f, "end"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for RunStateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialization" => Ok(Self::Initialization),
            "processing" => Ok(Self::Processing),
            "end" => Ok(Self::End),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid run state: {s}")),
        }
    }
}

/// A lifecycle state together with the data it needs for its step
#[derive(Debug, Clone)]
pub enum RunState {
    Initialization,
    Processing {
        config: Arc<ConfigMap>,
    },
    End {
        config: Option<Arc<ConfigMap>>,
        success: bool,
    },
    Error {
        config: Option<Arc<ConfigMap>>,
        success: bool,
        failure: RunFailure,
    },
}

/// Next state chosen by a step
#[derive(Debug, Clone)]
pub struct Transition {
    pub next: RunState,
    pub error_signaled: bool,
}

impl Transition {
    pub fn to(next: RunState) -> Self {
        Self {
            next,
            error_signaled: false,
        }
    }

    /// Escalate into the Error state after an exhausted retry budget
    pub fn escalate(config: Option<Arc<ConfigMap>>, failure: RunFailure) -> Self {
        Self {
            next: RunState::Error {
                config,
                success: false,
                failure,
            },
            error_signaled: true,
        }
    }
}

impl RunState {
    pub fn kind(&self) -> RunStateKind {
        match self {
            Self::Initialization => RunStateKind::Initialization,
            Self::Processing { .. } => RunStateKind::Processing,
            Self::End { .. } => RunStateKind::End,
            Self::Error { .. } => RunStateKind::Error,
        }
    }

    /// Configuration carried into this state, if any
    pub fn config(&self) -> Option<&Arc<ConfigMap>> {
        match self {
            Self::Initialization => None,
            Self::Processing { config } => Some(config),
            Self::End { config, .. } | Self::Error { config, .. } => config.as_ref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Run this state's step; `None` means the run is finished
    pub async fn step(self, context: &mut RunContext) -> HarnessResult<Option<Transition>> {
        match self {
            Self::Initialization => Ok(Some(initialize(context).await)),
            Self::Processing { config } => Ok(Some(process(context, config).await)),
            Self::End { config, success } => {
                end(context, config.as_deref(), success)?;
                Ok(None)
            }
            Self::Error {
                config,
                success,
                failure,
            } => {
                record_error(context, config.as_deref(), &failure);
                Ok(Some(Transition::to(Self::End { config, success })))
            }
        }
    }
}

async fn initialize(context: &mut RunContext) -> Transition {
    debug!("Starting initialization...");

    let provider = context.provider();
    let provider: &dyn ConfigProvider = provider.as_ref();

    let loaded = context
        .retry("config_setup", || async move {
            provider.load().map_err(anyhow::Error::from)
        })
        .await;

    match loaded {
        Ok(Some(config)) => {
            info!("Initialization successful.");
            Transition::to(RunState::Processing {
                config: Arc::new(config),
            })
        }
        Ok(None) => {
            info!("Initialization failed.");
            Transition::to(RunState::End {
                config: None,
                success: false,
            })
        }
        Err(exhausted) => Transition::escalate(None, exhausted.into()),
    }
}

async fn process(context: &mut RunContext, config: Arc<ConfigMap>) -> Transition {
    let task = context.task();
    let task: &dyn Task = task.as_ref();
    let operation = task.name().to_string();

    let outcome = context
        .retry(&operation, || {
            let config = Arc::clone(&config);
            async move { task.run(config).await }
        })
        .await;

    match outcome {
        Ok(true) => {
            info!("Processing successful.");
            Transition::to(RunState::End {
                config: Some(config),
                success: true,
            })
        }
        Ok(false) => {
            error!("Processing failed.");
            Transition::to(RunState::End {
                config: Some(config),
                success: false,
            })
        }
        Err(exhausted) => Transition::escalate(Some(config), exhausted.into()),
    }
}

fn end(context: &mut RunContext, config: Option<&ConfigMap>, success: bool) -> HarnessResult<()> {
    info!("Process ended.");

    let settings = RunSettings::resolve(config, context.fallback());
    let record = RunLogRecord::new(&settings.script_name, &settings.username, success);

    RunLogger
        .append(&settings.run_log_path, &record)
        .map_err(|e| HarnessError::run_log(&settings.run_log_path, e))?;

    debug!(
        run_log = %settings.run_log_path.display(),
        script_name = %settings.script_name,
        success,
        "Run log record appended"
    );
    context.record_end(settings, success);
    Ok(())
}

/// Write the error output; failures here are logged and never propagated
fn record_error(context: &mut RunContext, config: Option<&ConfigMap>, failure: &RunFailure) {
    let previous = context
        .previous_state()
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    error!(
        previous_state = %previous,
        operation = %failure.operation,
        attempts = failure.attempts,
        "Error occurred in {previous}: {failure}"
    );

    let settings = RunSettings::resolve(config, context.fallback());
    let record = ErrorRecord::new(&failure.kind, &failure.message);

    info!("Writing error to file.");
    match ErrorOutputWriter.write(&settings.error_output_path, &record) {
        Ok(()) => {
            info!(error_output = %settings.error_output_path.display(), "Error writing completed.");
            context.record_error_output(settings.error_output_path);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!(
                error_output = %settings.error_output_path.display(),
                "Unable to write error output: {e}"
            );
        }
        Err(e) => {
            crate::logging::log_error(
                "error_state",
                "write_error_output",
                &e.to_string(),
                Some("An unexpected error occurred. Please review logs. Unable to continue."),
            );
            error!(
                severity = "critical",
                error_output = %settings.error_output_path.display(),
                "An unexpected error occurred. {:?} {e} Please review logs. Unable to continue.",
                e.kind()
            );
        }
    }
}
