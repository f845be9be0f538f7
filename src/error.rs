//! Error types for the run harness.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigurationError;

/// Errors that can escape a harness run.
///
/// Failures inside the wrapped operations never surface here; they are retried
/// and then escalated through the Error state. Only problems with the harness's
/// own files and setup do.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to write run log '{}': {source}", path.display())]
    RunLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Logging setup error: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Create a run log write error
    pub fn run_log<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::RunLog {
            path: path.into(),
            source,
        }
    }

    /// Create a logging setup error
    pub fn logging<E: std::fmt::Display>(error: E) -> Self {
        Self::Logging(error.to_string())
    }
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_error_mentions_path() {
        let error = HarnessError::run_log(
            "/tmp/RunLog.csv",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );

        let error_string = error.to_string();
        assert!(error_string.contains("/tmp/RunLog.csv"));
        assert!(error_string.contains("denied"));
    }

    #[test]
    fn test_configuration_error_conversion() {
        let error: HarnessError =
            ConfigurationError::missing_required_field("LogFile", "run settings").into();
        assert!(matches!(error, HarnessError::Configuration(_)));
        assert!(error.to_string().contains("LogFile"));
    }
}
