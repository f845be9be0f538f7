//! # Harness Constants
//!
//! Setting names, file names, and defaults shared by the configuration layer,
//! the state machine, and the run log writers.

use std::time::Duration;

/// Setting names read from a [`ConfigMap`](crate::config::ConfigMap).
///
/// Lookups are case-insensitive, so these spellings are for readability only.
pub mod settings {
    pub const RETRY_NUMBER: &str = "RetryNumber";
    pub const RETRY_DELAY: &str = "RetryDelay";
    pub const RETRY_BACKOFF_MULTIPLIER: &str = "RetryBackoffMultiplier";
    pub const RETRY_MAX_DELAY: &str = "RetryMaxDelay";
    pub const SCRIPT_NAME: &str = "ScriptName";
    pub const LOG_FILE: &str = "LogFile";
    pub const ERROR_OUTPUT: &str = "ErrorOutput";
    pub const ENVIRONMENT: &str = "Environment";
    pub const PARENT_DIR: &str = "parent_dir";
    pub const WORK_DIR: &str = "work_dir";
    pub const USERNAME: &str = "username";
    pub const SETTINGS_PATH: &str = "settings_path";
    pub const LOG_PATH: &str = "log_path";
    pub const LOGGING_COLORS: &str = "logging_colors";
}

/// Retry defaults used until a configuration map is attached
pub mod retry {
    use super::Duration;

    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);
    pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);
}

/// Output file defaults and formats
pub mod files {
    pub const DEFAULT_RUN_LOG: &str = "RunLog.csv";
    pub const DEFAULT_ERROR_OUTPUT: &str = "ErrorOutput.txt";
    pub const DEFAULT_LOG_DIR: &str = "Log";
    pub const RUN_LOG_HEADER: [&str; 4] = ["Script Name", "Date/Time Run", "Username", "Successful?"];
}

/// Configuration discovery
pub mod discovery {
    pub const DEFAULT_ROOT_MARKER: &str = "automation";
    pub const DEFAULT_CONFIG_DIR: &str = "Config";
    pub const BASE_CONFIG_STEM: &str = "harness";
    pub const CONFIG_EXTENSIONS: [&str; 4] = ["toml", "yaml", "yml", "json"];
    pub const ENV_PREFIX: &str = "HARNESS";
    pub const ENVIRONMENT_VAR: &str = "HARNESS_ENV";
    pub const DEFAULT_ENVIRONMENT: &str = "development";
}

/// Operator fallback when no user can be resolved from the environment
pub const UNKNOWN_OPERATOR: &str = "unknown";

/// Script name when neither the configuration nor the parent folder names one
pub const UNKNOWN_SCRIPT: &str = "unknown";
