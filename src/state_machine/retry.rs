//! Retry budget and escalation payloads.
//!
//! A [`RetryPolicy`] bounds how many times one operation is attempted and how
//! long the run waits between attempts. Exhausting it yields a
//! [`RetryExhausted`], which the calling state turns into an Error transition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::config::{ConfigMap, ConfigurationError};
use crate::constants::{retry, settings};

/// Attempts and delays for retried operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts before escalation; 0 behaves like 1
    pub max_attempts: u32,
    /// Delay before the first retry
    pub delay: Duration,
    /// Growth factor applied per retry; 1.0 keeps the delay constant
    pub multiplier: f64,
    /// Cap for grown delays
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            delay: retry::DEFAULT_DELAY,
            multiplier: retry::DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: retry::DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Constant-delay policy
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.multiplier = multiplier.max(1.0);
        self.max_delay = max_delay;
        self
    }

    /// Attempts actually made; a budget of 0 still runs the operation once
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.multiplier <= 1.0 || retry <= 1 {
            return self.delay;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let grown = self.delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.max(self.delay);

        Duration::try_from_secs_f64(grown)
            .map(|d| d.min(cap))
            .unwrap_or(cap)
    }

    /// Policy with the retry settings of an attached configuration applied
    ///
    /// An unset or zero `RetryNumber` means one attempt. Unset delay settings
    /// keep their current values; unreadable ones are logged and ignored.
    pub fn refreshed_from(&self, config: &ConfigMap) -> Self {
        let mut policy = *self;

        policy.max_attempts = match config.get_i64(settings::RETRY_NUMBER) {
            Ok(Some(n)) => u32::try_from(n.max(0)).unwrap_or(u32::MAX),
            Ok(None) => 0,
            Err(e) => {
                warn_unreadable(&e);
                0
            }
        };

        if let Some(delay) = read_seconds(config, settings::RETRY_DELAY) {
            policy.delay = delay;
        }
        if let Some(max_delay) = read_seconds(config, settings::RETRY_MAX_DELAY) {
            policy.max_delay = max_delay;
        }
        match config.get_f64(settings::RETRY_BACKOFF_MULTIPLIER) {
            Ok(Some(multiplier)) if multiplier >= 1.0 => policy.multiplier = multiplier,
            Ok(_) => {}
            Err(e) => warn_unreadable(&e),
        }

        policy
    }
}

fn read_seconds(config: &ConfigMap, key: &str) -> Option<Duration> {
    match config.get_f64(key) {
        Ok(Some(seconds)) => Duration::try_from_secs_f64(seconds).ok(),
        Ok(None) => None,
        Err(e) => {
            warn_unreadable(&e);
            None
        }
    }
}

fn warn_unreadable(error: &ConfigurationError) {
    warn!(error = %error, "Ignoring unreadable retry setting");
}

/// Returned by `RunContext::retry` once the budget is spent
#[derive(Debug)]
pub struct RetryExhausted {
    pub operation: String,
    pub attempts: u32,
    /// Error from the final attempt
    pub error: anyhow::Error,
}

impl fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {:#}",
            self.operation, self.attempts, self.error
        )
    }
}

/// What went wrong in an escalated run, as carried by the Error state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub operation: String,
    pub attempts: u32,
    pub kind: String,
    pub message: String,
}

impl RunFailure {
    /// Classify an operation error
    ///
    /// Configuration errors report their variant name, I/O errors `IoError`,
    /// everything else `TaskError`.
    pub fn error_kind(error: &anyhow::Error) -> String {
        if let Some(config_error) = error.downcast_ref::<ConfigurationError>() {
            return config_error.kind().to_string();
        }
        if error.downcast_ref::<std::io::Error>().is_some() {
            return "IoError".to_string();
        }
        "TaskError".to_string()
    }
}

impl From<RetryExhausted> for RunFailure {
    fn from(exhausted: RetryExhausted) -> Self {
        Self {
            kind: Self::error_kind(&exhausted.error),
            message: format!("{:#}", exhausted.error),
            operation: exhausted.operation,
            attempts: exhausted.attempts,
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} after {} attempt(s): {}",
            self.kind, self.operation, self.attempts, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_budget_still_attempts_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).effective_attempts(), 1);
        assert_eq!(RetryPolicy::new(4, Duration::ZERO).effective_attempts(), 4);
    }

    #[test]
    fn test_constant_delay_by_default() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1))
            .with_backoff(2.0, Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_refresh_from_config() {
        let config = ConfigMap::from_entries([
            ("RetryNumber", json!("5")),
            ("RetryDelay", json!(0.25)),
            ("RetryBackoffMultiplier", json!(3)),
        ]);
        let policy = RetryPolicy::default().refreshed_from(&config);

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_millis(250));
        assert_eq!(policy.multiplier, 3.0);
        assert_eq!(policy.max_delay, retry::DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_refresh_with_unset_retry_number_means_one_attempt() {
        let config = ConfigMap::from_entries([("RetryDelay", json!(0))]);
        let policy = RetryPolicy::default().refreshed_from(&config);
        assert_eq!(policy.max_attempts, 0);
        assert_eq!(policy.effective_attempts(), 1);
        assert_eq!(policy.delay, Duration::ZERO);
    }

    #[test]
    fn test_failure_classification() {
        let config_error: anyhow::Error =
            ConfigurationError::missing_required_field("LogFile", "run configuration").into();
        assert_eq!(RunFailure::error_kind(&config_error), "MissingRequiredField");

        let io_error: anyhow::Error =
            std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert_eq!(RunFailure::error_kind(&io_error), "IoError");

        let task_error = anyhow::anyhow!("upstream returned 503");
        assert_eq!(RunFailure::error_kind(&task_error), "TaskError");
    }

    #[test]
    fn test_failure_from_exhausted() {
        let failure = RunFailure::from(RetryExhausted {
            operation: "sync_invoices".to_string(),
            attempts: 3,
            error: anyhow::anyhow!("upstream returned 503").context("fetching page 2"),
        });

        assert_eq!(failure.kind, "TaskError");
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.message, "fetching page 2: upstream returned 503");
    }
}
