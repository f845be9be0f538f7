//! # Run Context
//!
//! [`RunContext`] owns one run: the current and previous state, the retry
//! bookkeeping, and the configuration attached by the latest transition. It
//! drives the lifecycle as an explicit loop: step the current state, apply the
//! transition it returns, stop once End has run.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::retry::{RetryExhausted, RetryPolicy};
use super::states::{RunState, RunStateKind};
use crate::config::{ConfigMap, ConfigProvider, FallbackSettings, RunSettings};
use crate::error::HarnessResult;
use crate::logging::log_run_transition;
use crate::task::Task;

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub success: bool,
    pub final_state: RunStateKind,
    /// State that handed over to End
    pub previous_state: Option<RunStateKind>,
    /// The run passed through the Error state
    pub escalated: bool,
    pub script_name: String,
    pub run_log_path: PathBuf,
    /// Set only when an error output file was actually written
    pub error_output_path: Option<PathBuf>,
}

/// Orchestrates a single run from Initialization to End
pub struct RunContext {
    run_id: Uuid,
    provider: Arc<dyn ConfigProvider>,
    task: Arc<dyn Task>,
    fallback: FallbackSettings,
    policy: RetryPolicy,
    retry_count: u32,
    current_state: Option<RunStateKind>,
    previous_state: Option<RunStateKind>,
    error_signaled: bool,
    config: Option<Arc<ConfigMap>>,
    ended: Option<(RunSettings, bool)>,
    error_output_path: Option<PathBuf>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("task", &self.task.name())
            .field("policy", &self.policy)
            .field("retry_count", &self.retry_count)
            .field("current_state", &self.current_state)
            .field("previous_state", &self.previous_state)
            .field("error_signaled", &self.error_signaled)
            .field("config_attached", &self.config.is_some())
            .finish()
    }
}

impl RunContext {
    /// Context with default retry settings and the provider's fallback settings
    pub fn new(provider: Arc<dyn ConfigProvider>, task: Arc<dyn Task>) -> Self {
        RunContextBuilder::new(provider, task).build()
    }

    pub fn builder(provider: Arc<dyn ConfigProvider>, task: Arc<dyn Task>) -> RunContextBuilder {
        RunContextBuilder::new(provider, task)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn current_state(&self) -> Option<RunStateKind> {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<RunStateKind> {
        self.previous_state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn error_signaled(&self) -> bool {
        self.error_signaled
    }

    pub fn config(&self) -> Option<&Arc<ConfigMap>> {
        self.config.as_ref()
    }

    pub fn fallback(&self) -> &FallbackSettings {
        &self.fallback
    }

    pub(crate) fn provider(&self) -> Arc<dyn ConfigProvider> {
        Arc::clone(&self.provider)
    }

    pub(crate) fn task(&self) -> Arc<dyn Task> {
        Arc::clone(&self.task)
    }

    /// Run the lifecycle to completion
    ///
    /// Every failure of the wrapped operations ends in a logged run. The only
    /// error returned is a failure to append the run log itself.
    pub async fn start(&mut self) -> HarnessResult<RunSummary> {
        info!(run_id = %self.run_id, task = %self.task.name(), "Starting run");

        let mut state = RunState::Initialization;
        self.transition_to(&state, false);

        while let Some(transition) = state.step(self).await? {
            self.transition_to(&transition.next, transition.error_signaled);
            state = transition.next;
        }

        let summary = self.summary();
        info!(
            run_id = %summary.run_id,
            success = summary.success,
            run_log = %summary.run_log_path.display(),
            "Run finished"
        );
        Ok(summary)
    }

    /// Enter `next`: reset the retry counter, remember the state being left,
    /// and attach the configuration `next` carries
    ///
    /// An Error state entered with `error_signaled` always hands over to End
    /// on its next step; Error is never terminal.
    pub fn transition_to(&mut self, next: &RunState, error_signaled: bool) {
        let next_kind = next.kind();
        if let Some(current) = self.current_state {
            if !current.can_transition_to(next_kind) {
                warn!(from = %current, to = %next_kind, "Unexpected run state transition");
            }
        }

        self.retry_count = 0;
        self.error_signaled = error_signaled;
        self.previous_state = self.current_state;
        self.current_state = Some(next_kind);
        self.config = next.config().cloned();

        log_run_transition(
            &self.run_id.to_string(),
            self.previous_state.map(|s| s.to_string()).as_deref(),
            &next_kind.to_string(),
            error_signaled,
        );
    }

    /// Invoke `operation` until it succeeds or the retry budget is spent
    ///
    /// With a configuration attached, the budget is refreshed from it before
    /// the first attempt. Between attempts the run sleeps for the policy delay.
    pub async fn retry<T, F, Fut>(
        &mut self,
        operation: &str,
        mut f: F,
    ) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(config) = &self.config {
            self.policy = self.policy.refreshed_from(config);
        }
        let max_attempts = self.policy.effective_attempts();

        debug!(
            operation = %operation,
            max_attempts,
            "Trying to run {operation}"
        );

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.retry_count += 1;

                    if self.retry_count >= max_attempts {
                        error!(
                            operation = %operation,
                            attempts = self.retry_count,
                            "Failed to run {operation}. Maximum number of retries reached. Error: {e:#}"
                        );
                        return Err(RetryExhausted {
                            operation: operation.to_string(),
                            attempts: self.retry_count,
                            error: e,
                        });
                    }

                    let delay = self.policy.delay_for(self.retry_count);
                    warn!(
                        operation = %operation,
                        error = %format!("{e:#}"),
                        "Attempt {} failed. Retrying in {:?}...",
                        self.retry_count,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub(crate) fn record_end(&mut self, settings: RunSettings, success: bool) {
        self.ended = Some((settings, success));
    }

    pub(crate) fn record_error_output(&mut self, path: PathBuf) {
        self.error_output_path = Some(path);
    }

    fn summary(&self) -> RunSummary {
        let (settings, success) = match &self.ended {
            Some((settings, success)) => (settings.clone(), *success),
            None => (RunSettings::resolve(None, &self.fallback), false),
        };

        RunSummary {
            run_id: self.run_id,
            success,
            final_state: self.current_state.unwrap_or(RunStateKind::End),
            previous_state: self.previous_state,
            escalated: self.previous_state.is_some_and(|state| state.is_error()),
            script_name: settings.script_name,
            run_log_path: settings.run_log_path,
            error_output_path: self.error_output_path.clone(),
        }
    }
}

/// Builder for [`RunContext`]
pub struct RunContextBuilder {
    provider: Arc<dyn ConfigProvider>,
    task: Arc<dyn Task>,
    policy: RetryPolicy,
    fallback: Option<FallbackSettings>,
    run_id: Option<Uuid>,
}

impl RunContextBuilder {
    pub fn new(provider: Arc<dyn ConfigProvider>, task: Arc<dyn Task>) -> Self {
        Self {
            provider,
            task,
            policy: RetryPolicy::default(),
            fallback: None,
            run_id: None,
        }
    }

    /// Retry policy used until a configuration is attached
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Output locations for runs that never load a configuration
    pub fn fallback(mut self, fallback: FallbackSettings) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn build(self) -> RunContext {
        let fallback = self
            .fallback
            .unwrap_or_else(|| self.provider.fallback_settings());

        RunContext {
            run_id: self.run_id.unwrap_or_else(Uuid::new_v4),
            provider: self.provider,
            task: self.task,
            fallback,
            policy: self.policy,
            retry_count: 0,
            current_state: None,
            previous_state: None,
            error_signaled: false,
            config: None,
            ended: None,
            error_output_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskFn;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn context_with(config: ConfigMap) -> RunContext {
        let task = Arc::new(TaskFn::new("noop", |_config: Arc<ConfigMap>| async {
            Ok::<_, anyhow::Error>(true)
        }));
        RunContext::builder(Arc::new(config), task)
            .retry_policy(RetryPolicy::new(3, Duration::ZERO))
            .fallback(FallbackSettings::new("/tmp"))
            .build()
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let mut context = context_with(ConfigMap::new());
        let calls = AtomicU32::new(0);

        let result = context
            .retry("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 {
                    anyhow::bail!("attempt {n} failed");
                }
                Ok(n)
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(context.retry_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let mut context = context_with(ConfigMap::new());
        let calls = AtomicU32::new(0);

        let exhausted = context
            .retry("always_fails", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("nope"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.operation, "always_fails");
    }

    #[tokio::test]
    async fn test_attached_config_refreshes_budget() {
        let config = ConfigMap::from_entries([("RetryNumber", json!(5)), ("RetryDelay", json!(0))]);
        let mut context = context_with(config.clone());
        context.transition_to(
            &RunState::Processing {
                config: Arc::new(config),
            },
            false,
        );
        let calls = AtomicU32::new(0);

        let _ = context
            .retry("always_fails", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("nope"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(context.retry_policy().max_attempts, 5);
    }

    #[tokio::test]
    async fn test_transition_resets_counter_and_tracks_previous() {
        let mut context = context_with(ConfigMap::new());
        context.transition_to(&RunState::Initialization, false);
        let _ = context
            .retry("always_fails", || async {
                Err::<(), _>(anyhow::anyhow!("nope"))
            })
            .await;
        assert_eq!(context.retry_count(), 3);

        context.transition_to(
            &RunState::End {
                config: None,
                success: false,
            },
            false,
        );
        assert_eq!(context.retry_count(), 0);
        assert_eq!(context.previous_state(), Some(RunStateKind::Initialization));
        assert_eq!(context.current_state(), Some(RunStateKind::End));
        assert!(context.config().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleeps_between_attempts() {
        let config = ConfigMap::from_entries([("RetryNumber", json!(3)), ("RetryDelay", json!(2))]);
        let mut context = context_with(config.clone());
        context.transition_to(
            &RunState::Processing {
                config: Arc::new(config),
            },
            false,
        );

        let started = tokio::time::Instant::now();
        let _ = context
            .retry("always_fails", || async {
                Err::<(), _>(anyhow::anyhow!("nope"))
            })
            .await;

        // two sleeps between three attempts
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }
}
