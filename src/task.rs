//! # Tasks
//!
//! A [`Task`] is the unit of work a run wraps. The Processing state invokes it
//! under the retry budget: `Ok(true)` ends the run successfully, `Ok(false)`
//! ends it unsuccessfully without escalation, and `Err` is retried.

use async_trait::async_trait;
use std::borrow::Cow;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::ConfigMap;
use crate::constants::settings;

/// Work executed by the Processing state
#[async_trait]
pub trait Task: Send + Sync {
    /// Operation name used in logs and failure records
    fn name(&self) -> &str;

    async fn run(&self, config: Arc<ConfigMap>) -> anyhow::Result<bool>;
}

/// Closure-backed task
///
/// Each attempt calls the closure for a fresh future. Shared state between
/// attempts has to live in an explicit `Arc` captured by the closure.
#[derive(Debug)]
pub struct TaskFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> TaskFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the task as a shared handle
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(Arc<ConfigMap>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, config: Arc<ConfigMap>) -> anyhow::Result<bool> {
        (self.f)(config).await
    }
}

/// Runs an external program; a zero exit status is success
///
/// The program starts in the configured `work_dir` when one is set. Failing to
/// spawn it is an error and is retried.
#[derive(Debug, Clone)]
pub struct CommandTask {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandTask {
    pub fn new<P: Into<String>, I, S>(program: P, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        Self {
            name: program.clone(),
            program,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn working_dir(config: &ConfigMap) -> Option<PathBuf> {
        config
            .get_path(settings::WORK_DIR)
            .filter(|path| path.is_dir())
    }
}

#[async_trait]
impl Task for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, config: Arc<ConfigMap>) -> anyhow::Result<bool> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        if let Some(dir) = Self::working_dir(&config) {
            command.current_dir(dir);
        }

        debug!(program = %self.program, args = ?self.args, "Spawning command");
        let status = command
            .status()
            .await
            .map_err(|e| anyhow::Error::new(e).context(format!("failed to run {}", self.program)))?;

        if status.success() {
            info!(program = %self.program, "Command completed successfully");
        } else {
            error!(program = %self.program, status = %status, "Command exited unsuccessfully");
        }
        Ok(status.success())
    }
}

/// Stand-in task for freshly scaffolded scripts
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderTask;

#[async_trait]
impl Task for PlaceholderTask {
    fn name(&self) -> &str {
        "placeholder"
    }

    async fn run(&self, _config: Arc<ConfigMap>) -> anyhow::Result<bool> {
        error!(
            severity = "critical",
            "Replace this with the actual function you want to run."
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_task_fn_creates_fresh_future_per_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let task = TaskFn::new("counting", move |_config: Arc<ConfigMap>| {
            let counter = Arc::clone(&counter);
            async move { Ok::<_, anyhow::Error>(counter.fetch_add(1, Ordering::SeqCst) > 0) }
        });

        let config = Arc::new(ConfigMap::new());
        assert!(!task.run(Arc::clone(&config)).await.unwrap());
        assert!(task.run(config).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(task.name(), "counting");
    }

    #[tokio::test]
    async fn test_task_fn_sees_config() {
        let task = TaskFn::arc("reads_config", |config: Arc<ConfigMap>| async move {
            Ok::<_, anyhow::Error>(config.get_str("ScriptName").as_deref() == Some("nightly"))
        });
        let config = Arc::new(ConfigMap::from_entries([(
            "scriptname",
            serde_json::json!("nightly"),
        )]));

        assert!(task.run(config).await.unwrap());
    }

    #[tokio::test]
    async fn test_placeholder_succeeds() {
        assert!(PlaceholderTask
            .run(Arc::new(ConfigMap::new()))
            .await
            .unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_status() {
        let config = Arc::new(ConfigMap::new());

        let ok = CommandTask::new("true", Vec::<String>::new());
        assert!(ok.run(Arc::clone(&config)).await.unwrap());

        let failing = CommandTask::new("false", Vec::<String>::new());
        assert!(!failing.run(config).await.unwrap());
    }

    #[test]
    fn test_command_name_defaults_to_program() {
        let task = CommandTask::new("python", ["sync.py"]);
        assert_eq!(task.name(), "python");
        assert_eq!(task.program(), "python");
        assert_eq!(task.args(), ["sync.py".to_string()]);

        let named = task.with_name("invoice_sync");
        assert_eq!(named.name(), "invoice_sync");
        assert_eq!(named.program(), "python");
    }

    #[tokio::test]
    async fn test_command_spawn_failure_is_error() {
        let task = CommandTask::new("definitely-not-a-real-program-4242", ["--help"]);
        let error = task.run(Arc::new(ConfigMap::new())).await.unwrap_err();

        assert!(error.to_string().contains("definitely-not-a-real-program-4242"));
        assert!(error.downcast_ref::<std::io::Error>().is_some());
    }
}
