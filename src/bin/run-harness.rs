//! # Run Harness
//!
//! Command-line entry point that wraps one automation task in a harness run:
//! layered configuration, retries, error output, and a run log row.
//!
//! Without a trailing command the placeholder task runs; with one
//! (`run-harness -- program args...`) the program is the task.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

use automation_harness::config::{ConfigMap, ConfigProvider, ConfigResult, FallbackSettings};
use automation_harness::constants::retry;
use automation_harness::{
    init_structured_logging, CommandTask, LayeredConfigProvider, LoggingHandle, LoggingOptions,
    PlaceholderTask, RetryPolicy, RunContext, Task,
};

#[derive(Parser)]
#[command(name = "run-harness")]
#[command(about = "Run an automation task with retries and a durable run log")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration directory (default: <root>/Config)
    #[arg(short, long)]
    config_dir: Option<String>,

    /// Harness root directory (default: discovered from the current directory)
    #[arg(short, long)]
    root: Option<String>,

    /// Environment whose override file is applied (development, production, ...)
    #[arg(short, long)]
    environment: Option<String>,

    /// Override a setting (KEY=VALUE); highest precedence, repeatable
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Attempts used before configuration loads
    #[arg(long, default_value_t = retry::DEFAULT_MAX_ATTEMPTS)]
    retry_number: u32,

    /// Seconds between attempts before configuration loads
    #[arg(long, default_value_t = retry::DEFAULT_DELAY.as_secs_f64())]
    retry_delay: f64,

    /// Name recorded for the task in logs and error output (default: the program)
    #[arg(long)]
    task_name: Option<String>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Program (and arguments) to run as the task
    #[arg(last = true)]
    command: Vec<String>,
}

/// Attaches the file log once a configuration has been loaded
struct FileLoggingProvider {
    inner: LayeredConfigProvider,
    logging: LoggingHandle,
}

impl ConfigProvider for FileLoggingProvider {
    fn load(&self) -> ConfigResult<Option<ConfigMap>> {
        let loaded = self.inner.load()?;
        if let Some(config) = &loaded {
            if let Err(e) = self.logging.attach_file_log(config) {
                warn!("Continuing without a log file: {}", e);
            }
        }
        Ok(loaded)
    }

    fn fallback_settings(&self) -> FallbackSettings {
        self.inner.fallback_settings()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => None,
        1 => Some(Level::INFO),
        2 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    };
    let mut options = LoggingOptions {
        level,
        ..LoggingOptions::default()
    };
    if let Some(environment) = &cli.environment {
        options.environment = environment.to_lowercase();
    }
    let logging = init_structured_logging(&options);

    let exit_code = match run(&cli, logging.clone()).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("Harness failed: {:#}", e);
            2
        }
    };

    logging.shutdown();
    ExitCode::from(exit_code)
}

async fn run(cli: &Cli, logging: LoggingHandle) -> anyhow::Result<bool> {
    let mut builder = LayeredConfigProvider::builder().overrides(cli.overrides.iter().cloned());
    if let Some(root) = &cli.root {
        builder = builder.root(root);
    }
    if let Some(config_dir) = &cli.config_dir {
        builder = builder.config_dir(config_dir);
    }
    if let Some(environment) = &cli.environment {
        builder = builder.environment(environment);
    }
    let provider = FileLoggingProvider {
        inner: builder.build()?,
        logging,
    };

    let task: Arc<dyn Task> = match cli.command.split_first() {
        Some((program, args)) => {
            let mut task = CommandTask::new(program.as_str(), args.iter().cloned());
            if let Some(name) = &cli.task_name {
                task = task.with_name(name);
            }
            Arc::new(task)
        }
        None => Arc::new(PlaceholderTask),
    };

    let delay = Duration::try_from_secs_f64(cli.retry_delay)
        .map_err(|e| anyhow::anyhow!("invalid --retry-delay {}: {}", cli.retry_delay, e))?;

    let mut context = RunContext::builder(Arc::new(provider), task)
        .retry_policy(RetryPolicy::new(cli.retry_number, delay))
        .build();
    let summary = context.start().await?;

    info!(
        run_id = %summary.run_id,
        script_name = %summary.script_name,
        success = summary.success,
        escalated = summary.escalated,
        run_log = %summary.run_log_path.display(),
        "Run complete"
    );
    if let Some(path) = &summary.error_output_path {
        warn!("Error details written to {}", path.display());
    }

    Ok(summary.success)
}
