//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and, once the run's
//! configuration is known, to a JSON log file under `<work_dir>/<log_path>`.
//!
//! The console layer is installed up front so configuration loading is itself
//! logged. The file layer sits behind a reload handle and is attached by
//! [`LoggingHandle::attach_file_log`] after the first successful load.

use chrono::Utc;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, writer::MakeWriterExt},
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::ConfigMap;
use crate::constants::{discovery, files, settings};
use crate::error::{HarnessError, HarnessResult};

type FileLayer = Box<dyn Layer<Registry> + Send + Sync>;

static LOGGING: OnceLock<LoggingHandle> = OnceLock::new();

/// Open file log; dropping the guard flushes pending records
struct FileLog {
    path: PathBuf,
    _guard: WorkerGuard,
}

/// Console logging options
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub environment: String,
    /// Overrides the environment's default level
    pub level: Option<Level>,
    pub ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            environment: get_environment(),
            level: None,
            ansi: std::io::stdout().is_terminal(),
        }
    }
}

impl LoggingOptions {
    /// Apply `Environment` and `logging_colors` from a settled configuration
    pub fn with_config(mut self, config: &ConfigMap) -> Self {
        if let Some(environment) = config.get_str(settings::ENVIRONMENT) {
            self.environment = environment.to_lowercase();
        }
        if let Ok(Some(colors)) = config.get_bool(settings::LOGGING_COLORS) {
            self.ansi = colors;
        }
        self
    }

    fn level(&self) -> Level {
        self.level.unwrap_or_else(|| get_log_level(&self.environment))
    }
}

/// Handle for attaching the file layer after configuration loads
///
/// Clones share the attached file log. Call [`LoggingHandle::shutdown`] before
/// the process exits so buffered records reach the file.
#[derive(Clone)]
pub struct LoggingHandle {
    file_layer: reload::Handle<Option<FileLayer>, Registry>,
    file_log: Arc<Mutex<Option<FileLog>>>,
    environment: String,
    level: Level,
}

impl std::fmt::Debug for LoggingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingHandle")
            .field("environment", &self.environment)
            .field("level", &self.level)
            .finish()
    }
}

/// Initialize console logging; later calls return the first handle
pub fn init_structured_logging(options: &LoggingOptions) -> LoggingHandle {
    LOGGING
        .get_or_init(|| {
            let level = options.level();
            let (file_layer, file_handle) = reload::Layer::new(None::<FileLayer>);

            let console_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

            let subscriber = tracing_subscriber::registry().with(file_layer).with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(options.ansi)
                    .with_filter(console_filter),
            );

            // An existing global subscriber (e.g. from a test harness) is kept
            if subscriber.try_init().is_err() {
                tracing::debug!(
                    "Global tracing subscriber already initialized - continuing with existing subscriber"
                );
            }

            tracing::debug!(
                pid = process::id(),
                environment = %options.environment,
                level = %level,
                "STRUCTURED LOGGING: console output initialized"
            );

            LoggingHandle {
                file_layer: file_handle,
                file_log: Arc::new(Mutex::new(None)),
                environment: options.environment.clone(),
                level,
            }
        })
        .clone()
}

impl LoggingHandle {
    /// Start writing JSON records to `<work_dir>/<log_path>/<env>.<pid>.<timestamp>.log`
    ///
    /// The log folder is created if missing. Only the first call attaches a file;
    /// later calls return the path already in use.
    pub fn attach_file_log(&self, config: &ConfigMap) -> HarnessResult<PathBuf> {
        let mut file_log = self
            .file_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = file_log.as_ref() {
            return Ok(existing.path.clone());
        }

        let work_dir = config
            .get_path(settings::WORK_DIR)
            .map(Ok)
            .unwrap_or_else(std::env::current_dir)?;
        let log_dir = work_dir.join(
            config
                .get_str(settings::LOG_PATH)
                .unwrap_or_else(|| files::DEFAULT_LOG_DIR.to_string()),
        );
        fs::create_dir_all(&log_dir)?;

        let environment = config
            .get_str(settings::ENVIRONMENT)
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| self.environment.clone());
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("{}.{}.{}.log", environment, process::id(), timestamp);
        let log_path = log_dir.join(&log_filename);

        let (file_writer, guard) =
            tracing_appender::non_blocking(file_appender(&log_dir, &log_filename)?);

        let layer: FileLayer = fmt::layer()
            .with_writer(file_writer.with_max_level(self.level))
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .json()
            .boxed();

        self.file_layer
            .reload(Some(layer))
            .map_err(HarnessError::logging)?;

        *file_log = Some(FileLog {
            path: log_path.clone(),
            _guard: guard,
        });

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = %log_path.display(),
            "STRUCTURED LOGGING: file output attached"
        );

        Ok(log_path)
    }

    /// Path of the attached file log, if any
    pub fn file_log_path(&self) -> Option<PathBuf> {
        self.file_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|log| log.path.clone())
    }

    /// Detach the file layer and flush everything buffered for it
    pub fn shutdown(&self) {
        let detached = self
            .file_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(file_log) = detached {
            tracing::debug!(log_file = %file_log.path.display(), "STRUCTURED LOGGING: closing file output");
            if let Err(e) = self.file_layer.reload(None::<FileLayer>) {
                tracing::warn!("Failed to detach file log layer: {}", e);
            }
            drop(file_log);
        }
    }
}

/// Non-rotating appender for one log file; creation failures are returned
fn file_appender(log_dir: &Path, log_filename: &str) -> HarnessResult<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(log_filename)
        .build(log_dir)
        .map_err(HarnessError::logging)
}

/// Current environment from `HARNESS_ENV`, defaulting to development
pub fn get_environment() -> String {
    std::env::var(discovery::ENVIRONMENT_VAR)
        .unwrap_or_else(|_| discovery::DEFAULT_ENVIRONMENT.to_string())
        .to_lowercase()
}

/// Log level based on environment
fn get_log_level(environment: &str) -> Level {
    match environment {
        "production" => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Log a state machine transition for one run
pub fn log_run_transition(
    run_id: &str,
    from_state: Option<&str>,
    to_state: &str,
    error_signaled: bool,
) {
    tracing::info!(
        run_id = %run_id,
        from_state = from_state,
        to_state = %to_state,
        error_signaled = error_signaled,
        timestamp = %Utc::now().to_rfc3339(),
        "RUN_TRANSITION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
