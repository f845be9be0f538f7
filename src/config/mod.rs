//! # Harness Configuration
//!
//! Configuration is settled once, before any work runs, into an immutable
//! [`ConfigMap`]. The state machine only ever reads it.
//!
//! ## Architecture
//!
//! - **[`ConfigProvider`]**: anything that can produce a settled map. The production
//!   implementation is [`LayeredConfigProvider`], which layers file defaults, an
//!   environment override file, a CSV or Excel settings sheet, environment
//!   variables, and caller overrides.
//! - **[`ConfigMap`]**: case-insensitive, read-only view over the settled values,
//!   with coercing accessors for numbers supplied as strings.
//! - **[`RunSettings`]**: the output locations and operator identity the End and
//!   Error states need, resolved from a map or from [`FallbackSettings`] when
//!   configuration never loaded.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use automation_harness::config::{ConfigProvider, LayeredConfigProvider};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = LayeredConfigProvider::builder()
//!     .config_dir("Config")
//!     .override_setting("RetryNumber", "5")
//!     .build()?;
//!
//! if let Some(config) = provider.load()? {
//!     let retries = config.get_i64("RetryNumber")?;
//!     println!("retries: {retries:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;
pub mod settings_sheet;
pub mod workbook;

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants::{files, settings, UNKNOWN_OPERATOR, UNKNOWN_SCRIPT};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::{discover_work_dir, LayeredConfigProvider, LayeredConfigProviderBuilder};
pub use settings_sheet::SettingsSheetSource;
pub use workbook::WorkbookSource;

/// Produces the settled configuration for one run.
///
/// `Ok(None)` means the provider ran but produced no settings; the run ends as a
/// failure without escalating to the Error state.
pub trait ConfigProvider: Send + Sync {
    /// Resolve the configuration map
    fn load(&self) -> ConfigResult<Option<ConfigMap>>;

    /// Output locations used when no configuration map is available
    fn fallback_settings(&self) -> FallbackSettings {
        FallbackSettings::from_current_dir()
    }
}

/// Immutable, case-insensitive settings map for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigMap {
    values: BTreeMap<String, Value>,
}

impl ConfigMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from key/value pairs; keys are folded to lowercase
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let values = entries
            .into_iter()
            .map(|(key, value)| (fold_key(key.as_ref()), value.into()))
            .collect();
        Self { values }
    }

    /// Raw value for a setting
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&fold_key(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| !value.is_null())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(folded key, value)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Setting rendered as a string; empty strings count as unset
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    /// Integer setting, accepting numeric strings and whole floats
    pub fn get_i64(&self, key: &str) -> ConfigResult<Option<i64>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let invalid = || ConfigurationError::invalid_value(key, value.to_string(), "expected an integer");

        match value {
            Value::Null => Ok(None),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Some(i)),
                None => n
                    .as_f64()
                    .and_then(whole_float)
                    .map(Some)
                    .ok_or_else(invalid),
            },
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(whole_float))
                    .map(Some)
                    .ok_or_else(invalid)
            }
            _ => Err(invalid()),
        }
    }

    /// Floating-point setting, accepting numeric strings
    pub fn get_f64(&self, key: &str) -> ConfigResult<Option<f64>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let invalid = || ConfigurationError::invalid_value(key, value.to_string(), "expected a number");

        match value {
            Value::Null => Ok(None),
            Value::Number(n) => n.as_f64().map(Some).ok_or_else(invalid),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Some)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    /// Boolean setting; accepts `true/false`, `yes/no`, `1/0`, `on/off`
    pub fn get_bool(&self, key: &str) -> ConfigResult<Option<bool>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };

        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            Value::Number(n) => Ok(Some(n.as_f64().unwrap_or(0.0) != 0.0)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "" => Ok(None),
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(ConfigurationError::invalid_value(
                    key,
                    s.clone(),
                    "expected a boolean",
                )),
            },
            other => Err(ConfigurationError::invalid_value(
                key,
                other.to_string(),
                "expected a boolean",
            )),
        }
    }

    /// Check the settings the run lifecycle depends on
    pub fn validate(&self) -> ConfigResult<()> {
        for field in [
            settings::RETRY_NUMBER,
            settings::RETRY_DELAY,
            settings::LOG_FILE,
            settings::ERROR_OUTPUT,
            settings::PARENT_DIR,
            settings::USERNAME,
        ] {
            if !self.contains(field) {
                return Err(ConfigurationError::missing_required_field(
                    field,
                    "run configuration",
                ));
            }
        }

        match self.get_i64(settings::RETRY_NUMBER)? {
            Some(n) if n < 0 => {
                return Err(ConfigurationError::invalid_value(
                    settings::RETRY_NUMBER,
                    n.to_string(),
                    "must be a non-negative integer",
                ))
            }
            Some(n) if n > i64::from(u32::MAX) => {
                return Err(ConfigurationError::invalid_value(
                    settings::RETRY_NUMBER,
                    n.to_string(),
                    "exceeds maximum allowed value (u32::MAX)",
                ))
            }
            _ => {}
        }

        for field in [settings::RETRY_DELAY, settings::RETRY_MAX_DELAY] {
            if let Some(seconds) = self.get_f64(field)? {
                if seconds < 0.0 {
                    return Err(ConfigurationError::invalid_value(
                        field,
                        seconds.to_string(),
                        "must be a non-negative number of seconds",
                    ));
                }
            }
        }

        if let Some(multiplier) = self.get_f64(settings::RETRY_BACKOFF_MULTIPLIER)? {
            if multiplier < 1.0 {
                return Err(ConfigurationError::invalid_value(
                    settings::RETRY_BACKOFF_MULTIPLIER,
                    multiplier.to_string(),
                    "must be at least 1.0",
                ));
            }
        }

        Ok(())
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_entries(iter)
    }
}

/// A pre-built map is its own provider.
impl ConfigProvider for ConfigMap {
    fn load(&self) -> ConfigResult<Option<ConfigMap>> {
        Ok(Some(self.clone()))
    }

    fn fallback_settings(&self) -> FallbackSettings {
        match self.get_path(settings::PARENT_DIR) {
            Some(parent_dir) => FallbackSettings::new(parent_dir),
            None => FallbackSettings::from_current_dir(),
        }
    }
}

fn fold_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn whole_float(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

/// Output locations for runs that never produced a configuration map
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackSettings {
    pub parent_dir: PathBuf,
    pub run_log_file: PathBuf,
    pub error_output_file: PathBuf,
    pub username: String,
}

impl FallbackSettings {
    pub fn new<P: Into<PathBuf>>(parent_dir: P) -> Self {
        Self {
            parent_dir: parent_dir.into(),
            run_log_file: PathBuf::from(files::DEFAULT_RUN_LOG),
            error_output_file: PathBuf::from(files::DEFAULT_ERROR_OUTPUT),
            username: resolve_operator(),
        }
    }

    /// Fallback rooted at the parent of a discovered working directory
    pub fn for_work_dir(work_dir: &Path) -> Self {
        Self::new(work_dir.parent().unwrap_or(work_dir))
    }

    pub fn from_current_dir() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let work_dir = discover_work_dir(&cwd, crate::constants::discovery::DEFAULT_ROOT_MARKER);
        Self::for_work_dir(&work_dir)
    }

    pub fn with_username<S: Into<String>>(mut self, username: S) -> Self {
        self.username = username.into();
        self
    }
}

/// Output locations and identity for the End and Error states
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub script_name: String,
    pub parent_dir: PathBuf,
    pub run_log_path: PathBuf,
    pub error_output_path: PathBuf,
    pub username: String,
}

impl RunSettings {
    /// Resolve from the attached map, falling back setting by setting
    pub fn resolve(config: Option<&ConfigMap>, fallback: &FallbackSettings) -> Self {
        let lookup = |key: &str| config.and_then(|c| c.get_str(key));

        let parent_dir = lookup(settings::PARENT_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| fallback.parent_dir.clone());
        let run_log_file = lookup(settings::LOG_FILE)
            .map(PathBuf::from)
            .unwrap_or_else(|| fallback.run_log_file.clone());
        let error_output_file = lookup(settings::ERROR_OUTPUT)
            .map(PathBuf::from)
            .unwrap_or_else(|| fallback.error_output_file.clone());

        let script_name = lookup(settings::SCRIPT_NAME)
            .or_else(|| {
                parent_dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| UNKNOWN_SCRIPT.to_string());

        Self {
            script_name,
            run_log_path: parent_dir.join(run_log_file),
            error_output_path: parent_dir.join(error_output_file),
            username: lookup(settings::USERNAME).unwrap_or_else(|| fallback.username.clone()),
            parent_dir,
        }
    }
}

/// Operator identity from the login environment
pub fn resolve_operator() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| UNKNOWN_OPERATOR.to_string())
}
