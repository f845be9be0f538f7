//! Configuration Loader
//!
//! Layered configuration loading for harness runs. Layers, lowest precedence first:
//!
//! 1. injected defaults (`work_dir`, `parent_dir`, `username`, output file names, retry knobs)
//! 2. base file `<config_dir>/harness.{toml,yaml,yml,json}` (required)
//! 3. environment file `<config_dir>/harness.<environment>.{toml,yaml,yml,json}` (optional)
//! 4. settings sheet named by `settings_path` (optional): CSV, or an Excel
//!    workbook of constants and `<Environment> Settings` sheets
//! 5. `HARNESS_*` environment variables
//! 6. caller overrides
//!
//! All keys are folded to lowercase before merging so `HARNESS_RETRYNUMBER`
//! overrides `RetryNumber` from a file.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, Map, Source, Value};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::settings_sheet::SettingsSheetSource;
use super::workbook::WorkbookSource;
use super::{resolve_operator, ConfigMap, ConfigProvider, FallbackSettings};
use crate::constants::{discovery, files, retry, settings};

/// Production [`ConfigProvider`] layering files, a settings sheet, environment
/// variables, and caller overrides
#[derive(Debug, Clone)]
pub struct LayeredConfigProvider {
    work_dir: PathBuf,
    config_dir: PathBuf,
    environment: Option<String>,
    env_prefix: String,
    env_vars: Option<HashMap<String, String>>,
    overrides: Vec<(String, String)>,
}

impl LayeredConfigProvider {
    pub fn builder() -> LayeredConfigProviderBuilder {
        LayeredConfigProviderBuilder::default()
    }

    /// Directory the harness treats as its root
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Base directory for the run log and error output
    pub fn parent_dir(&self) -> &Path {
        self.work_dir.parent().unwrap_or(&self.work_dir)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Environment whose override file is applied
    ///
    /// Explicit setting, then an `Environment` override, then `HARNESS_ENV`,
    /// then the base file's `Environment` setting, then `development`.
    pub fn detect_environment(&self, base_file: &Path) -> ConfigResult<String> {
        if let Some(environment) = &self.environment {
            return Ok(environment.to_lowercase());
        }

        let environment_key = fold_key(settings::ENVIRONMENT);
        let overridden = self
            .overrides
            .iter()
            .rev()
            .find(|(key, value)| {
                fold_key(key) == environment_key && !value.trim().is_empty()
            });
        if let Some((_, environment)) = overridden {
            return Ok(environment.trim().to_lowercase());
        }

        if let Some(environment) = self.env_var(discovery::ENVIRONMENT_VAR) {
            return Ok(environment.to_lowercase());
        }

        let base = Config::builder()
            .add_source(CaseFolded(File::from(base_file)))
            .build()?;
        let from_file = base
            .get_string(&settings::ENVIRONMENT.to_lowercase())
            .ok()
            .filter(|e| !e.trim().is_empty());

        Ok(from_file
            .unwrap_or_else(|| discovery::DEFAULT_ENVIRONMENT.to_string())
            .to_lowercase())
    }

    fn env_var(&self, name: &str) -> Option<String> {
        let value = match &self.env_vars {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// Prefixed variables, minus the environment selector itself
    fn environment_source(&self) -> Environment {
        let mut vars: Map<String, String> = match &self.env_vars {
            Some(vars) => vars.clone().into_iter().collect(),
            None => std::env::vars_os()
                .filter_map(|(key, value)| {
                    Some((key.into_string().ok()?, value.into_string().ok()?))
                })
                .collect(),
        };
        vars.retain(|key, _| !key.eq_ignore_ascii_case(discovery::ENVIRONMENT_VAR));

        Environment::with_prefix(&self.env_prefix)
            .prefix_separator("_")
            .source(Some(vars))
    }

    /// Assemble the builder for every layer except the settings sheet when
    /// `sheet` is `None`
    fn layered_builder(
        &self,
        base_file: &Path,
        environment_file: Option<&Path>,
        sheet: Option<SettingsLayer>,
    ) -> ConfigResult<ConfigBuilder<DefaultState>> {
        let mut builder = Config::builder()
            .set_default(
                fold_key(settings::WORK_DIR),
                self.work_dir.display().to_string(),
            )?
            .set_default(
                fold_key(settings::PARENT_DIR),
                self.parent_dir().display().to_string(),
            )?
            .set_default(fold_key(settings::USERNAME), resolve_operator())?
            .set_default(fold_key(settings::LOG_FILE), files::DEFAULT_RUN_LOG)?
            .set_default(fold_key(settings::ERROR_OUTPUT), files::DEFAULT_ERROR_OUTPUT)?
            .set_default(fold_key(settings::LOG_PATH), files::DEFAULT_LOG_DIR)?
            .set_default(
                fold_key(settings::RETRY_NUMBER),
                i64::from(retry::DEFAULT_MAX_ATTEMPTS),
            )?
            .set_default(
                fold_key(settings::RETRY_DELAY),
                retry::DEFAULT_DELAY.as_secs_f64(),
            )?
            .add_source(CaseFolded(File::from(base_file)));

        if let Some(environment_file) = environment_file {
            builder = builder.add_source(CaseFolded(File::from(environment_file)));
        }

        builder = match sheet {
            Some(SettingsLayer::Sheet(sheet)) => builder.add_source(CaseFolded(sheet)),
            Some(SettingsLayer::Workbook(workbook)) => builder.add_source(CaseFolded(workbook)),
            None => builder,
        };

        builder = builder.add_source(CaseFolded(self.environment_source()));

        for (key, value) in &self.overrides {
            builder = builder.set_override(fold_key(key), value.as_str())?;
        }

        Ok(builder)
    }

    fn settle(builder: ConfigBuilder<DefaultState>) -> ConfigResult<ConfigMap> {
        let values: HashMap<String, serde_json::Value> = builder.build()?.try_deserialize()?;
        Ok(ConfigMap::from_entries(values))
    }

    /// Mask settings whose names suggest credentials before they reach a log
    pub fn sanitize_for_logging(config: &ConfigMap) -> serde_json::Value {
        let sensitive_patterns = ["password", "secret", "token", "credential", "apikey", "api_key"];

        let masked = config
            .iter()
            .map(|(key, value)| {
                let is_sensitive = sensitive_patterns.iter().any(|p| key.contains(p));
                let value = if is_sensitive {
                    serde_json::Value::String("[MASKED]".to_string())
                } else {
                    value.clone()
                };
                (key.to_string(), value)
            })
            .collect();

        serde_json::Value::Object(masked)
    }
}

impl ConfigProvider for LayeredConfigProvider {
    fn load(&self) -> ConfigResult<Option<ConfigMap>> {
        let base_file = find_config_file(&self.config_dir, discovery::BASE_CONFIG_STEM)
            .ok_or_else(|| {
                ConfigurationError::config_file_not_found(candidate_paths(
                    &self.config_dir,
                    discovery::BASE_CONFIG_STEM,
                ))
            })?;
        debug!("Found configuration file: {}", base_file.display());

        let environment = self.detect_environment(&base_file)?;
        let environment_file = find_config_file(
            &self.config_dir,
            &format!("{}.{environment}", discovery::BASE_CONFIG_STEM),
        );
        if let Some(path) = &environment_file {
            debug!(
                "Applying environment-specific overrides for '{}' from {}",
                environment,
                path.display()
            );
        }

        let first_pass = Self::settle(self.layered_builder(
            &base_file,
            environment_file.as_deref(),
            None,
        )?)?;

        let config = match first_pass.get_path(settings::SETTINGS_PATH) {
            Some(sheet_path) => {
                let sheet_path = if sheet_path.is_absolute() {
                    sheet_path
                } else {
                    self.work_dir.join(sheet_path)
                };
                if !sheet_path.is_file() {
                    return Err(ConfigurationError::file_not_found(sheet_path));
                }
                debug!("Layering settings sheet: {}", sheet_path.display());
                Self::settle(self.layered_builder(
                    &base_file,
                    environment_file.as_deref(),
                    Some(SettingsLayer::for_path(sheet_path, &environment)),
                )?)?
            }
            None => first_pass,
        };

        config.validate()?;

        debug!(
            "Configuration loaded: {}",
            serde_json::to_string_pretty(&Self::sanitize_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            work_dir = %self.work_dir.display(),
            settings = config.len(),
            "Configuration loaded successfully"
        );

        Ok(Some(config))
    }

    fn fallback_settings(&self) -> FallbackSettings {
        FallbackSettings::for_work_dir(&self.work_dir)
    }
}

/// Builder for [`LayeredConfigProvider`]
#[derive(Debug, Clone, Default)]
pub struct LayeredConfigProviderBuilder {
    root: Option<PathBuf>,
    root_marker: Option<String>,
    config_dir: Option<PathBuf>,
    environment: Option<String>,
    env_prefix: Option<String>,
    env_vars: Option<HashMap<String, String>>,
    overrides: Vec<(String, String)>,
    raw_overrides: Vec<String>,
}

impl LayeredConfigProviderBuilder {
    /// Use this directory as `work_dir` instead of discovering it
    pub fn root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Directory name that marks the harness root during discovery
    pub fn root_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.root_marker = Some(marker.into());
        self
    }

    /// Configuration directory; relative paths resolve against `work_dir`
    pub fn config_dir<P: Into<PathBuf>>(mut self, config_dir: P) -> Self {
        self.config_dir = Some(config_dir.into());
        self
    }

    pub fn environment<S: Into<String>>(mut self, environment: S) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Read variables from this map instead of the process environment
    pub fn environment_variables(mut self, vars: HashMap<String, String>) -> Self {
        self.env_vars = Some(vars);
        self
    }

    pub fn override_setting<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Add `KEY=VALUE` overrides; malformed pairs fail at [`build`](Self::build)
    pub fn overrides<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_overrides.extend(pairs.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> ConfigResult<LayeredConfigProvider> {
        let marker = self
            .root_marker
            .unwrap_or_else(|| discovery::DEFAULT_ROOT_MARKER.to_string());

        let work_dir = match self.root {
            Some(root) => root,
            None => {
                let cwd = std::env::current_dir()
                    .map_err(|e| ConfigurationError::file_read_error("current_dir", e))?;
                discover_work_dir(&cwd, &marker)
            }
        };

        let config_dir = self
            .config_dir
            .unwrap_or_else(|| PathBuf::from(discovery::DEFAULT_CONFIG_DIR));
        let config_dir = if config_dir.is_absolute() {
            config_dir
        } else {
            work_dir.join(config_dir)
        };

        let mut overrides = self.overrides;
        for raw in self.raw_overrides {
            overrides.push(parse_override(&raw)?);
        }

        Ok(LayeredConfigProvider {
            work_dir,
            config_dir,
            environment: self.environment,
            env_prefix: self
                .env_prefix
                .unwrap_or_else(|| discovery::ENV_PREFIX.to_string()),
            env_vars: self.env_vars,
            overrides,
        })
    }
}

/// Walk `start` from the filesystem root down to the first component named like
/// `marker` (case-insensitive); without a match `start` itself is the root
pub fn discover_work_dir(start: &Path, marker: &str) -> PathBuf {
    let mut current = PathBuf::new();
    for component in start.components() {
        current.push(component.as_os_str());
        if let Component::Normal(name) = component {
            if name.to_string_lossy().eq_ignore_ascii_case(marker) {
                return current;
            }
        }
    }
    start.to_path_buf()
}

/// Split a `KEY=VALUE` override
pub fn parse_override(raw: &str) -> ConfigResult<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConfigurationError::invalid_override(raw)),
    }
}

fn candidate_paths(config_dir: &Path, stem: &str) -> Vec<PathBuf> {
    discovery::CONFIG_EXTENSIONS
        .iter()
        .map(|ext| config_dir.join(format!("{stem}.{ext}")))
        .collect()
}

fn find_config_file(config_dir: &Path, stem: &str) -> Option<PathBuf> {
    candidate_paths(config_dir, stem)
        .into_iter()
        .find(|path| path.is_file())
}

/// Tabular settings layered between the files and the environment
enum SettingsLayer {
    Sheet(SettingsSheetSource),
    Workbook(WorkbookSource),
}

impl SettingsLayer {
    fn for_path(path: PathBuf, environment: &str) -> Self {
        if WorkbookSource::is_workbook(&path) {
            Self::Workbook(WorkbookSource::new(path, environment))
        } else {
            Self::Sheet(SettingsSheetSource::new(path))
        }
    }
}

fn fold_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Lowercases the top-level keys a source produces
#[derive(Debug, Clone)]
struct CaseFolded<S>(S);

impl<S> Source for CaseFolded<S>
where
    S: Source + Clone + Send + Sync + 'static,
{
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        Ok(self
            .0
            .collect()?
            .into_iter()
            .map(|(key, value)| (fold_key(&key), value))
            .collect())
    }
}
