//! CSV settings sheet as a configuration layer.
//!
//! Operators often keep per-script knobs in a two-column spreadsheet exported as
//! CSV (`Setting,value`). This source feeds those rows into the config builder
//! like any other layer. Rows with an empty value are skipped so a blank cell
//! never masks a lower layer.

use config::{ConfigError, Map, Source, Value, ValueKind};
use std::path::{Path, PathBuf};

use super::error::{ConfigResult, ConfigurationError};

const NAME_COLUMNS: [&str; 2] = ["setting", "setting name"];
const VALUE_COLUMNS: [&str; 2] = ["value", "setting value"];

/// `config` source reading a `Setting,value` CSV file
#[derive(Debug, Clone)]
pub struct SettingsSheetSource {
    path: PathBuf,
}

impl SettingsSheetSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the sheet into `(setting, value)` pairs in file order
    pub fn read_settings(&self) -> ConfigResult<Vec<(String, String)>> {
        if !self.path.is_file() {
            return Err(ConfigurationError::file_not_found(&self.path));
        }

        let display = self.path.display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| ConfigurationError::invalid_settings_sheet(&display, e))?;

        let headers = reader
            .headers()
            .map_err(|e| ConfigurationError::invalid_settings_sheet(&display, e))?
            .clone();
        let column = |candidates: &[&str]| {
            headers
                .iter()
                .position(|h| candidates.iter().any(|c| h.eq_ignore_ascii_case(c)))
        };

        let (Some(name_idx), Some(value_idx)) = (column(&NAME_COLUMNS), column(&VALUE_COLUMNS))
        else {
            return Err(ConfigurationError::invalid_settings_sheet(
                &display,
                format!("expected 'Setting' and 'value' columns, found {headers:?}"),
            ));
        };

        let mut settings = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| ConfigurationError::invalid_settings_sheet(&display, e))?;
            let name = record.get(name_idx).unwrap_or_default();
            let value = record.get(value_idx).unwrap_or_default();
            if name.is_empty() || value.is_empty() {
                continue;
            }
            settings.push((name.to_string(), value.to_string()));
        }

        Ok(settings)
    }
}

impl Source for SettingsSheetSource {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let origin = self.path.display().to_string();
        let settings = self
            .read_settings()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(settings
            .into_iter()
            .map(|(name, value)| (name, Value::new(Some(&origin), ValueKind::String(value))))
            .collect())
    }
}
