//! Configuration Error Types
//!
//! Error handling for configuration discovery, layering, and validation.
//! Each variant carries enough context to point the operator at the file or
//! setting that needs fixing.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Configuration file not found at expected locations
    #[error("Configuration file not found. Searched paths: {searched_paths:?}")]
    ConfigFileNotFound { searched_paths: Vec<PathBuf> },

    /// A file named by another setting does not exist
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Layering or parsing failure reported by the config builder
    #[error("Failed to load configuration: {error}")]
    LoadError { error: String },

    /// Invalid settings sheet or workbook
    #[error("Invalid settings sheet '{file_path}': {error}")]
    InvalidSettingsSheet { file_path: String, error: String },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Caller override not in `KEY=VALUE` form
    #[error("Invalid override '{raw}': expected KEY=VALUE")]
    InvalidOverride { raw: String },

    /// File I/O errors during configuration loading
    #[error("Failed to read configuration file '{file_path}': {error}")]
    FileReadError { file_path: String, error: String },
}

impl ConfigurationError {
    /// Create a configuration file not found error
    pub fn config_file_not_found(searched_paths: Vec<PathBuf>) -> Self {
        Self::ConfigFileNotFound { searched_paths }
    }

    /// Create a file not found error
    pub fn file_not_found<P: Into<PathBuf>>(path: P) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a loader error
    pub fn load_error<E: std::fmt::Display>(error: E) -> Self {
        Self::LoadError {
            error: error.to_string(),
        }
    }

    /// Create an invalid settings sheet error
    pub fn invalid_settings_sheet<P: Into<String>, E: std::fmt::Display>(
        file_path: P,
        error: E,
    ) -> Self {
        Self::InvalidSettingsSheet {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    /// Create a missing required field error
    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    /// Create an invalid override error
    pub fn invalid_override<R: Into<String>>(raw: R) -> Self {
        Self::InvalidOverride { raw: raw.into() }
    }

    /// Create a file read error
    pub fn file_read_error<P: Into<String>, E: std::fmt::Display>(file_path: P, error: E) -> Self {
        Self::FileReadError {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    /// Variant name, used as the error kind in error output files
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigFileNotFound { .. } => "ConfigFileNotFound",
            Self::FileNotFound { .. } => "FileNotFound",
            Self::LoadError { .. } => "LoadError",
            Self::InvalidSettingsSheet { .. } => "InvalidSettingsSheet",
            Self::MissingRequiredField { .. } => "MissingRequiredField",
            Self::InvalidValue { .. } => "InvalidValue",
            Self::InvalidOverride { .. } => "InvalidOverride",
            Self::FileReadError { .. } => "FileReadError",
        }
    }

    /// Whether the error means something on disk is missing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConfigFileNotFound { .. } | Self::FileNotFound { .. }
        )
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        Self::load_error(error)
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
