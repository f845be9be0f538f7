//! Excel settings workbook as a configuration layer.
//!
//! A workbook holds a `Constants` sheet (`Constant Name`, `Constant Value`) and
//! one `<Environment> Settings` sheet per environment (`Setting Name`,
//! `Setting Value`). The `Environment` constant picks the settings sheet; without
//! one the provider's detected environment is used. Constants win over settings
//! of the same name, and blank cells never mask a lower layer.

use calamine::{open_workbook_auto, Data, Range, Reader};
use config::{ConfigError, Map, Source, Value, ValueKind};
use std::path::{Path, PathBuf};

use super::error::{ConfigResult, ConfigurationError};
use crate::constants::settings;

const CONSTANTS_SHEET: &str = "Constants";
const SETTINGS_SHEET_SUFFIX: &str = "Settings";
const CONSTANT_COLUMNS: (&str, &str) = ("Constant Name", "Constant Value");
const SETTING_COLUMNS: (&str, &str) = ("Setting Name", "Setting Value");
const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// `config` source reading a constants sheet plus one environment settings sheet
#[derive(Debug, Clone)]
pub struct WorkbookSource {
    path: PathBuf,
    environment: String,
}

impl WorkbookSource {
    /// `environment` selects the settings sheet when the workbook has no
    /// `Environment` constant
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, environment: S) -> Self {
        Self {
            path: path.into(),
            environment: environment.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `path` has a spreadsheet extension this source can open
    pub fn is_workbook(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                WORKBOOK_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
    }

    /// Merged `(name, value)` pairs: environment settings first, constants after
    pub fn read_settings(&self) -> ConfigResult<Vec<(String, ValueKind)>> {
        if !self.path.is_file() {
            return Err(ConfigurationError::file_not_found(&self.path));
        }

        let display = self.path.display().to_string();
        let invalid = |e: String| ConfigurationError::invalid_settings_sheet(&display, e);

        let mut workbook = open_workbook_auto(&self.path).map_err(|e| invalid(e.to_string()))?;
        let sheet_names = workbook.sheet_names();

        let constants_sheet = find_sheet(&sheet_names, CONSTANTS_SHEET)
            .ok_or_else(|| invalid(format!("no '{CONSTANTS_SHEET}' sheet in {sheet_names:?}")))?;
        let constants = workbook
            .worksheet_range(&constants_sheet)
            .map_err(|e| invalid(e.to_string()))?;
        let constants = named_cells(&constants, CONSTANT_COLUMNS).map_err(invalid)?;

        let environment = constants
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(settings::ENVIRONMENT))
            .map(|(_, cell)| cell.to_string().trim().to_string())
            .unwrap_or_else(|| self.environment.clone());

        let wanted = format!("{environment} {SETTINGS_SHEET_SUFFIX}");
        let settings_sheet = find_sheet(&sheet_names, &wanted)
            .ok_or_else(|| invalid(format!("no '{wanted}' sheet in {sheet_names:?}")))?;
        let environment_settings = workbook
            .worksheet_range(&settings_sheet)
            .map_err(|e| invalid(e.to_string()))?;
        let environment_settings =
            named_cells(&environment_settings, SETTING_COLUMNS).map_err(invalid)?;

        let mut merged: Vec<(String, ValueKind)> = Vec::new();
        for (name, cell) in environment_settings.into_iter().chain(constants) {
            merged.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
            merged.push((name, value_kind(cell)));
        }
        Ok(merged)
    }
}

impl Source for WorkbookSource {
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
            .map(|(name, kind)| (name, Value::new(Some(&origin), kind)))
            .collect())
    }
}

fn find_sheet(sheet_names: &[String], wanted: &str) -> Option<String> {
    sheet_names
        .iter()
        .find(|name| name.trim().eq_ignore_ascii_case(wanted))
        .cloned()
}

/// Rows under a `(name, value)` header pair with both cells filled
fn named_cells(range: &Range<Data>, columns: (&str, &str)) -> Result<Vec<(String, Data)>, String> {
    let mut rows = range.rows();
    let header = rows.next().unwrap_or(&[]);
    let column = |wanted: &str| {
        header
            .iter()
            .position(|cell| cell.to_string().trim().eq_ignore_ascii_case(wanted))
    };

    let (Some(name_idx), Some(value_idx)) = (column(columns.0), column(columns.1)) else {
        return Err(format!(
            "expected '{}' and '{}' columns",
            columns.0, columns.1
        ));
    };

    Ok(rows
        .filter_map(|row| {
            let name = row.get(name_idx)?.to_string().trim().to_string();
            let value = row.get(value_idx).filter(|cell| !is_blank(cell))?;
            (!name.is_empty()).then(|| (name, value.clone()))
        })
        .collect())
}

fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn value_kind(cell: Data) -> ValueKind {
    match cell {
        Data::Int(i) => ValueKind::I64(i),
        Data::Float(f) => ValueKind::Float(f),
        Data::Bool(b) => ValueKind::Boolean(b),
        Data::String(s) => ValueKind::String(s.trim().to_string()),
        other => ValueKind::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use tempfile::TempDir;

    type Rows<'a> = Vec<(&'a str, Option<&'a str>)>;

    /// Workbook with string cells; `None` leaves the value cell blank
    fn write_workbook(path: &Path, sheets: Vec<(&str, (&str, &str), Rows<'_>)>) {
        let mut workbook = Workbook::new();
        for (sheet_name, (name_header, value_header), rows) in &sheets {
            let sheet = workbook.add_worksheet();
            sheet.set_name(*sheet_name).unwrap();
            sheet.write_string(0, 0, *name_header).unwrap();
            sheet.write_string(0, 1, *value_header).unwrap();
            for (row, (name, value)) in rows.iter().enumerate() {
                let row = row as u32 + 1;
                sheet.write_string(row, 0, *name).unwrap();
                if let Some(value) = value {
                    sheet.write_string(row, 1, *value).unwrap();
                }
            }
        }
        workbook.save(path).unwrap();
    }

    fn lookup<'a>(settings: &'a [(String, ValueKind)], name: &str) -> Option<&'a ValueKind> {
        settings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    #[test]
    fn test_environment_constant_selects_settings_sheet() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.xlsx");
        write_workbook(
            &path,
            vec![
                (
                    "Constants",
                    CONSTANT_COLUMNS,
                    vec![
                        ("Environment", Some("Production")),
                        ("ScriptName", Some("invoice_sync")),
                        ("RetryDelay", Some("4")),
                        ("Unused", None),
                    ],
                ),
                (
                    "Development Settings",
                    SETTING_COLUMNS,
                    vec![("RetryNumber", Some("1"))],
                ),
                (
                    "Production Settings",
                    SETTING_COLUMNS,
                    vec![
                        ("RetryNumber", Some("6")),
                        ("RetryDelay", Some("9")),
                        ("LogFile", Some("  ")),
                    ],
                ),
            ],
        );

        let settings = WorkbookSource::new(&path, "development")
            .read_settings()
            .unwrap();

        assert_eq!(
            lookup(&settings, "RetryNumber"),
            Some(&ValueKind::String("6".to_string()))
        );
        // constants beat settings
        assert_eq!(
            lookup(&settings, "RetryDelay"),
            Some(&ValueKind::String("4".to_string()))
        );
        assert_eq!(
            lookup(&settings, "Environment"),
            Some(&ValueKind::String("Production".to_string()))
        );
        assert!(lookup(&settings, "Unused").is_none());
        assert!(lookup(&settings, "LogFile").is_none());
    }

    #[test]
    fn test_detected_environment_used_without_constant() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.xlsx");
        write_workbook(
            &path,
            vec![
                ("Constants", CONSTANT_COLUMNS, vec![("ScriptName", Some("report"))]),
                ("Staging Settings", SETTING_COLUMNS, vec![("RetryNumber", Some("2"))]),
            ],
        );

        let settings = WorkbookSource::new(&path, "staging").read_settings().unwrap();
        assert_eq!(
            lookup(&settings, "RetryNumber"),
            Some(&ValueKind::String("2".to_string()))
        );
        assert_eq!(
            lookup(&settings, "ScriptName"),
            Some(&ValueKind::String("report".to_string()))
        );
    }

    #[test]
    fn test_numeric_cells_keep_their_type() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.xlsx");
        let mut workbook = Workbook::new();
        let constants = workbook.add_worksheet();
        constants.set_name("Constants").unwrap();
        constants.write_string(0, 0, "Constant Name").unwrap();
        constants.write_string(0, 1, "Constant Value").unwrap();
        constants.write_string(1, 0, "RetryDelay").unwrap();
        constants.write_number(1, 1, 2.5).unwrap();
        constants.write_string(2, 0, "logging_colors").unwrap();
        constants.write_boolean(2, 1, false).unwrap();
        let settings_sheet = workbook.add_worksheet();
        settings_sheet.set_name("Test Settings").unwrap();
        settings_sheet.write_string(0, 0, "Setting Name").unwrap();
        settings_sheet.write_string(0, 1, "Setting Value").unwrap();
        workbook.save(&path).unwrap();

        let settings = WorkbookSource::new(&path, "test").read_settings().unwrap();
        assert_eq!(lookup(&settings, "RetryDelay"), Some(&ValueKind::Float(2.5)));
        assert_eq!(
            lookup(&settings, "logging_colors"),
            Some(&ValueKind::Boolean(false))
        );
    }

    #[test]
    fn test_missing_environment_sheet_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.xlsx");
        write_workbook(
            &path,
            vec![("Constants", CONSTANT_COLUMNS, vec![("Environment", Some("QA"))])],
        );

        let error = WorkbookSource::new(&path, "development")
            .read_settings()
            .unwrap_err();
        assert_eq!(error.kind(), "InvalidSettingsSheet");
        assert!(error.to_string().contains("QA Settings"));
    }

    #[test]
    fn test_missing_workbook_is_not_found() {
        let dir = TempDir::new().unwrap();
        let error = WorkbookSource::new(dir.path().join("nope.xlsx"), "development")
            .read_settings()
            .unwrap_err();
        assert!(error.is_not_found());
    }

    #[test]
    fn test_workbook_extensions() {
        assert!(WorkbookSource::is_workbook(Path::new("Config/settings.xlsx")));
        assert!(WorkbookSource::is_workbook(Path::new("settings.XLSX")));
        assert!(!WorkbookSource::is_workbook(Path::new("settings.csv")));
        assert!(!WorkbookSource::is_workbook(Path::new("settings")));
    }
}
