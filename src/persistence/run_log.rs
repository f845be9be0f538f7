use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

use crate::constants::files::RUN_LOG_HEADER;

/// One row of the run log
#[derive(Debug, Clone, PartialEq)]
pub struct RunLogRecord {
    pub script_name: String,
    pub timestamp: DateTime<Local>,
    pub username: String,
    pub success: bool,
}

impl RunLogRecord {
    /// Record stamped with the current local time
    pub fn new(script_name: &str, username: &str, success: bool) -> Self {
        Self {
            script_name: script_name.to_string(),
            timestamp: Local::now(),
            username: username.to_string(),
            success,
        }
    }

    pub fn to_row(&self) -> [String; 4] {
        [
            self.script_name.clone(),
            self.timestamp.to_rfc3339(),
            self.username.clone(),
            if self.success { "True" } else { "False" }.to_string(),
        ]
    }
}

/// Appends [`RunLogRecord`]s to a CSV file
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLogger;

impl RunLogger {
    /// Append one record, writing the header first when the file is missing or empty
    pub fn append(&self, path: &Path, record: &RunLogRecord) -> io::Result<()> {
        let needs_header = match fs::metadata(path) {
            Ok(metadata) => metadata.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(e),
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Necessary)
            .terminator(csv::Terminator::CRLF)
            .from_writer(file);

        if needs_header {
            writer.write_record(RUN_LOG_HEADER)?;
        }
        writer.write_record(record.to_row())?;
        writer.flush()
    }
}
