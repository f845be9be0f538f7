use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::Path;

/// Details of the failure that escalated a run
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Local>,
    pub kind: String,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: &str, message: &str) -> Self {
        Self {
            timestamp: Local::now(),
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }

    /// `timestamp`, `kind` and `message`, one per line
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n{}",
            self.timestamp.to_rfc3339(),
            self.kind,
            self.message
        )
    }
}

/// Writes the error output file, replacing any previous contents
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorOutputWriter;

impl ErrorOutputWriter {
    pub fn write(&self, path: &Path, record: &ErrorRecord) -> io::Result<()> {
        fs::write(path, record.render())
    }
}
