//! File log lifecycle; runs in its own process so it owns the global subscriber

use serde_json::json;
use std::fs;
use tempfile::TempDir;
use tracing::Level;

use automation_harness::config::ConfigMap;
use automation_harness::{init_structured_logging, LoggingOptions};

#[test]
fn test_shutdown_flushes_file_log() {
    let dir = TempDir::new().unwrap();
    let config = ConfigMap::from_entries([
        ("work_dir", json!(dir.path().display().to_string())),
        ("log_path", json!("Log")),
        ("Environment", json!("Test")),
    ]);

    let logging = init_structured_logging(&LoggingOptions {
        environment: "test".to_string(),
        level: Some(Level::DEBUG),
        ansi: false,
    });
    let log_path = logging.attach_file_log(&config).unwrap();
    assert_eq!(logging.attach_file_log(&config).unwrap(), log_path);
    assert!(log_path.starts_with(dir.path().join("Log")));
    assert!(log_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("test."));

    for n in 0..200 {
        tracing::info!(record = n, "Run log record appended");
    }
    tracing::info!("Run finished");
    logging.shutdown();

    assert!(logging.file_log_path().is_none());
    let contents = fs::read_to_string(&log_path).unwrap();
    let appended = contents
        .lines()
        .filter(|line| line.contains("Run log record appended"))
        .count();
    assert_eq!(appended, 200);
    assert!(contents.contains("Run finished"));
    assert!(contents
        .lines()
        .last()
        .unwrap()
        .contains("closing file output"));
}
