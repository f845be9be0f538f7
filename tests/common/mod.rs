//! Shared fixtures for harness integration tests
#![allow(dead_code)]

use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use automation_harness::config::{ConfigMap, ConfigProvider, ConfigResult, ConfigurationError};
use automation_harness::{FallbackSettings, RetryPolicy, RunContext, Task, TaskFn};

/// Settled configuration writing its outputs into `parent_dir`
pub fn run_config(parent_dir: &Path, retry_number: i64) -> ConfigMap {
    ConfigMap::from_entries([
        ("RetryNumber", json!(retry_number)),
        ("RetryDelay", json!(0)),
        ("LogFile", json!("RunLog.csv")),
        ("ErrorOutput", json!("ErrorOutput.txt")),
        ("ScriptName", json!("nightly_sync")),
        ("parent_dir", json!(parent_dir.display().to_string())),
        ("username", json!("operator")),
    ])
}

/// Task that fails until call number `succeed_on`; `None` never succeeds
pub fn flaky_task(succeed_on: Option<u32>) -> (Arc<dyn Task>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let task: Arc<dyn Task> = TaskFn::arc("flaky_task", move |_config: Arc<ConfigMap>| {
        let counter = Arc::clone(&counter);
        async move {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            match succeed_on {
                Some(n) if call >= n => Ok(true),
                _ => Err(anyhow::anyhow!("upstream unavailable on call {call}")),
            }
        }
    });
    (task, calls)
}

/// Provider whose every load fails
pub struct FailingProvider {
    pub calls: AtomicU32,
    pub parent_dir: PathBuf,
}

impl FailingProvider {
    pub fn new(parent_dir: &Path) -> Self {
        Self {
            calls: AtomicU32::new(0),
            parent_dir: parent_dir.to_path_buf(),
        }
    }
}

impl ConfigProvider for FailingProvider {
    fn load(&self) -> ConfigResult<Option<ConfigMap>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ConfigurationError::missing_required_field(
            "LogFile",
            "run configuration",
        ))
    }

    fn fallback_settings(&self) -> FallbackSettings {
        FallbackSettings::new(&self.parent_dir).with_username("operator")
    }
}

/// Provider that reports "no configuration" without failing
pub struct EmptyProvider {
    pub parent_dir: PathBuf,
}

impl ConfigProvider for EmptyProvider {
    fn load(&self) -> ConfigResult<Option<ConfigMap>> {
        Ok(None)
    }

    fn fallback_settings(&self) -> FallbackSettings {
        FallbackSettings::new(&self.parent_dir).with_username("operator")
    }
}

/// Context with no delay between attempts before configuration loads
pub fn context(provider: Arc<dyn ConfigProvider>, task: Arc<dyn Task>) -> RunContext {
    RunContext::builder(provider, task)
        .retry_policy(RetryPolicy::new(3, Duration::ZERO))
        .build()
}

/// Data rows of a run log, header excluded
pub fn run_log_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|record| record.unwrap().iter().map(str::to_string).collect())
        .collect()
}

pub fn header_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .unwrap()
        .matches("Script Name,Date/Time Run,Username,Successful?")
        .count()
}
