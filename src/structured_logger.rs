//! Structured JSONL debug log of a case.
//!
//! This module provides machine-parseable logging with:
//! - Monotonic sequence numbers for ordering, continued across restarts
//! - ISO 8601 timestamps with microsecond precision
//! - Case and run IDs for correlation
//! - Structured event data in JSON format
//!
//! Each actor start is a new run. Reopening an existing log picks up its last
//! sequence number and run id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::errors::CaseError;
use crate::domain::{CaseCommand, CaseEvent};

pub struct StructuredLogger {
    case_id: String,
    run_id: u64,
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log entry in JSONL format.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number (unique across the whole log)
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds
    pub ts: String,
    pub case_id: String,
    /// Run ID (increments every time the case actor starts)
    pub run_id: u64,
    /// Component that emitted the log
    pub component: String,
    pub event: Value,
}

impl StructuredLogger {
    /// Opens (or creates) the log at `log_path` and starts a new run.
    pub fn new(case_id: &str, log_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let (last_seq, last_run) = last_entry(log_path);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            case_id: case_id.to_string(),
            run_id: last_run + 1,
            seq: AtomicU64::new(last_seq),
            log_file: Mutex::new(file),
            log_path: log_path.to_path_buf(),
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event as a single line. Write failures are dropped.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            case_id: self.case_id.clone(),
            run_id: self.run_id,
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    pub fn log_command(&self, command: &CaseCommand) {
        self.log(
            "Case",
            serde_json::json!({
                "type": "CaseCommand",
                "name": command.name(),
                "command": command
            }),
        );
    }

    pub fn log_command_result(&self, name: &str, result: &Result<usize, CaseError>) {
        let event = match result {
            Ok(events) => serde_json::json!({
                "type": "CommandAccepted",
                "name": name,
                "events": events
            }),
            Err(err) => serde_json::json!({
                "type": "CommandRejected",
                "name": name,
                "error": err.to_string()
            }),
        };
        self.log("Case", event);
    }

    pub fn log_event(&self, sequence: u64, event: &CaseEvent) {
        self.log(
            "Case",
            serde_json::json!({
                "type": "CaseEvent",
                "sequence": sequence,
                "event": event
            }),
        );
    }

    pub fn log_timer_fired(&self, plan_item: &str, moment: &str) {
        self.log(
            "Timer",
            serde_json::json!({
                "type": "TimerFired",
                "plan_item": plan_item,
                "moment": moment
            }),
        );
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }
}

/// Sequence and run id of the last readable entry, `(0, 0)` for a new log.
fn last_entry(path: &Path) -> (u64, u64) {
    let Ok(file) = File::open(path) else {
        return (0, 0);
    };
    let mut last = (0, 0);
    for line in BufReader::new(file).lines().map_while(Result::ok) {
        match serde_json::from_str::<LogEntry>(&line) {
            Ok(entry) => last = (entry.seq, entry.run_id),
            Err(e) => tracing::warn!("Skipping malformed debug log line: {}", e),
        }
    }
    last
}

#[cfg(test)]
#[path = "tests/structured_logger_tests.rs"]
mod tests;
