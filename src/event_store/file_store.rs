//! File-based event store implementation.
//!
//! Stores case events as JSONL (one JSON object per line) with support for:
//! - Optimistic concurrency via file locking
//! - Snapshots for faster aggregate loading
//! - Atomic snapshot writes via temp file + rename
//!
//! Sequences of one aggregate must be contiguous starting at 1. A gap or a
//! repeated sequence means the log was damaged and loading fails.

use crate::domain::errors::CaseError;
use crate::domain::types::TimestampUtc;
use crate::domain::{CaseAggregate, CaseEvent};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use cqrs_es::{
    Aggregate, AggregateContext, AggregateError, DomainEvent, EventEnvelope, EventStore,
};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A stored event record in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub aggregate_id: String,
    pub sequence: u64,
    pub recorded_at: TimestampUtc,
    pub event_type: String,
    pub event_version: String,
    pub event: CaseEvent,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A stored snapshot for faster aggregate loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub aggregate_id: String,
    pub sequence: u64,
    pub snapshot_at: TimestampUtc,
    pub state: CaseAggregate,
}

/// File-based event store configuration.
#[derive(Debug, Clone)]
pub struct FileEventStore {
    /// Path to the JSONL event log file.
    pub log_path: PathBuf,
    /// Path to the JSON snapshot file.
    pub snapshot_path: PathBuf,
    /// Snapshot after every N events (0 = disabled).
    pub snapshot_every: u64,
}

/// Aggregate context for file-based storage.
pub struct FileAggregateContext<A: Aggregate> {
    pub aggregate_id: String,
    pub aggregate: A,
    /// Sequence of the last applied event.
    pub current_sequence: u64,
}

impl<A: Aggregate> AggregateContext<A> for FileAggregateContext<A> {
    fn aggregate(&self) -> &A {
        &self.aggregate
    }
}

type StoreError = AggregateError<CaseError>;

fn unexpected(e: impl std::error::Error + Send + Sync + 'static) -> StoreError {
    AggregateError::UnexpectedError(Box::new(e))
}

fn invalid_data(message: String) -> StoreError {
    unexpected(std::io::Error::new(ErrorKind::InvalidData, message))
}

impl FileEventStore {
    pub fn new(log_path: PathBuf, snapshot_path: PathBuf, snapshot_every: u64) -> Self {
        Self {
            log_path,
            snapshot_path,
            snapshot_every,
        }
    }
}

#[async_trait]
impl EventStore<CaseAggregate> for FileEventStore {
    type AC = FileAggregateContext<CaseAggregate>;

    async fn load_events(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<EventEnvelope<CaseAggregate>>, StoreError> {
        let file = match File::open(&self.log_path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unexpected(e)),
        };

        file.lock_shared().map_err(unexpected)?;

        let reader = BufReader::new(file);
        let mut envelopes: Vec<EventEnvelope<CaseAggregate>> = Vec::new();

        for line in reader.lines() {
            let line = line.map_err(unexpected)?;
            if line.trim().is_empty() {
                continue;
            }
            let stored: StoredEvent = serde_json::from_str(&line)
                .map_err(|e| AggregateError::DeserializationError(Box::new(e)))?;
            if stored.aggregate_id != aggregate_id {
                continue;
            }

            if stored.event_type != stored.event.event_type()
                || stored.event_version != stored.event.event_version()
            {
                return Err(invalid_data(format!(
                    "event {} of {}: version/type mismatch",
                    stored.sequence, aggregate_id
                )));
            }
            let expected = envelopes.len() as u64 + 1;
            if stored.sequence != expected {
                return Err(invalid_data(format!(
                    "event log of {} expected sequence {} but found {}",
                    aggregate_id, expected, stored.sequence
                )));
            }

            envelopes.push(EventEnvelope {
                aggregate_id: stored.aggregate_id,
                sequence: stored.sequence as usize,
                payload: stored.event,
                metadata: stored.metadata,
            });
        }

        Ok(envelopes)
    }

    async fn load_aggregate(&self, aggregate_id: &str) -> Result<Self::AC, StoreError> {
        let mut aggregate = CaseAggregate::default();
        let mut current_sequence = 0u64;

        if let Some(snapshot) = load_snapshot(&self.snapshot_path)? {
            if snapshot.aggregate_id == aggregate_id {
                aggregate = snapshot.state;
                current_sequence = snapshot.sequence;
            }
        }

        let events = self.load_events(aggregate_id).await?;
        let last = events.last().map(|e| e.sequence as u64).unwrap_or(0);
        if last < current_sequence {
            tracing::warn!(
                "Snapshot of {} is ahead of its log ({} > {}), replaying from scratch",
                aggregate_id,
                current_sequence,
                last
            );
            aggregate = CaseAggregate::default();
            current_sequence = 0;
        }
        for event in events {
            let seq = event.sequence as u64;
            if seq > current_sequence {
                current_sequence = seq;
                aggregate.apply(event.payload);
            }
        }

        Ok(FileAggregateContext {
            aggregate_id: aggregate_id.to_string(),
            aggregate,
            current_sequence,
        })
    }

    async fn commit(
        &self,
        events: Vec<CaseEvent>,
        context: Self::AC,
        metadata: HashMap<String, String>,
    ) -> Result<Vec<EventEnvelope<CaseAggregate>>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent).map_err(unexpected)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.log_path)
            .map_err(unexpected)?;

        file.lock_exclusive().map_err(unexpected)?;

        let FileAggregateContext {
            aggregate_id,
            mut aggregate,
            current_sequence,
        } = context;

        // Optimistic concurrency: somebody else appended since we loaded.
        let last_sequence = read_last_sequence(&file, &aggregate_id)?;
        if last_sequence != current_sequence {
            return Err(AggregateError::AggregateConflict);
        }

        let mut sequence = current_sequence;
        let mut envelopes: Vec<EventEnvelope<CaseAggregate>> = Vec::new();

        for event in events {
            sequence += 1;

            let record = StoredEvent {
                aggregate_id: aggregate_id.clone(),
                sequence,
                recorded_at: TimestampUtc(Utc::now()),
                event_type: event.event_type(),
                event_version: event.event_version(),
                event: event.clone(),
                metadata: metadata.clone(),
            };

            let line = serde_json::to_string(&record).map_err(unexpected)?;
            writeln!(file, "{}", line).map_err(unexpected)?;

            envelopes.push(EventEnvelope {
                aggregate_id: aggregate_id.clone(),
                sequence: sequence as usize,
                payload: event,
                metadata: metadata.clone(),
            });
        }

        file.flush().map_err(unexpected)?;
        file.sync_all().map_err(unexpected)?;

        for envelope in &envelopes {
            aggregate.apply(envelope.payload.clone());
        }

        if should_snapshot(sequence, self.snapshot_every) {
            tracing::debug!("Snapshotting {} at sequence {}", aggregate_id, sequence);
            let snapshot = StoredSnapshot {
                aggregate_id,
                sequence,
                snapshot_at: TimestampUtc(Utc::now()),
                state: aggregate,
            };
            save_snapshot(&self.snapshot_path, &snapshot)?;
        }

        Ok(envelopes)
    }
}

/// Reads every record of a log, optionally only those of one aggregate.
/// A missing file is an empty log.
pub fn read_log(path: &Path, aggregate_id: Option<&str>) -> anyhow::Result<Vec<StoredEvent>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open event log: {}", path.display()))
        }
    };
    file.lock_shared()
        .with_context(|| format!("Failed to lock event log: {}", path.display()))?;

    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let stored: StoredEvent = serde_json::from_str(&line)
            .with_context(|| format!("Malformed record on line {} of {}", number + 1, path.display()))?;
        if aggregate_id.is_none_or(|id| id == stored.aggregate_id) {
            records.push(stored);
        }
    }
    Ok(records)
}

fn load_snapshot(path: &Path) -> Result<Option<StoredSnapshot>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unexpected(e)),
    };

    let snapshot: StoredSnapshot = serde_json::from_str(&content)
        .map_err(|e| AggregateError::DeserializationError(Box::new(e)))?;

    Ok(Some(snapshot))
}

fn save_snapshot(path: &Path, snapshot: &StoredSnapshot) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(unexpected)?;
    }

    let content = serde_json::to_string(snapshot).map_err(unexpected)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content).map_err(unexpected)?;
    std::fs::rename(&tmp_path, path).map_err(unexpected)?;

    Ok(())
}

fn read_last_sequence(file: &File, aggregate_id: &str) -> Result<u64, StoreError> {
    let mut reader = BufReader::new(file.try_clone().map_err(unexpected)?);
    reader.seek(SeekFrom::Start(0)).map_err(unexpected)?;

    let mut last_sequence = 0u64;
    for line in reader.lines() {
        let line = line.map_err(unexpected)?;
        if line.trim().is_empty() {
            continue;
        }
        let stored: StoredEvent = serde_json::from_str(&line)
            .map_err(|e| AggregateError::DeserializationError(Box::new(e)))?;
        if stored.aggregate_id == aggregate_id {
            last_sequence = stored.sequence;
        }
    }

    Ok(last_sequence)
}

fn should_snapshot(sequence: u64, snapshot_every: u64) -> bool {
    if snapshot_every == 0 {
        return false;
    }
    sequence.is_multiple_of(snapshot_every)
}

#[cfg(test)]
#[path = "tests/file_store_tests.rs"]
mod tests;
