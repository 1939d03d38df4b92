//! Snapshot Manager for Event Sourcing
//!
//! Snapshots are point-in-time captures of one aggregate's state, so a
//! rebuild only replays the events after them. Each aggregate gets one
//! JSONL file under `snapshots/` holding all of its snapshots; the file is
//! rewritten atomically on every save.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::utils::atomic_write_with;

use super::store::{EventStoreError, EventStoreResult};

/// Captured state of one aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: String,
    /// Sequence of the last event folded into `state`
    pub at_sequence: u64,
    pub taken_at: DateTime<Utc>,
    pub state: Value,
}

/// Snapshot Manager handles creating and loading snapshots
pub struct SnapshotManager {
    dir: Option<PathBuf>,
    /// Snapshots per aggregate, ascending by `at_sequence`
    cache: RwLock<HashMap<String, Vec<Snapshot>>>,
}

/// File name for an aggregate id
///
/// Bytes outside `[A-Za-z0-9_.-]` are escaped as `%XX` so distinct ids
/// never share a file.
fn file_name(aggregate_id: &str) -> String {
    let mut name = String::with_capacity(aggregate_id.len() + 6);
    for byte in aggregate_id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' => name.push(byte as char),
            other => name.push_str(&format!("%{:02X}", other)),
        }
    }
    name.push_str(".jsonl");
    name
}

impl SnapshotManager {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load every snapshot file under `dir`
    ///
    /// Unreadable lines are logged and skipped; the events they covered are
    /// still in the log.
    pub fn open<P: AsRef<Path>>(dir: P) -> EventStoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut cache: HashMap<String, Vec<Snapshot>> = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "jsonl").unwrap_or(true) {
                continue;
            }

            let reader = BufReader::new(File::open(&path)?);
            for (line_num, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Snapshot>(&line) {
                    Ok(snapshot) => cache
                        .entry(snapshot.aggregate_id.clone())
                        .or_default()
                        .push(snapshot),
                    Err(e) => warn!(
                        file = %path.display(),
                        line = line_num + 1,
                        error = %e,
                        "skipping unreadable snapshot"
                    ),
                }
            }
        }

        for snapshots in cache.values_mut() {
            snapshots.sort_by_key(|s| s.at_sequence);
            snapshots.dedup_by_key(|s| s.at_sequence);
        }

        Ok(Self {
            dir: Some(dir),
            cache: RwLock::new(cache),
        })
    }

    pub fn path_for(&self, aggregate_id: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(file_name(aggregate_id)))
    }

    /// Record a snapshot
    ///
    /// Each `(aggregate_id, at_sequence)` pair is written once.
    pub fn save(&self, aggregate_id: &str, state: Value, at_sequence: u64) -> EventStoreResult<Snapshot> {
        let mut cache = self.cache.write();
        let snapshots = cache.entry(aggregate_id.to_string()).or_default();

        if snapshots.iter().any(|s| s.at_sequence == at_sequence) {
            return Err(EventStoreError::SnapshotExists {
                aggregate_id: aggregate_id.to_string(),
                at_sequence,
            });
        }

        let snapshot = Snapshot {
            aggregate_id: aggregate_id.to_string(),
            at_sequence,
            taken_at: Utc::now(),
            state,
        };

        let mut updated = snapshots.clone();
        updated.push(snapshot.clone());
        updated.sort_by_key(|s| s.at_sequence);

        if let Some(path) = self.path_for(aggregate_id) {
            atomic_write_with(&path, |file| {
                for s in &updated {
                    let json = serde_json::to_string(s)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                    writeln!(file, "{}", json)?;
                }
                Ok(())
            })?;
        }

        *snapshots = updated;
        Ok(snapshot)
    }

    /// Latest snapshot for an aggregate
    pub fn latest(&self, aggregate_id: &str) -> Option<Snapshot> {
        self.cache
            .read()
            .get(aggregate_id)
            .and_then(|s| s.last().cloned())
    }

    /// All snapshots for an aggregate, ascending by sequence
    pub fn list(&self, aggregate_id: &str) -> Vec<Snapshot> {
        self.cache
            .read()
            .get(aggregate_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of snapshots across aggregates
    pub fn count(&self) -> usize {
        self.cache.read().values().map(Vec::len).sum()
    }
}
