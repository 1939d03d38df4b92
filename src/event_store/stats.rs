//! Event Store Statistics
//!
//! Counts by kind, aggregate totals, time range, and storage size.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Statistics about the Event Store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventStoreStats {
    pub total_events: usize,
    /// Event counts keyed by wire tag
    pub events_by_type: BTreeMap<String, usize>,
    pub aggregate_count: usize,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_sequence: u64,
    pub snapshot_count: usize,
    /// Size of events.jsonl in bytes (0 for in-memory stores)
    pub log_size_bytes: u64,
}

impl EventStoreStats {
    /// Format size in human-readable format
    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }

    /// Human-readable log size
    pub fn log_size(&self) -> String {
        Self::format_size(self.log_size_bytes)
    }

    /// The most frequent kind, ties broken by tag order
    pub fn busiest_kind(&self) -> Option<(&str, usize)> {
        self.events_by_type
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(k, v)| (k.as_str(), *v))
    }
}
