//! Event export in JSON, JSONL, and CSV

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::{Event, EventRecord};

use super::store::{EventStoreError, EventStoreResult};

/// Output format for `export_events`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// `{export_time, event_count, events: [...]}`, pretty-printed
    #[default]
    Json,
    /// One record per line
    Jsonl,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "jsonl" | "ndjson" => Ok(ExportFormat::Jsonl),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(EventStoreError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
        };
        f.write_str(name)
    }
}

pub const CSV_COLUMNS: [&str; 8] = [
    "timestamp",
    "event_type",
    "aggregate_id",
    "event_id",
    "sequence",
    "correlation_id",
    "causation_id",
    "data",
];

/// Render events in the requested format
pub fn export_events(events: &[Event], format: ExportFormat) -> EventStoreResult<String> {
    match format {
        ExportFormat::Json => {
            let records: Vec<EventRecord> = events.iter().map(Event::to_record).collect();
            let document = json!({
                "export_time": Utc::now(),
                "event_count": records.len(),
                "events": records,
            });
            Ok(serde_json::to_string_pretty(&document)?)
        }
        ExportFormat::Jsonl => {
            let mut out = String::new();
            for event in events {
                out.push_str(&event.to_json_line()?);
                out.push('\n');
            }
            Ok(out)
        }
        ExportFormat::Csv => export_csv(events),
    }
}

fn export_csv(events: &[Event]) -> EventStoreResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS)?;

    for event in events {
        let data = serde_json::to_string(&event.payload)?;
        writer.write_record([
            event.timestamp().to_rfc3339(),
            event.event_type().to_string(),
            event.aggregate_id.clone(),
            event.id().to_string(),
            event.sequence.to_string(),
            event.correlation_id().map(|c| c.to_string()).unwrap_or_default(),
            event.causation_id().map(|c| c.to_string()).unwrap_or_default(),
            data,
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| EventStoreError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| EventStoreError::InvalidEvent(e.to_string()))
}
