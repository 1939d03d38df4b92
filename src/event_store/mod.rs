//! Event Store Module for Event Sourcing
//!
//! - `EventStore`: append-only log with in-memory indices and subscribers
//! - `SnapshotManager`: per-aggregate state snapshots
//! - `EventStoreStats`: counts and sizes
//! - `export_events`: JSON, JSONL, and CSV output
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌─────────┐    ┌─────────────┐    ┌──────────────┐    ┌─────────────┐
//! │ command │───►│ append to   │───►│ index in     │───►│ notify      │
//! │ / ingest│    │ events.jsonl│    │ memory       │    │ subscribers │
//! └─────────┘    └─────────────┘    └──────────────┘    └─────────────┘
//!
//! Rebuild Path:
//! ┌────────────────────────┐    ┌──────────────────────┐
//! │ latest snapshot        │───►│ replay aggregate     │───► state
//! │ snapshots/<agg>.jsonl  │    │ events after it      │
//! └────────────────────────┘    └──────────────────────┘
//! ```

mod export;
mod snapshot;
mod stats;
mod store;

pub use export::{export_events, ExportFormat, CSV_COLUMNS};
pub use snapshot::{Snapshot, SnapshotManager};
pub use stats::EventStoreStats;
pub use store::{
    EventFilter, EventStore, EventStoreConfig, EventStoreError, EventStoreResult, Subscriber,
    SubscriptionId,
};
