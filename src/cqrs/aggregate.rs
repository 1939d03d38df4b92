//! Write-side aggregate state, folded from one aggregate's history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event_store::{EventStore, EventStoreError, EventStoreResult};
use crate::types::{Event, EventPayload};

/// Everything command validation needs to know about one aggregate
///
/// One shape serves every aggregate kind; fields that do not apply to
/// a given aggregate stay at their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    /// Number of events folded in, across snapshots
    pub version: u64,
    /// Scene aggregates: created and not deleted since
    pub exists: bool,
    pub current_scene: Option<String>,
    pub stream_active: bool,
    pub stream_started_at: Option<DateTime<Utc>>,
    pub recording_active: bool,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub output_path: Option<String>,
    pub volume: Option<f64>,
    pub muted: Option<bool>,
    pub trigger_count: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl AggregateState {
    pub fn apply(&mut self, event: &Event) {
        self.version += 1;
        self.last_event_at = Some(event.timestamp());

        match &event.payload {
            EventPayload::SceneCreated(_) => self.exists = true,
            EventPayload::SceneDeleted(_) => self.exists = false,
            EventPayload::SceneSwitched(data) => self.current_scene = Some(data.to_scene.clone()),
            EventPayload::StreamStarted(_) => {
                self.stream_active = true;
                self.stream_started_at = Some(event.timestamp());
            }
            EventPayload::StreamStopped(_) => {
                self.stream_active = false;
                self.stream_started_at = None;
            }
            EventPayload::RecordingStarted(data) => {
                self.recording_active = true;
                self.recording_started_at = Some(event.timestamp());
                self.output_path = data.output_path.clone();
            }
            EventPayload::RecordingStopped(_) => {
                self.recording_active = false;
                self.recording_started_at = None;
            }
            EventPayload::SourceCreated(_) => self.exists = true,
            EventPayload::SourceVolumeChanged(data) => self.volume = Some(data.new_volume),
            EventPayload::InputMuteChanged(data) => self.muted = Some(data.muted),
            EventPayload::AutomationRuleCreated(_) => self.exists = true,
            EventPayload::AutomationRuleTriggered(_) => self.trigger_count += 1,
            _ => {}
        }
    }

    /// Current state of `aggregate_id`, starting from its latest snapshot
    ///
    /// Returns the state and the sequence of the last event folded in.
    pub fn load(store: &EventStore, aggregate_id: &str) -> EventStoreResult<(Self, u64)> {
        store.rebuild_aggregate(aggregate_id, Self::default(), |state, event| state.apply(event))
    }

    /// State of `aggregate_id` as of `at` (inclusive)
    pub fn at(store: &EventStore, aggregate_id: &str, at: DateTime<Utc>) -> (Self, u64) {
        let mut state = Self::default();
        let mut last_sequence = 0;
        for event in store.load_aggregate(aggregate_id) {
            if event.timestamp() > at {
                continue;
            }
            state.apply(&event);
            last_sequence = event.sequence;
        }
        (state, last_sequence)
    }
}

/// Save a snapshot of `aggregate_id` once `frequency` events have
/// accumulated since the previous one
///
/// Returns whether a snapshot was written.
pub fn snapshot_if_due(
    store: &EventStore,
    aggregate_id: &str,
    frequency: u64,
) -> EventStoreResult<bool> {
    if frequency == 0 {
        return Ok(false);
    }

    let snapshot_version = store
        .load_latest_snapshot(aggregate_id)
        .and_then(|s| s.state.get("version").and_then(|v| v.as_u64()))
        .unwrap_or(0);

    let (state, last_sequence) = AggregateState::load(store, aggregate_id)?;
    if state.version < snapshot_version + frequency {
        return Ok(false);
    }

    match store.save_snapshot(aggregate_id, &state, last_sequence) {
        Ok(_) => Ok(true),
        Err(EventStoreError::SnapshotExists { .. }) => {
            debug!(aggregate_id, last_sequence, "snapshot already taken");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
