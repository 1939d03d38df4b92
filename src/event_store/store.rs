//! Event Store - Core event sourcing implementation
//!
//! The EventStore owns the append-only event log. Every appended event is
//! written as one JSON line and fsynced before it becomes visible, then
//! indexed in memory by aggregate, kind, id, correlation, and causation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{Event, EventType};
use crate::utils::{cleanup_temp_files, AtomicError};

use super::snapshot::{Snapshot, SnapshotManager};
use super::stats::EventStoreStats;

/// Configuration for the EventStore
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Path to the data directory
    pub data_dir: PathBuf,
}

impl EventStoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get path to events.jsonl
    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    /// Get path to snapshots directory
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

/// Result type for EventStore operations
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Errors that can occur in EventStore operations
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("store unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("snapshot corrupted: {0}")]
    SnapshotCorrupted(String),
    #[error("snapshot already exists for {aggregate_id} at sequence {at_sequence}")]
    SnapshotExists { aggregate_id: String, at_sequence: u64 },
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<AtomicError> for EventStoreError {
    fn from(e: AtomicError) -> Self {
        match e {
            AtomicError::Io(io) => EventStoreError::Io(io),
        }
    }
}

/// Criteria for `EventStore::query`
///
/// Every set field must match. `event_types` matches any of the listed
/// kinds; an empty list matches all kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub aggregate_id: Option<String>,
    pub event_types: Vec<EventType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub after_sequence: Option<u64>,
    pub correlation_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn kind(mut self, event_type: EventType) -> Self {
        self.event_types.push(event_type);
        self
    }

    pub fn kinds(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types.extend(event_types);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn after_sequence(mut self, sequence: u64) -> Self {
        self.after_sequence = Some(sequence);
        self
    }

    pub fn correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check a single event against the filter (ignores `limit`)
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(aggregate_id) = &self.aggregate_id {
            if &event.aggregate_id != aggregate_id {
                return false;
            }
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type()) {
            return false;
        }
        if let Some(since) = self.since {
            if event.timestamp() < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp() > until {
                return false;
            }
        }
        if let Some(after) = self.after_sequence {
            if event.sequence <= after {
                return false;
            }
        }
        if let Some(correlation_id) = self.correlation_id {
            if event.correlation_id() != Some(correlation_id) {
                return false;
            }
        }
        true
    }
}

/// Handle returned by `EventStore::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Callback invoked after each append
pub type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// Log plus in-memory indices, all positions into `events`
#[derive(Default)]
struct StoreInner {
    events: Vec<Event>,
    by_aggregate: HashMap<String, Vec<usize>>,
    by_type: HashMap<EventType, Vec<usize>>,
    by_id: HashMap<Uuid, usize>,
    by_correlation: HashMap<Uuid, Vec<usize>>,
    by_causation: HashMap<Uuid, Vec<usize>>,
}

impl StoreInner {
    fn last_sequence(&self) -> u64 {
        self.events.last().map(|e| e.sequence).unwrap_or(0)
    }

    fn index(&mut self, event: Event) {
        let pos = self.events.len();
        self.by_aggregate
            .entry(event.aggregate_id.clone())
            .or_default()
            .push(pos);
        self.by_type.entry(event.event_type()).or_default().push(pos);
        self.by_id.insert(event.id(), pos);
        if let Some(correlation_id) = event.correlation_id() {
            self.by_correlation.entry(correlation_id).or_default().push(pos);
        }
        if let Some(causation_id) = event.causation_id() {
            self.by_causation.entry(causation_id).or_default().push(pos);
        }
        self.events.push(event);
    }

    fn collect(&self, positions: &[usize]) -> Vec<Event> {
        positions.iter().map(|&p| self.events[p].clone()).collect()
    }
}

/// The EventStore manages the append-only event log
pub struct EventStore {
    config: Option<EventStoreConfig>,
    inner: RwLock<StoreInner>,
    /// Serializes append + subscriber notification
    append_lock: Mutex<()>,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
    snapshots: SnapshotManager,
}

impl EventStore {
    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            config: None,
            inner: RwLock::new(StoreInner::default()),
            append_lock: Mutex::new(()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            snapshots: SnapshotManager::in_memory(),
        }
    }

    /// Open (or create) a store under `config.data_dir`
    ///
    /// Replays `events.jsonl` into memory. Malformed lines are logged and
    /// skipped; leftover `.tmp` files from interrupted snapshot writes are
    /// removed.
    pub fn open(config: EventStoreConfig) -> EventStoreResult<Self> {
        std::fs::create_dir_all(config.data_dir())?;
        std::fs::create_dir_all(config.snapshots_dir())?;

        let cleaned = cleanup_temp_files(config.snapshots_dir())?;
        if cleaned > 0 {
            warn!(cleaned, "removed leftover snapshot temp files");
        }

        let mut inner = StoreInner::default();
        for event in Self::load_log(&config.events_path())? {
            let expected = inner.last_sequence() + 1;
            let event = if event.sequence >= expected {
                event
            } else {
                warn!(
                    event_id = %event.id(),
                    sequence = event.sequence,
                    expected,
                    "out-of-order sequence in log, renumbering"
                );
                event.with_sequence(expected)
            };
            if inner.by_id.contains_key(&event.id()) {
                warn!(event_id = %event.id(), "duplicate event id in log, skipping");
                continue;
            }
            inner.index(event);
        }

        let snapshots = SnapshotManager::open(config.snapshots_dir())?;

        info!(
            data_dir = %config.data_dir().display(),
            events = inner.events.len(),
            snapshots = snapshots.count(),
            "event store opened"
        );

        Ok(Self {
            config: Some(config),
            inner: RwLock::new(inner),
            append_lock: Mutex::new(()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            snapshots,
        })
    }

    fn load_log(path: &Path) -> EventStoreResult<Vec<Event>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match Event::from_json_line(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(line = line_num + 1, error = %e, "skipping malformed event line");
                }
            }
        }

        Ok(events)
    }

    /// Get the configuration (None for in-memory stores)
    pub fn config(&self) -> Option<&EventStoreConfig> {
        self.config.as_ref()
    }

    pub fn is_persistent(&self) -> bool {
        self.config.is_some()
    }

    /// Append an event to the log
    ///
    /// Assigns the next global sequence number, writes and fsyncs the
    /// record, indexes it, then notifies subscribers in order. Returns the
    /// stored event.
    pub fn append(&self, event: Event) -> EventStoreResult<Event> {
        let _guard = self.append_lock.lock();

        let event = {
            let inner = self.inner.read();
            if inner.by_id.contains_key(&event.id()) {
                return Err(EventStoreError::InvalidEvent(format!(
                    "duplicate event id {}",
                    event.id()
                )));
            }
            if event.aggregate_id.is_empty() {
                return Err(EventStoreError::InvalidEvent(
                    "aggregate_id must not be empty".to_string(),
                ));
            }
            event.with_sequence(inner.last_sequence() + 1)
        };

        if let Some(config) = &self.config {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(config.events_path())?;

            let json_line = event.to_json_line()?;
            writeln!(file, "{}", json_line)?;
            file.sync_all()?;
        }

        self.inner.write().index(event.clone());

        debug!(
            sequence = event.sequence,
            event_type = %event.event_type(),
            aggregate_id = %event.aggregate_id,
            "event appended"
        );

        let subscribers: Vec<Subscriber> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in subscribers {
            callback(&event);
        }

        Ok(event)
    }

    /// Append several events in order
    pub fn append_all(&self, events: impl IntoIterator<Item = Event>) -> EventStoreResult<Vec<Event>> {
        events.into_iter().map(|e| self.append(e)).collect()
    }

    /// Events matching the filter, ascending by sequence
    pub fn query(&self, filter: &EventFilter) -> Vec<Event> {
        let inner = self.inner.read();

        let candidates: Box<dyn Iterator<Item = &Event> + '_> =
            if let Some(aggregate_id) = &filter.aggregate_id {
                match inner.by_aggregate.get(aggregate_id) {
                    Some(positions) => Box::new(positions.iter().map(|&p| &inner.events[p])),
                    None => return Vec::new(),
                }
            } else if let Some(correlation_id) = &filter.correlation_id {
                match inner.by_correlation.get(correlation_id) {
                    Some(positions) => Box::new(positions.iter().map(|&p| &inner.events[p])),
                    None => return Vec::new(),
                }
            } else if let Some(after) = filter.after_sequence {
                let start = inner.events.partition_point(|e| e.sequence <= after);
                Box::new(inner.events[start..].iter())
            } else if filter.event_types.len() == 1 {
                match inner.by_type.get(&filter.event_types[0]) {
                    Some(positions) => Box::new(positions.iter().map(|&p| &inner.events[p])),
                    None => return Vec::new(),
                }
            } else {
                Box::new(inner.events.iter())
            };

        let matching = candidates.filter(|e| filter.matches(e)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Every event in the log
    pub fn all_events(&self) -> Vec<Event> {
        self.inner.read().events.clone()
    }

    /// All events of one aggregate, ascending by sequence
    pub fn load_aggregate(&self, aggregate_id: &str) -> Vec<Event> {
        let inner = self.inner.read();
        inner
            .by_aggregate
            .get(aggregate_id)
            .map(|positions| inner.collect(positions))
            .unwrap_or_default()
    }

    /// Number of events recorded for an aggregate
    pub fn aggregate_version(&self, aggregate_id: &str) -> u64 {
        self.inner
            .read()
            .by_aggregate
            .get(aggregate_id)
            .map(|p| p.len() as u64)
            .unwrap_or(0)
    }

    /// Known aggregate ids, sorted
    pub fn aggregate_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().by_aggregate.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, event_id: Uuid) -> Option<Event> {
        let inner = self.inner.read();
        inner.by_id.get(&event_id).map(|&p| inner.events[p].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_sequence(&self) -> u64 {
        self.inner.read().last_sequence()
    }

    /// Events with sequence greater than `sequence`
    pub fn events_after(&self, sequence: u64) -> Vec<Event> {
        let inner = self.inner.read();
        let start = inner.events.partition_point(|e| e.sequence <= sequence);
        inner.events[start..].to_vec()
    }

    /// All events sharing a correlation id
    pub fn correlation_chain(&self, correlation_id: Uuid) -> Vec<Event> {
        let inner = self.inner.read();
        inner
            .by_correlation
            .get(&correlation_id)
            .map(|positions| inner.collect(positions))
            .unwrap_or_default()
    }

    /// The event plus everything it caused, transitively
    ///
    /// Breadth-first over causation links with a visited set, so cycles in
    /// imported data cannot loop. Result is ascending by sequence; empty if
    /// the root is unknown.
    pub fn causation_chain(&self, event_id: Uuid) -> Vec<Event> {
        let inner = self.inner.read();
        let Some(&root) = inner.by_id.get(&event_id) else {
            return Vec::new();
        };

        let mut visited: HashSet<usize> = HashSet::new();
        let mut queue = VecDeque::from([root]);
        visited.insert(root);

        while let Some(pos) = queue.pop_front() {
            let id = inner.events[pos].id();
            if let Some(children) = inner.by_causation.get(&id) {
                for &child in children {
                    if visited.insert(child) {
                        queue.push_back(child);
                    }
                }
            }
        }

        let mut positions: Vec<usize> = visited.into_iter().collect();
        positions.sort_unstable();
        inner.collect(&positions)
    }

    /// Stream events in batches, yielding to the runtime between batches
    ///
    /// The matching events are captured when the stream is created.
    pub fn stream_events(
        &self,
        since: Option<DateTime<Utc>>,
        batch_size: usize,
    ) -> impl Stream<Item = Vec<Event>> + Send + 'static {
        let mut filter = EventFilter::new();
        filter.since = since;
        let events = self.query(&filter);
        let batch_size = batch_size.max(1);

        async_stream::stream! {
            for batch in events.chunks(batch_size) {
                yield batch.to_vec();
                tokio::task::yield_now().await;
            }
        }
    }

    /// Register a callback run synchronously after every append
    ///
    /// Callbacks see events in sequence order and must not append to this
    /// store themselves.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, Arc::new(callback)));
        debug!(subscription = id.0, "store subscriber added");
        id
    }

    /// Remove a subscriber; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Persist a snapshot of aggregate state as of `at_sequence`
    pub fn save_snapshot<S: Serialize>(
        &self,
        aggregate_id: &str,
        state: &S,
        at_sequence: u64,
    ) -> EventStoreResult<Snapshot> {
        let state = serde_json::to_value(state)?;
        let snapshot = self.snapshots.save(aggregate_id, state, at_sequence)?;
        info!(aggregate_id, at_sequence, "snapshot saved");
        Ok(snapshot)
    }

    pub fn load_latest_snapshot(&self, aggregate_id: &str) -> Option<Snapshot> {
        self.snapshots.latest(aggregate_id)
    }

    /// Rebuild aggregate state, starting from the latest snapshot if any
    ///
    /// Only events after the snapshot's sequence are replayed. Returns the
    /// state and the sequence of the last event folded in.
    pub fn rebuild_aggregate<S, F>(
        &self,
        aggregate_id: &str,
        initial: S,
        mut fold: F,
    ) -> EventStoreResult<(S, u64)>
    where
        S: DeserializeOwned,
        F: FnMut(&mut S, &Event),
    {
        let (mut state, mut last_sequence) = match self.snapshots.latest(aggregate_id) {
            Some(snapshot) => {
                let state = serde_json::from_value(snapshot.state).map_err(|e| {
                    EventStoreError::SnapshotCorrupted(format!("{}: {}", aggregate_id, e))
                })?;
                (state, snapshot.at_sequence)
            }
            None => (initial, 0),
        };

        let inner = self.inner.read();
        if let Some(positions) = inner.by_aggregate.get(aggregate_id) {
            for &pos in positions {
                let event = &inner.events[pos];
                if event.sequence > last_sequence {
                    fold(&mut state, event);
                    last_sequence = event.sequence;
                }
            }
        }

        Ok((state, last_sequence))
    }

    /// Collect statistics about the log and snapshots
    pub fn stats(&self) -> EventStoreResult<EventStoreStats> {
        let log_size_bytes = match &self.config {
            Some(config) if config.events_path().exists() => {
                std::fs::metadata(config.events_path())?.len()
            }
            _ => 0,
        };

        let inner = self.inner.read();
        let mut stats = EventStoreStats {
            total_events: inner.events.len(),
            aggregate_count: inner.by_aggregate.len(),
            first_event_at: inner.events.first().map(|e| e.timestamp()),
            last_event_at: inner.events.last().map(|e| e.timestamp()),
            last_sequence: inner.last_sequence(),
            snapshot_count: self.snapshots.count(),
            log_size_bytes,
            ..Default::default()
        };
        for (kind, positions) in &inner.by_type {
            stats
                .events_by_type
                .insert(kind.as_str().to_string(), positions.len());
        }

        Ok(stats)
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        scene_aggregate, EventPayload, SceneCreatedData, SceneSwitchedData, StreamStartedData,
        OBS_SYSTEM_AGGREGATE, STREAM_AGGREGATE,
    };
    use chrono::Duration;
    use futures::StreamExt;
    use serde_json::Map;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn switched(to: &str) -> Event {
        Event::new(
            OBS_SYSTEM_AGGREGATE,
            EventPayload::SceneSwitched(SceneSwitchedData {
                from_scene: "Unknown".to_string(),
                to_scene: to.to_string(),
                transition_type: None,
                transition_duration: None,
            }),
        )
    }

    fn created(name: &str) -> Event {
        Event::new(
            scene_aggregate(name),
            EventPayload::SceneCreated(SceneCreatedData {
                scene_name: name.to_string(),
                scene_settings: Map::new(),
            }),
        )
    }

    fn create_test_store() -> (EventStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = EventStore::open(EventStoreConfig::new(temp_dir.path())).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_append_assigns_sequence() {
        let store = EventStore::in_memory();

        let first = store.append(switched("A")).unwrap();
        let second = store.append(switched("B")).unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last_sequence(), 2);
    }

    #[test]
    fn test_duplicate_event_id_rejected() {
        let store = EventStore::in_memory();
        let event = switched("A");

        store.append(event.clone()).unwrap();
        let err = store.append(event).unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidEvent(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_persist_and_reopen() {
        let (store, temp_dir) = create_test_store();
        store.append(created("Main")).unwrap();
        store.append(switched("Main")).unwrap();
        drop(store);

        let reopened = EventStore::open(EventStoreConfig::new(temp_dir.path())).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.load_aggregate("scene:Main").len(), 1);

        let third = reopened.append(switched("Other")).unwrap();
        assert_eq!(third.sequence, 3);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (store, temp_dir) = create_test_store();
        store.append(switched("A")).unwrap();
        drop(store);

        let path = temp_dir.path().join("events.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file, "{}", switched("B").with_sequence(2).to_json_line().unwrap()).unwrap();

        let reopened = EventStore::open(EventStoreConfig::new(temp_dir.path())).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_query_by_type_and_time() {
        let store = EventStore::in_memory();
        let base = Utc::now() - Duration::hours(1);

        store.append(created("A").with_timestamp(base)).unwrap();
        store
            .append(switched("A").with_timestamp(base + Duration::minutes(10)))
            .unwrap();
        store
            .append(switched("B").with_timestamp(base + Duration::minutes(20)))
            .unwrap();

        let switches = store.query(&EventFilter::new().kind(EventType::SceneSwitched));
        assert_eq!(switches.len(), 2);

        let window = store.query(
            &EventFilter::new()
                .since(base + Duration::minutes(10))
                .until(base + Duration::minutes(10)),
        );
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].sequence, 2);

        let limited = store.query(&EventFilter::new().limit(2));
        assert_eq!(limited.len(), 2);
        assert!(limited[0].sequence < limited[1].sequence);
    }

    #[test]
    fn test_correlation_and_causation_chains() {
        let store = EventStore::in_memory();
        let correlation = Uuid::new_v4();

        let root = store.append(switched("A").with_correlation_id(correlation)).unwrap();
        let child = store
            .append(
                Event::new(STREAM_AGGREGATE, EventPayload::StreamStarted(StreamStartedData::default()))
                    .with_correlation_id(correlation)
                    .with_causation_id(root.id()),
            )
            .unwrap();
        let grandchild = store
            .append(switched("B").with_causation_id(child.id()))
            .unwrap();
        store.append(switched("C")).unwrap();

        assert_eq!(store.correlation_chain(correlation).len(), 2);

        let chain = store.causation_chain(root.id());
        let ids: Vec<Uuid> = chain.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![root.id(), child.id(), grandchild.id()]);

        assert!(store.causation_chain(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn test_subscribers_see_appends_in_order() {
        let store = EventStore::in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = store.subscribe(move |event| sink.lock().push(event.sequence));

        store.append(switched("A")).unwrap();
        store.append(switched("B")).unwrap();
        assert!(store.unsubscribe(id));
        store.append(switched("C")).unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
        assert!(!store.unsubscribe(id));
    }

    #[test]
    fn test_rebuild_aggregate_uses_snapshot() {
        let store = EventStore::in_memory();
        for scene in ["A", "B", "C"] {
            store.append(switched(scene)).unwrap();
        }
        store.save_snapshot(OBS_SYSTEM_AGGREGATE, &2u64, 2).unwrap();
        store.append(switched("D")).unwrap();

        let folded = AtomicUsize::new(0);
        let (count, last) = store
            .rebuild_aggregate(OBS_SYSTEM_AGGREGATE, 0u64, |count, _| {
                folded.fetch_add(1, Ordering::Relaxed);
                *count += 1;
            })
            .unwrap();

        // snapshot said 2, then events 3 and 4
        assert_eq!(count, 4);
        assert_eq!(last, 4);
        assert_eq!(folded.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_corrupted_snapshot_state() {
        let store = EventStore::in_memory();
        store.append(switched("A")).unwrap();
        store.save_snapshot(OBS_SYSTEM_AGGREGATE, &"not a number", 1).unwrap();

        let err = store
            .rebuild_aggregate(OBS_SYSTEM_AGGREGATE, 0u64, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, EventStoreError::SnapshotCorrupted(_)));
    }

    #[test]
    fn test_events_after() {
        let store = EventStore::in_memory();
        for scene in ["A", "B", "C", "D"] {
            store.append(switched(scene)).unwrap();
        }

        let after = store.events_after(2);
        assert_eq!(after.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 4]);
        assert!(store.events_after(10).is_empty());
    }

    #[tokio::test]
    async fn test_stream_events_in_batches() {
        let store = EventStore::in_memory();
        for i in 0..5 {
            store.append(switched(&format!("S{}", i))).unwrap();
        }

        let batches: Vec<Vec<Event>> = store.stream_events(None, 2).collect().await;
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_stats() {
        let (store, _temp_dir) = create_test_store();
        store.append(created("A")).unwrap();
        store.append(switched("A")).unwrap();
        store.append(switched("B")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.aggregate_count, 2);
        assert_eq!(stats.events_by_type.get("scene.switched"), Some(&2));
        assert_eq!(stats.last_sequence, 3);
        assert!(stats.log_size_bytes > 0);
    }
}
