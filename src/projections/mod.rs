//! Projections: read models folded from the event stream
//!
//! A projection is a name, an initial state, and a fold. The builder applies
//! each event, in store order, to every projection interested in its kind,
//! and remembers the last sequence it saw so no stored event is folded
//! twice. Rebuilding from the full history and updating live produce the
//! same state and version.

mod builtin;

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::event_store::{EventStore, SubscriptionId};
use crate::types::{Event, EventType};

pub use builtin::{
    AudioProjection, AudioState, AutomationProjection, AutomationState, ExecutionRecord,
    InputAudio, PerformanceProjection, PerformanceState, RuleStats, SceneProjection, SceneState,
    StreamRecord, StreamingProjection, StreamingState, AUDIO, AUTOMATION, PERFORMANCE, SCENES,
    STREAMING,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("projection already registered: {0}")]
    AlreadyRegistered(String),
    #[error("projection not found: {0}")]
    NotFound(String),
}

/// A read model folded from events
pub trait Projection: Send + Sync + 'static {
    type State: Clone + Serialize + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn initial_state(&self) -> Self::State;

    /// Kinds this projection folds; empty means every kind
    fn interested_in(&self) -> &[EventType] {
        &[]
    }

    fn apply(&self, state: &mut Self::State, event: &Event);
}

/// Projection built from a closure, see `ProjectionBuilder::register_fn`
pub struct FoldProjection<S, F> {
    name: String,
    initial: S,
    fold: F,
    interested: Vec<EventType>,
}

impl<S, F> Projection for FoldProjection<S, F>
where
    S: Clone + Serialize + Send + Sync + 'static,
    F: Fn(S, &Event) -> S + Send + Sync + 'static,
{
    type State = S;

    fn name(&self) -> &str {
        &self.name
    }

    fn initial_state(&self) -> S {
        self.initial.clone()
    }

    fn interested_in(&self) -> &[EventType] {
        &self.interested
    }

    fn apply(&self, state: &mut S, event: &Event) {
        *state = (self.fold)(state.clone(), event);
    }
}

/// Bookkeeping kept next to each projection's state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectionMeta {
    /// Number of events folded
    pub version: u64,
    pub last_event_id: Option<Uuid>,
    pub last_event_timestamp: Option<DateTime<Utc>>,
    /// Highest store sequence seen
    pub last_sequence: u64,
}

/// Snapshot of a projection for callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionState {
    pub projection_name: String,
    #[serde(flatten)]
    pub meta: ProjectionMeta,
    pub data: Value,
}

trait ErasedSlot: Send + Sync {
    fn apply(&mut self, event: &Event);
    fn reset(&mut self);
    fn meta(&self) -> &ProjectionMeta;
    fn state_value(&self) -> Value;
    fn state_any(&self) -> &dyn Any;
}

struct Slot<P: Projection> {
    projection: P,
    state: P::State,
    meta: ProjectionMeta,
}

impl<P: Projection> ErasedSlot for Slot<P> {
    fn apply(&mut self, event: &Event) {
        if event.sequence > 0 {
            if event.sequence <= self.meta.last_sequence {
                return;
            }
            self.meta.last_sequence = event.sequence;
        }

        let interested = self.projection.interested_in();
        if !interested.is_empty() && !interested.contains(&event.event_type()) {
            return;
        }

        self.projection.apply(&mut self.state, event);
        self.meta.version += 1;
        self.meta.last_event_id = Some(event.id());
        self.meta.last_event_timestamp = Some(event.timestamp());
    }

    fn reset(&mut self) {
        self.state = self.projection.initial_state();
        self.meta = ProjectionMeta::default();
    }

    fn meta(&self) -> &ProjectionMeta {
        &self.meta
    }

    fn state_value(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }

    fn state_any(&self) -> &dyn Any {
        &self.state
    }
}

/// Walk a dotted path (`rules.r1.trigger_count`, `stream_history.0`)
///
/// An empty path returns the whole value.
pub fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone());
    }

    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Registry of projections kept in step with the event stream
#[derive(Default)]
pub struct ProjectionBuilder {
    slots: RwLock<BTreeMap<String, Box<dyn ErasedSlot>>>,
}

impl ProjectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder with the scenes, streaming, automation, performance, and
    /// audio read models registered
    pub fn with_builtins() -> Self {
        let builder = Self::new();
        builder.insert(SceneProjection);
        builder.insert(StreamingProjection);
        builder.insert(AutomationProjection);
        builder.insert(PerformanceProjection);
        builder.insert(AudioProjection);
        builder
    }

    fn insert<P: Projection>(&self, projection: P) {
        let name = projection.name().to_string();
        let state = projection.initial_state();
        self.slots.write().insert(
            name.clone(),
            Box::new(Slot {
                projection,
                state,
                meta: ProjectionMeta::default(),
            }),
        );
        debug!(projection = %name, "registered projection");
    }

    pub fn register<P: Projection>(&self, projection: P) -> Result<(), ProjectionError> {
        if self.contains(projection.name()) {
            return Err(ProjectionError::AlreadyRegistered(projection.name().to_string()));
        }
        self.insert(projection);
        Ok(())
    }

    /// Register a projection from an initial state and a fold function
    pub fn register_fn<S, F>(
        &self,
        name: impl Into<String>,
        initial_state: S,
        fold: F,
        interested_event_types: Vec<EventType>,
    ) -> Result<(), ProjectionError>
    where
        S: Clone + Serialize + Send + Sync + 'static,
        F: Fn(S, &Event) -> S + Send + Sync + 'static,
    {
        self.register(FoldProjection {
            name: name.into(),
            initial: initial_state,
            fold,
            interested: interested_event_types,
        })
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.slots.write().remove(name).is_some()
    }

    /// Fold one event into every interested projection
    pub fn apply(&self, event: &Event) {
        for slot in self.slots.write().values_mut() {
            slot.apply(event);
        }
    }

    /// Reset one projection and fold `events` into it from scratch
    pub fn rebuild(&self, name: &str, events: &[Event]) -> Result<(), ProjectionError> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(name)
            .ok_or_else(|| ProjectionError::NotFound(name.to_string()))?;

        slot.reset();
        for event in events {
            slot.apply(event);
        }
        info!(projection = name, events = events.len(), "rebuilt projection");
        Ok(())
    }

    pub fn rebuild_all(&self, events: &[Event]) {
        let mut slots = self.slots.write();
        for slot in slots.values_mut() {
            slot.reset();
            for event in events {
                slot.apply(event);
            }
        }
        info!(projections = slots.len(), events = events.len(), "rebuilt all projections");
    }

    /// Fold every stored event not yet seen
    pub fn backfill(&self, store: &EventStore) {
        let events = store.all_events();
        for event in &events {
            self.apply(event);
        }
        debug!(events = events.len(), "projections backfilled");
    }

    /// Keep projections updated on every append to `store`
    pub fn attach(self: &Arc<Self>, store: &EventStore) -> SubscriptionId {
        let builder = Arc::clone(self);
        store.subscribe(move |event| builder.apply(event))
    }

    /// Value at a dotted path inside a projection's state
    pub fn query(&self, name: &str, key: &str) -> Option<Value> {
        let slots = self.slots.read();
        let state = slots.get(name)?.state_value();
        lookup_path(&state, key)
    }

    pub fn state(&self, name: &str) -> Option<ProjectionState> {
        let slots = self.slots.read();
        let slot = slots.get(name)?;
        Some(ProjectionState {
            projection_name: name.to_string(),
            meta: slot.meta().clone(),
            data: slot.state_value(),
        })
    }

    /// Typed copy of a projection's state
    pub fn state_as<T: Clone + 'static>(&self, name: &str) -> Option<T> {
        let slots = self.slots.read();
        slots.get(name)?.state_any().downcast_ref::<T>().cloned()
    }

    pub fn all_states(&self) -> BTreeMap<String, ProjectionState> {
        self.names()
            .into_iter()
            .filter_map(|name| self.state(&name).map(|s| (name, s)))
            .collect()
    }

    pub fn versions(&self) -> BTreeMap<String, u64> {
        self.slots
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.meta().version))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.read().contains_key(name)
    }
}
