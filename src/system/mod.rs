//! Composition root
//!
//! `EventSourcingSystem` wires the store, the OBS ingest bus, the
//! projections, the command and query buses and the time-travel debugger
//! together, and owns the correlation scope they share.
//!
//! ```text
//!  OBS ──ingest──► EventHandler<ObsEvent> ──translator──┐
//!                                                      ▼
//!  send_command ──► CommandBus ──────────────────► EventStore ──subscribe──► projections
//!  record/append ──────────────────────────────────────┘   │                    │
//!                                                          ▼                    ▼
//!                                         TimeTravelDebugger              QueryBus
//! ```

mod correlation;
mod ingest;

pub use correlation::{CorrelationContext, CorrelationError, CorrelationGuard};
pub use ingest::ObsEventTranslator;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{BusError, EventHandler, HandlerError, HandlerId, TimingMiddleware};
use crate::config::EventSourcingConfig;
use crate::cqrs::{
    snapshot_if_due, CommandBus, CommandEnvelope, CommandError, Query, QueryBus, QueryError,
    QueryResult,
};
use crate::debugger::{DebugSession, DebuggerError, TimeTravelDebugger};
use crate::event_store::{
    export_events, EventFilter, EventStore, EventStoreError, EventStoreStats, ExportFormat,
};
use crate::projections::ProjectionBuilder;
use crate::types::{
    rule_aggregate, AutomationRuleExecutedData, AutomationRuleFailedData,
    AutomationRuleTriggeredData, Event, EventParseError, EventPayload, ObsEvent, ObsEventData,
    RawObsEvent,
};

#[derive(Error, Debug)]
pub enum SystemError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Parse(#[from] EventParseError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Debugger(#[from] DebuggerError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error("projections are disabled")]
    ProjectionsDisabled,

    #[error("projection not found: {0}")]
    ProjectionNotFound(String),

    #[error("time travel is disabled")]
    TimeTravelDisabled,
}

pub type SystemResult<T> = Result<T, SystemError>;

/// Appends on behalf of the façade and the ingest handler
///
/// Takes snapshots when due. A failed snapshot is logged, never reported
/// as a failed append: the event is already durable by then.
#[derive(Clone)]
struct Writer {
    store: Arc<EventStore>,
    correlation: CorrelationContext,
    snapshot_frequency: Option<u64>,
}

impl Writer {
    /// Append, stamping the correlation scope open right now
    fn append(&self, event: Event) -> Result<Event, EventStoreError> {
        self.commit(self.correlation.stamp(event))
    }

    /// Append as is; ingested events were stamped when they were emitted
    fn commit(&self, event: Event) -> Result<Event, EventStoreError> {
        let stored = self.store.append(event)?;
        if let Some(frequency) = self.snapshot_frequency {
            if let Err(e) = snapshot_if_due(&self.store, &stored.aggregate_id, frequency) {
                warn!(
                    aggregate_id = %stored.aggregate_id,
                    sequence = stored.sequence,
                    error = %e,
                    "snapshot failed"
                );
            }
        }
        Ok(stored)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugSessionInfo {
    pub session_id: Uuid,
    pub events: usize,
    pub cursor: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatistics {
    pub total_events: usize,
    pub aggregates: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub projections: BTreeMap<String, u64>,
    pub debug_session: Option<DebugSessionInfo>,
    pub bus_running: bool,
    pub bus_pending: usize,
    pub recording: bool,
    pub store: EventStoreStats,
}

pub struct EventSourcingSystem {
    config: EventSourcingConfig,
    writer: Writer,
    projections: Option<Arc<ProjectionBuilder>>,
    bus: EventHandler<ObsEvent>,
    commands: CommandBus,
    queries: QueryBus,
    debugger: Option<Mutex<TimeTravelDebugger>>,
    translator: Arc<Mutex<ObsEventTranslator>>,
    ingest_handlers: Mutex<Vec<HandlerId>>,
}

impl EventSourcingSystem {
    /// Open the store described by `config` and wire everything to it
    pub fn open(config: EventSourcingConfig) -> SystemResult<Self> {
        let store = match config.store_config() {
            Some(store_config) => EventStore::open(store_config)?,
            None => EventStore::in_memory(),
        };
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// A system with default settings and no persistence
    pub fn in_memory() -> Self {
        Self::with_store(EventSourcingConfig::default(), Arc::new(EventStore::in_memory()))
    }

    fn with_store(config: EventSourcingConfig, store: Arc<EventStore>) -> Self {
        let correlation = CorrelationContext::new();
        let snapshot_frequency = config.effective_snapshot_frequency();

        let projections = config.enable_projections.then(|| {
            let builder = Arc::new(ProjectionBuilder::with_builtins());
            builder.backfill(&store);
            builder.attach(&store);
            builder
        });

        let mut commands =
            CommandBus::new(Arc::clone(&store)).with_correlation(correlation.clone());
        if let Some(frequency) = snapshot_frequency {
            commands = commands.with_snapshots(frequency);
        }

        let queries = QueryBus::new(
            Arc::clone(&store),
            projections
                .clone()
                .unwrap_or_else(|| Arc::new(ProjectionBuilder::new())),
        );

        let debugger = config
            .enable_time_travel
            .then(|| Mutex::new(TimeTravelDebugger::new(Arc::clone(&store))));

        let bus = EventHandler::with_config(config.bus_config());
        bus.use_middleware(Arc::new(TimingMiddleware::new(config.slow_handler_threshold)));

        info!(
            persistent = config.is_persistent(),
            events = store.len(),
            projections = config.enable_projections,
            time_travel = config.enable_time_travel,
            "event sourcing system ready"
        );

        Self {
            writer: Writer {
                store,
                correlation,
                snapshot_frequency,
            },
            config,
            projections,
            bus,
            commands,
            queries,
            debugger,
            translator: Arc::new(Mutex::new(ObsEventTranslator::new())),
            ingest_handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EventSourcingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.writer.store
    }

    pub fn projections(&self) -> Option<&Arc<ProjectionBuilder>> {
        self.projections.as_ref()
    }

    pub fn bus(&self) -> &EventHandler<ObsEvent> {
        &self.bus
    }

    pub fn commands(&self) -> &CommandBus {
        &self.commands
    }

    /// Start consuming ingested OBS events
    pub fn start(&self) {
        {
            let mut handlers = self.ingest_handlers.lock();
            if handlers.is_empty() {
                for kind in ObsEventData::KINDS {
                    handlers.push(self.register_ingest_handler(kind));
                }
            }
        }
        self.bus.start();
    }

    fn register_ingest_handler(&self, kind: &str) -> HandlerId {
        let writer = self.writer.clone();
        let translator = Arc::clone(&self.translator);

        self.bus.on(kind, move |event: ObsEvent| {
            let translated = translator.lock().translate(&event);
            let result = match translated {
                Some(domain_event) => writer
                    .commit(domain_event)
                    .map(|stored| {
                        debug!(
                            obs_event = event.event_type(),
                            sequence = stored.sequence,
                            "ingested"
                        );
                    })
                    .map_err(|e| HandlerError::failed(e.to_string())),
                None => Ok(()),
            };
            async move { result }
        })
    }

    /// Drain queued events, stop the bus and close any correlation scope
    pub async fn stop(&self) {
        if !self.bus.drain(self.config.shutdown_timeout).await {
            warn!(
                pending = self.bus.pending(),
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "shutdown timeout elapsed with events still queued"
            );
        }
        self.bus.stop().await;
        if let Some(id) = self.writer.correlation.end() {
            debug!(correlation_id = %id, "closed correlation scope on stop");
        }
        info!(events = self.writer.store.len(), "event sourcing system stopped");
    }

    /// Parse a raw OBS event and queue it for ingestion
    ///
    /// Unknown or malformed events are logged and skipped; the error is
    /// returned for the caller's information.
    pub fn ingest(&self, raw: RawObsEvent) -> SystemResult<()> {
        match ObsEvent::parse(raw) {
            Ok(event) => {
                self.emit(event);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "skipping inbound event");
                Err(e.into())
            }
        }
    }

    pub fn ingest_raw(&self, value: &Value) -> SystemResult<()> {
        match ObsEvent::from_value(value) {
            Ok(event) => {
                self.emit(event);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "skipping inbound event");
                Err(e.into())
            }
        }
    }

    /// Queue an OBS event, tagging it with the correlation scope open now
    pub fn emit(&self, event: ObsEvent) {
        let event = match (event.correlation_id, self.writer.correlation.current()) {
            (None, Some(id)) => event.with_correlation_id(id),
            _ => event,
        };
        self.bus.emit(event);
    }

    /// Append a domain event built from `payload`
    pub fn record(&self, aggregate_id: impl Into<String>, payload: EventPayload) -> SystemResult<Event> {
        self.append(Event::new(aggregate_id, payload))
    }

    pub fn append(&self, event: Event) -> SystemResult<Event> {
        Ok(self.writer.append(event)?)
    }

    pub async fn send_command(
        &self,
        envelope: impl Into<CommandEnvelope>,
    ) -> SystemResult<Vec<Event>> {
        Ok(self.commands.send(envelope).await?)
    }

    pub fn query(&self, query: Query) -> SystemResult<QueryResult> {
        Ok(self.queries.send(query)?)
    }

    pub fn start_correlation(&self) -> SystemResult<Uuid> {
        Ok(self.writer.correlation.start()?)
    }

    pub fn end_correlation(&self) -> Option<Uuid> {
        self.writer.correlation.end()
    }

    pub fn correlation_scope(&self) -> SystemResult<CorrelationGuard> {
        Ok(self.writer.correlation.begin()?)
    }

    pub fn current_correlation(&self) -> Option<Uuid> {
        self.writer.correlation.current()
    }

    /// Value at a dotted key inside a projection's state
    pub fn query_projection(&self, name: &str, key: &str) -> SystemResult<Option<Value>> {
        let projections = self
            .projections
            .as_ref()
            .ok_or(SystemError::ProjectionsDisabled)?;
        if !projections.contains(name) {
            return Err(SystemError::ProjectionNotFound(name.to_string()));
        }
        Ok(projections.query(name, key))
    }

    /// Start a debug session over the last `hours_back` hours
    pub fn start_debugging(&self, hours_back: i64) -> SystemResult<DebugSession> {
        self.with_debugger(|debugger| debugger.start_session_hours_back(hours_back).clone())
    }

    pub fn with_debugger<R, F>(&self, f: F) -> SystemResult<R>
    where
        F: FnOnce(&mut TimeTravelDebugger) -> R,
    {
        let debugger = self
            .debugger
            .as_ref()
            .ok_or(SystemError::TimeTravelDisabled)?;
        Ok(f(&mut debugger.lock()))
    }

    /// Run one firing of an automation rule in its own correlation scope
    ///
    /// Records `AutomationRuleTriggered`, awaits `action`, then records
    /// `AutomationRuleExecuted` or `AutomationRuleFailed` with the trigger
    /// as its cause. Whatever is appended while the action runs joins the
    /// same correlation chain. A failing action is recorded rather than
    /// returned as an error; either way the outcome event is returned.
    pub async fn run_automation<F, E>(
        &self,
        trigger: AutomationRuleTriggeredData,
        action: F,
    ) -> SystemResult<Event>
    where
        F: Future<Output = Result<Vec<String>, E>>,
        E: fmt::Display,
    {
        let scope = self.correlation_scope()?;
        let aggregate_id = rule_aggregate(&trigger.rule_id);
        let rule_id = trigger.rule_id.clone();
        let rule_name = trigger.rule_name.clone();

        let triggered = self.record(
            aggregate_id.clone(),
            EventPayload::AutomationRuleTriggered(trigger),
        )?;
        debug!(rule_id = %rule_id, correlation_id = %scope.id(), "automation rule triggered");

        let started = Instant::now();
        let outcome = action.await;
        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let payload = match outcome {
            Ok(actions_executed) => {
                let mut result = Map::new();
                result.insert("success".to_string(), Value::Bool(true));
                EventPayload::AutomationRuleExecuted(AutomationRuleExecutedData {
                    rule_id,
                    rule_name,
                    actions_executed,
                    execution_time_ms,
                    result,
                })
            }
            Err(e) => {
                warn!(rule_id = %rule_id, error = %e, "automation rule failed");
                EventPayload::AutomationRuleFailed(AutomationRuleFailedData {
                    rule_id,
                    rule_name: Some(rule_name),
                    error: e.to_string(),
                })
            }
        };

        let outcome = self.append(Event::new(aggregate_id, payload).with_causation_id(triggered.id()))?;
        drop(scope);
        Ok(outcome)
    }

    /// Everything a rule produced: its own events plus the rest of their
    /// correlation chains, ascending by sequence
    pub fn replay_automation(&self, rule_id: &str, since: Option<DateTime<Utc>>) -> Vec<Event> {
        let store = &self.writer.store;
        let mut filter = EventFilter::new().aggregate(rule_aggregate(rule_id));
        filter.since = since;
        let rule_events = store.query(&filter);

        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut events = Vec::new();
        for event in &rule_events {
            let related = match event.correlation_id() {
                Some(id) => store.correlation_chain(id),
                None => vec![event.clone()],
            };
            for e in related {
                if seen.insert(e.id()) {
                    events.push(e);
                }
            }
        }
        events.sort_by_key(|e| e.sequence);
        events
    }

    pub fn export_events(
        &self,
        format: ExportFormat,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> SystemResult<String> {
        let mut filter = EventFilter::new();
        filter.since = since;
        filter.until = until;
        let events = self.writer.store.query(&filter);
        Ok(export_events(&events, format)?)
    }

    pub fn statistics(&self) -> SystemResult<SystemStatistics> {
        let store = self.writer.store.stats()?;
        let debug_session = self.debugger.as_ref().and_then(|d| {
            d.lock().session().ok().map(|s| DebugSessionInfo {
                session_id: s.id(),
                events: s.len(),
                cursor: s.cursor(),
            })
        });

        Ok(SystemStatistics {
            total_events: store.total_events,
            aggregates: store.aggregate_count,
            events_by_type: store.events_by_type.clone(),
            projections: self
                .projections
                .as_ref()
                .map(|p| p.versions())
                .unwrap_or_default(),
            debug_session,
            bus_running: self.bus.is_running(),
            bus_pending: self.bus.pending(),
            recording: self.bus.is_recording(),
            store,
        })
    }

    pub fn start_recording(&self) {
        self.bus.start_recording();
    }

    pub fn stop_recording(&self) -> Vec<ObsEvent> {
        self.bus.stop_recording()
    }

    pub async fn replay(&self, events: &[ObsEvent], speed: f64) -> SystemResult<()> {
        Ok(self.bus.replay(events, speed).await?)
    }
}
