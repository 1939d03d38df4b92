//! Command and query buses
//!
//! The write side validates a command against its aggregate's history,
//! hands it to the optional outbound sink and appends the resulting
//! events. The read side answers from the projections and the store.

mod aggregate;
mod commands;
mod queries;

pub use aggregate::{snapshot_if_due, AggregateState};
pub use commands::{Command, CommandEnvelope};
pub use queries::{Query, QueryBus, QueryError, QueryResult, StreamStatus};

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event_store::{EventStore, EventStoreError};
use crate::system::CorrelationContext;
use crate::types::{
    AutomationRuleTriggeredData, Event, EventMetadata, EventPayload, InputMuteChangedData,
    RecordingStartedData, RecordingStoppedData, SceneCreatedData, SceneSwitchedData,
    SourceVolumeChangedData, StreamStartedData, StreamStoppedData,
};
use crate::utils::time::span_seconds;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("command sink failed: {0}")]
    SinkFailed(String),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

impl CommandError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        CommandError::Rejected(reason.into())
    }
}

/// The collaborator that carries a validated command out to OBS
///
/// Events are stored only after the sink succeeds.
pub trait CommandSink: Send + Sync {
    fn execute<'a>(&'a self, envelope: &'a CommandEnvelope) -> BoxFuture<'a, Result<(), String>>;
}

/// Transforms or rejects an envelope before validation
pub type CommandMiddleware =
    Arc<dyn Fn(CommandEnvelope) -> BoxFuture<'static, Result<CommandEnvelope, CommandError>> + Send + Sync>;

pub struct CommandBus {
    store: Arc<EventStore>,
    correlation: CorrelationContext,
    middleware: RwLock<Vec<CommandMiddleware>>,
    sink: RwLock<Option<Arc<dyn CommandSink>>>,
    snapshot_frequency: Option<u64>,
    // serializes validate + append so two commands never validate
    // against the same stale state
    write_lock: tokio::sync::Mutex<()>,
}

impl CommandBus {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            correlation: CorrelationContext::new(),
            middleware: RwLock::new(Vec::new()),
            sink: RwLock::new(None),
            snapshot_frequency: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Stamp events with the id of this correlation scope
    pub fn with_correlation(mut self, correlation: CorrelationContext) -> Self {
        self.correlation = correlation;
        self
    }

    /// Snapshot each aggregate every `frequency` events
    pub fn with_snapshots(mut self, frequency: u64) -> Self {
        self.snapshot_frequency = Some(frequency).filter(|&f| f > 0);
        self
    }

    pub fn set_sink(&self, sink: Arc<dyn CommandSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn add_middleware<F, Fut>(&self, middleware: F)
    where
        F: Fn(CommandEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CommandEnvelope, CommandError>> + Send + 'static,
    {
        let middleware: CommandMiddleware = Arc::new(move |envelope| middleware(envelope).boxed());
        self.middleware.write().push(middleware);
    }

    /// Process a command and return the events it stored
    pub async fn send(&self, envelope: impl Into<CommandEnvelope>) -> Result<Vec<Event>, CommandError> {
        let mut envelope = envelope.into();

        let middleware: Vec<CommandMiddleware> = self.middleware.read().clone();
        for layer in middleware {
            envelope = layer(envelope).await?;
        }

        let _write = self.write_lock.lock().await;

        let aggregate_id = envelope.aggregate_id();
        let (state, _) = AggregateState::load(&self.store, &aggregate_id)?;
        let payloads = match self.decide(&envelope, &state) {
            Ok(payloads) => payloads,
            Err(e) => {
                warn!(command = envelope.command.name(), error = %e, "command rejected");
                return Err(e);
            }
        };

        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.execute(&envelope)
                .await
                .map_err(CommandError::SinkFailed)?;
        }

        let correlation_id = envelope.correlation_id.or_else(|| self.correlation.current());
        let mut stored = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let metadata = EventMetadata {
                correlation_id,
                causation_id: Some(envelope.command_id),
                user_id: envelope.user_id.clone(),
                ..EventMetadata::new()
            };
            let event = Event::new(aggregate_id.clone(), payload).with_metadata(metadata);
            stored.push(self.store.append(event)?);
        }

        // the events are durable; a failed snapshot only costs replay time
        if let Some(frequency) = self.snapshot_frequency {
            if let Err(e) = snapshot_if_due(&self.store, &aggregate_id, frequency) {
                warn!(aggregate_id = %aggregate_id, error = %e, "snapshot failed");
            }
        }

        info!(
            command = envelope.command.name(),
            command_id = %envelope.command_id,
            events = stored.len(),
            "command handled"
        );
        Ok(stored)
    }

    /// Validate the command and produce the payloads it results in
    fn decide(
        &self,
        envelope: &CommandEnvelope,
        state: &AggregateState,
    ) -> Result<Vec<EventPayload>, CommandError> {
        let payload = match &envelope.command {
            Command::SwitchScene {
                to_scene,
                transition_type,
                transition_duration,
            } => {
                require_name(to_scene)?;
                let from_scene = state
                    .current_scene
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string());
                EventPayload::SceneSwitched(SceneSwitchedData {
                    from_scene,
                    to_scene: to_scene.clone(),
                    transition_type: transition_type.clone(),
                    transition_duration: *transition_duration,
                })
            }
            Command::CreateScene {
                scene_name,
                scene_settings,
            } => {
                require_name(scene_name)?;
                if state.exists {
                    return Err(CommandError::rejected(format!(
                        "Scene already exists: {}",
                        scene_name
                    )));
                }
                EventPayload::SceneCreated(SceneCreatedData {
                    scene_name: scene_name.clone(),
                    scene_settings: scene_settings.clone(),
                })
            }
            Command::StartStream {
                stream_settings,
                service,
            } => {
                if state.stream_active {
                    return Err(CommandError::rejected("Stream is already active"));
                }
                EventPayload::StreamStarted(StreamStartedData {
                    stream_settings: stream_settings.clone(),
                    service: service.clone(),
                })
            }
            Command::StopStream => {
                if !state.stream_active {
                    return Err(CommandError::rejected("Stream is not active"));
                }
                EventPayload::StreamStopped(StreamStoppedData {
                    duration_seconds: elapsed_seconds(state.stream_started_at, envelope),
                    ..Default::default()
                })
            }
            Command::StartRecording { output_path } => {
                if state.recording_active {
                    return Err(CommandError::rejected("Recording is already active"));
                }
                EventPayload::RecordingStarted(RecordingStartedData {
                    output_path: output_path.clone(),
                })
            }
            Command::StopRecording => {
                if !state.recording_active {
                    return Err(CommandError::rejected("Recording is not active"));
                }
                EventPayload::RecordingStopped(RecordingStoppedData {
                    output_path: state.output_path.clone(),
                    duration_seconds: elapsed_seconds(state.recording_started_at, envelope),
                })
            }
            Command::SetSourceVolume {
                source_name,
                volume,
                volume_db,
            } => {
                require_name(source_name)?;
                if !volume.is_finite() || *volume < 0.0 {
                    return Err(CommandError::rejected(format!("Invalid volume: {}", volume)));
                }
                EventPayload::SourceVolumeChanged(SourceVolumeChangedData {
                    source_name: source_name.clone(),
                    old_volume: state.volume.unwrap_or(1.0),
                    new_volume: *volume,
                    volume_db: *volume_db,
                })
            }
            Command::SetInputMute { input_name, muted } => {
                require_name(input_name)?;
                EventPayload::InputMuteChanged(InputMuteChangedData {
                    input_name: input_name.clone(),
                    muted: *muted,
                })
            }
            Command::TriggerAutomationRule {
                rule_id,
                rule_name,
                trigger_type,
                trigger_data,
            } => {
                require_name(rule_id)?;
                EventPayload::AutomationRuleTriggered(AutomationRuleTriggeredData {
                    rule_id: rule_id.clone(),
                    rule_name: rule_name.clone(),
                    trigger_type: trigger_type.clone(),
                    trigger_data: trigger_data.clone(),
                })
            }
        };

        debug!(command = envelope.command.name(), "command accepted");
        Ok(vec![payload])
    }
}

fn require_name(name: &str) -> Result<(), CommandError> {
    if name.trim().is_empty() {
        return Err(CommandError::rejected("name must not be empty"));
    }
    Ok(())
}

fn elapsed_seconds(started_at: Option<DateTime<Utc>>, envelope: &CommandEnvelope) -> u64 {
    started_at
        .map(|start| span_seconds(start, envelope.issued_at).max(0.0) as u64)
        .unwrap_or(0)
}
