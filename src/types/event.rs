//! Domain event types for Event Sourcing
//!
//! This module defines the immutable facts recorded in the event log.
//! Every event belongs to an aggregate (a scene, a source, the stream, or
//! the whole OBS instance) and carries metadata used to trace workflows
//! through correlation and causation ids.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Aggregate id for system-wide events such as scene switches
pub const OBS_SYSTEM_AGGREGATE: &str = "obs_system";

/// Aggregate id for streaming output events
pub const STREAM_AGGREGATE: &str = "stream";

/// Aggregate id for recording output events
pub const RECORDING_AGGREGATE: &str = "recording";

/// Aggregate id for a single scene (`scene:<name>`)
pub fn scene_aggregate(scene_name: &str) -> String {
    format!("scene:{}", scene_name)
}

/// Aggregate id for a single source or input (`source:<name>`)
pub fn source_aggregate(source_name: &str) -> String {
    format!("source:{}", source_name)
}

/// Aggregate id for an automation rule (`rule:<id>`)
pub fn rule_aggregate(rule_id: &str) -> String {
    format!("rule:{}", rule_id)
}

/// Errors raised while turning raw data into typed events
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventParseError {
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("invalid payload for {kind}: {message}")]
    InvalidPayload { kind: String, message: String },
}

/// Event types that can occur in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "scene.created")]
    SceneCreated,
    #[serde(rename = "scene.switched")]
    SceneSwitched,
    #[serde(rename = "scene.deleted")]
    SceneDeleted,
    #[serde(rename = "source.created")]
    SourceCreated,
    #[serde(rename = "source.volume_changed")]
    SourceVolumeChanged,
    #[serde(rename = "input.mute_changed")]
    InputMuteChanged,
    #[serde(rename = "stream.started")]
    StreamStarted,
    #[serde(rename = "stream.stopped")]
    StreamStopped,
    #[serde(rename = "recording.started")]
    RecordingStarted,
    #[serde(rename = "recording.stopped")]
    RecordingStopped,
    #[serde(rename = "automation.rule_created")]
    AutomationRuleCreated,
    #[serde(rename = "automation.rule_triggered")]
    AutomationRuleTriggered,
    #[serde(rename = "automation.rule_executed")]
    AutomationRuleExecuted,
    #[serde(rename = "automation.rule_failed")]
    AutomationRuleFailed,
    #[serde(rename = "system.error")]
    SystemError,
    #[serde(rename = "system.performance_warning")]
    SystemPerformanceWarning,
}

impl EventType {
    /// Every known event kind, in declaration order
    pub const ALL: [EventType; 16] = [
        EventType::SceneCreated,
        EventType::SceneSwitched,
        EventType::SceneDeleted,
        EventType::SourceCreated,
        EventType::SourceVolumeChanged,
        EventType::InputMuteChanged,
        EventType::StreamStarted,
        EventType::StreamStopped,
        EventType::RecordingStarted,
        EventType::RecordingStopped,
        EventType::AutomationRuleCreated,
        EventType::AutomationRuleTriggered,
        EventType::AutomationRuleExecuted,
        EventType::AutomationRuleFailed,
        EventType::SystemError,
        EventType::SystemPerformanceWarning,
    ];

    /// Wire tag of this kind (e.g. `scene.switched`)
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SceneCreated => "scene.created",
            EventType::SceneSwitched => "scene.switched",
            EventType::SceneDeleted => "scene.deleted",
            EventType::SourceCreated => "source.created",
            EventType::SourceVolumeChanged => "source.volume_changed",
            EventType::InputMuteChanged => "input.mute_changed",
            EventType::StreamStarted => "stream.started",
            EventType::StreamStopped => "stream.stopped",
            EventType::RecordingStarted => "recording.started",
            EventType::RecordingStopped => "recording.stopped",
            EventType::AutomationRuleCreated => "automation.rule_created",
            EventType::AutomationRuleTriggered => "automation.rule_triggered",
            EventType::AutomationRuleExecuted => "automation.rule_executed",
            EventType::AutomationRuleFailed => "automation.rule_failed",
            EventType::SystemError => "system.error",
            EventType::SystemPerformanceWarning => "system.performance_warning",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventParseError::UnknownKind(s.to_string()))
    }
}

/// Data payload for SceneCreated event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneCreatedData {
    pub scene_name: String,
    #[serde(default)]
    pub scene_settings: Map<String, Value>,
}

/// Data payload for SceneSwitched event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSwitchedData {
    pub from_scene: String,
    pub to_scene: String,
    #[serde(default)]
    pub transition_type: Option<String>,
    #[serde(default)]
    pub transition_duration: Option<u32>,
}

/// Data payload for SceneDeleted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDeletedData {
    pub scene_name: String,
}

/// Data payload for SourceCreated event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCreatedData {
    pub source_name: String,
    pub source_type: String,
    #[serde(default)]
    pub source_settings: Map<String, Value>,
    #[serde(default)]
    pub scene_name: Option<String>,
}

/// Data payload for SourceVolumeChanged event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceVolumeChangedData {
    pub source_name: String,
    pub old_volume: f64,
    pub new_volume: f64,
    #[serde(default)]
    pub volume_db: Option<f64>,
}

/// Data payload for InputMuteChanged event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMuteChangedData {
    pub input_name: String,
    pub muted: bool,
}

/// Data payload for StreamStarted event
///
/// The stream key is never recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStartedData {
    #[serde(default)]
    pub stream_settings: Map<String, Value>,
    #[serde(default)]
    pub service: Option<String>,
}

/// Data payload for StreamStopped event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStoppedData {
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub total_frames: u64,
    #[serde(default)]
    pub dropped_frames: u64,
    #[serde(default)]
    pub bytes_sent: u64,
}

/// Data payload for RecordingStarted event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStartedData {
    #[serde(default)]
    pub output_path: Option<String>,
}

/// Data payload for RecordingStopped event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStoppedData {
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub duration_seconds: u64,
}

/// Data payload for AutomationRuleCreated event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRuleCreatedData {
    pub rule_id: String,
    pub rule_name: String,
}

/// Data payload for AutomationRuleTriggered event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRuleTriggeredData {
    pub rule_id: String,
    pub rule_name: String,
    pub trigger_type: String,
    #[serde(default)]
    pub trigger_data: Map<String, Value>,
}

/// Data payload for AutomationRuleExecuted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRuleExecutedData {
    pub rule_id: String,
    pub rule_name: String,
    #[serde(default)]
    pub actions_executed: Vec<String>,
    pub execution_time_ms: f64,
    #[serde(default)]
    pub result: Map<String, Value>,
}

/// Data payload for AutomationRuleFailed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRuleFailedData {
    pub rule_id: String,
    #[serde(default)]
    pub rule_name: Option<String>,
    pub error: String,
}

/// Data payload for SystemError event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemErrorData {
    pub message: String,
    #[serde(default)]
    pub component: Option<String>,
}

/// Data payload for SystemPerformanceWarning event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPerformanceWarningData {
    pub message: String,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

/// Event data - typed payload for each event type
///
/// Serialized without a tag; the kind travels next to it as `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    SceneCreated(SceneCreatedData),
    SceneSwitched(SceneSwitchedData),
    SceneDeleted(SceneDeletedData),
    SourceCreated(SourceCreatedData),
    SourceVolumeChanged(SourceVolumeChangedData),
    InputMuteChanged(InputMuteChangedData),
    StreamStarted(StreamStartedData),
    StreamStopped(StreamStoppedData),
    RecordingStarted(RecordingStartedData),
    RecordingStopped(RecordingStoppedData),
    AutomationRuleCreated(AutomationRuleCreatedData),
    AutomationRuleTriggered(AutomationRuleTriggeredData),
    AutomationRuleExecuted(AutomationRuleExecutedData),
    AutomationRuleFailed(AutomationRuleFailedData),
    SystemError(SystemErrorData),
    SystemPerformanceWarning(SystemPerformanceWarningData),
}

fn parse_payload<T: DeserializeOwned>(kind: EventType, data: Value) -> Result<T, EventParseError> {
    serde_json::from_value(data).map_err(|e| EventParseError::InvalidPayload {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

impl EventPayload {
    /// The kind of this payload
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::SceneCreated(_) => EventType::SceneCreated,
            EventPayload::SceneSwitched(_) => EventType::SceneSwitched,
            EventPayload::SceneDeleted(_) => EventType::SceneDeleted,
            EventPayload::SourceCreated(_) => EventType::SourceCreated,
            EventPayload::SourceVolumeChanged(_) => EventType::SourceVolumeChanged,
            EventPayload::InputMuteChanged(_) => EventType::InputMuteChanged,
            EventPayload::StreamStarted(_) => EventType::StreamStarted,
            EventPayload::StreamStopped(_) => EventType::StreamStopped,
            EventPayload::RecordingStarted(_) => EventType::RecordingStarted,
            EventPayload::RecordingStopped(_) => EventType::RecordingStopped,
            EventPayload::AutomationRuleCreated(_) => EventType::AutomationRuleCreated,
            EventPayload::AutomationRuleTriggered(_) => EventType::AutomationRuleTriggered,
            EventPayload::AutomationRuleExecuted(_) => EventType::AutomationRuleExecuted,
            EventPayload::AutomationRuleFailed(_) => EventType::AutomationRuleFailed,
            EventPayload::SystemError(_) => EventType::SystemError,
            EventPayload::SystemPerformanceWarning(_) => EventType::SystemPerformanceWarning,
        }
    }

    /// Parse a payload for a known kind
    ///
    /// A `null` payload is treated as an empty object so kinds whose
    /// fields are all optional still parse.
    pub fn from_parts(kind: EventType, data: Value) -> Result<Self, EventParseError> {
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        Ok(match kind {
            EventType::SceneCreated => EventPayload::SceneCreated(parse_payload(kind, data)?),
            EventType::SceneSwitched => EventPayload::SceneSwitched(parse_payload(kind, data)?),
            EventType::SceneDeleted => EventPayload::SceneDeleted(parse_payload(kind, data)?),
            EventType::SourceCreated => EventPayload::SourceCreated(parse_payload(kind, data)?),
            EventType::SourceVolumeChanged => {
                EventPayload::SourceVolumeChanged(parse_payload(kind, data)?)
            }
            EventType::InputMuteChanged => {
                EventPayload::InputMuteChanged(parse_payload(kind, data)?)
            }
            EventType::StreamStarted => EventPayload::StreamStarted(parse_payload(kind, data)?),
            EventType::StreamStopped => EventPayload::StreamStopped(parse_payload(kind, data)?),
            EventType::RecordingStarted => {
                EventPayload::RecordingStarted(parse_payload(kind, data)?)
            }
            EventType::RecordingStopped => {
                EventPayload::RecordingStopped(parse_payload(kind, data)?)
            }
            EventType::AutomationRuleCreated => {
                EventPayload::AutomationRuleCreated(parse_payload(kind, data)?)
            }
            EventType::AutomationRuleTriggered => {
                EventPayload::AutomationRuleTriggered(parse_payload(kind, data)?)
            }
            EventType::AutomationRuleExecuted => {
                EventPayload::AutomationRuleExecuted(parse_payload(kind, data)?)
            }
            EventType::AutomationRuleFailed => {
                EventPayload::AutomationRuleFailed(parse_payload(kind, data)?)
            }
            EventType::SystemError => EventPayload::SystemError(parse_payload(kind, data)?),
            EventType::SystemPerformanceWarning => {
                EventPayload::SystemPerformanceWarning(parse_payload(kind, data)?)
            }
        })
    }

    /// JSON form of the payload fields
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn default_version() -> u32 {
    1
}

fn default_source() -> String {
    "obs_agent".to_string()
}

/// Metadata attached to every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Version of the event schema
    #[serde(default = "default_version")]
    pub version: u32,
    /// Groups events caused by one external workflow
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    /// Id of the event or command that directly produced this event
    #[serde(default)]
    pub causation_id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

impl EventMetadata {
    /// Fresh metadata with a new id and the current time
    pub fn new() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            version: default_version(),
            correlation_id: None,
            causation_id: None,
            user_id: None,
            source: default_source(),
        }
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable event in the event log
///
/// Events are the source of truth: current state is derived by replaying
/// them in sequence order. `sequence` is 0 until the store assigns the
/// global position on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "EventRecord", try_from = "EventRecord")]
pub struct Event {
    pub sequence: u64,
    pub aggregate_id: String,
    pub metadata: EventMetadata,
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with fresh metadata
    pub fn new(aggregate_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            sequence: 0,
            aggregate_id: aggregate_id.into(),
            metadata: EventMetadata::new(),
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.metadata.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.metadata.causation_id = Some(causation_id);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.metadata.user_id = Some(user_id.into());
        self
    }

    /// Set a specific timestamp (imports, tests, replays)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.metadata.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// A new event value carrying the same identity with a different payload
    ///
    /// Used by what-if scenarios; the original event is left untouched.
    pub fn with_payload(&self, payload: EventPayload) -> Event {
        Event {
            sequence: self.sequence,
            aggregate_id: self.aggregate_id.clone(),
            metadata: self.metadata.clone(),
            payload,
        }
    }

    pub fn id(&self) -> Uuid {
        self.metadata.event_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.metadata.correlation_id
    }

    pub fn causation_id(&self) -> Option<Uuid> {
        self.metadata.causation_id
    }

    /// Fully spelled-out record form used for storage and export
    pub fn to_record(&self) -> EventRecord {
        EventRecord::from(self.clone())
    }

    /// Serialize event to JSON string (for JSONL)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Interchange form of an event: kind tag plus raw payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub sequence: u64,
    pub event_type: String,
    pub aggregate_id: String,
    pub metadata: EventMetadata,
    #[serde(default, alias = "data")]
    pub event_data: Value,
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        Self {
            sequence: event.sequence,
            event_type: event.event_type().to_string(),
            aggregate_id: event.aggregate_id,
            metadata: event.metadata,
            event_data: event.payload.to_value(),
        }
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = EventParseError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let kind: EventType = record.event_type.parse()?;
        if record.aggregate_id.is_empty() {
            return Err(EventParseError::MissingField("aggregate_id".to_string()));
        }
        let payload = EventPayload::from_parts(kind, record.event_data)?;

        Ok(Event {
            sequence: record.sequence,
            aggregate_id: record.aggregate_id,
            metadata: record.metadata,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scene_switched(to: &str) -> Event {
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

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&EventType::SceneSwitched).unwrap();
        assert_eq!(json, "\"scene.switched\"");

        let parsed: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, EventType::SceneSwitched);
    }

    #[test]
    fn test_event_type_tags_match_serde() {
        for kind in EventType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<EventType>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = "scene.exploded".parse::<EventType>().unwrap_err();
        assert_eq!(err, EventParseError::UnknownKind("scene.exploded".to_string()));
        assert_eq!(err.to_string(), "unknown event kind: scene.exploded");
    }

    #[test]
    fn test_event_record_spells_out_metadata() {
        let event = scene_switched("Scene 1");
        let json = event.to_json_line().unwrap();

        assert!(json.contains("\"event_type\":\"scene.switched\""));
        assert!(json.contains("\"aggregate_id\":\"obs_system\""));
        assert!(json.contains("\"correlation_id\":null"));
        assert!(json.contains("\"causation_id\":null"));
        assert!(json.contains("\"to_scene\":\"Scene 1\""));

        let parsed = Event::from_json_line(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_record_with_unknown_kind_fails() {
        let line = json!({
            "event_type": "scene.teleported",
            "aggregate_id": "obs_system",
            "metadata": EventMetadata::new(),
            "event_data": {}
        })
        .to_string();

        let err = Event::from_json_line(&line).unwrap_err();
        assert!(err.to_string().contains("unknown event kind"));
    }

    #[test]
    fn test_payload_missing_required_field() {
        let err = EventPayload::from_parts(EventType::SceneSwitched, json!({"to_scene": "A"}))
            .unwrap_err();
        assert!(matches!(err, EventParseError::InvalidPayload { .. }));
    }

    #[test]
    fn test_null_payload_for_optional_kinds() {
        let payload = EventPayload::from_parts(EventType::StreamStarted, Value::Null).unwrap();
        assert_eq!(payload, EventPayload::StreamStarted(StreamStartedData::default()));
    }

    #[test]
    fn test_with_payload_returns_new_value() {
        let original = scene_switched("Scene 1");
        let modified = original.with_payload(EventPayload::SceneSwitched(SceneSwitchedData {
            from_scene: "Unknown".to_string(),
            to_scene: "Alternative Scene".to_string(),
            transition_type: None,
            transition_duration: None,
        }));

        assert_eq!(modified.id(), original.id());
        match (&original.payload, &modified.payload) {
            (EventPayload::SceneSwitched(a), EventPayload::SceneSwitched(b)) => {
                assert_eq!(a.to_scene, "Scene 1");
                assert_eq!(b.to_scene, "Alternative Scene");
            }
            _ => panic!("unexpected payloads"),
        }
    }

    #[test]
    fn test_aggregate_helpers() {
        assert_eq!(scene_aggregate("Main"), "scene:Main");
        assert_eq!(source_aggregate("Mic"), "source:Mic");
        assert_eq!(rule_aggregate("r1"), "rule:r1");
    }
}
