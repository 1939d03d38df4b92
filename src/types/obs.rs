//! Inbound OBS events
//!
//! These are the events OBS emits over its WebSocket protocol, in the shape
//! `{eventType, eventData, timestamp?}`. They are parsed into typed values,
//! pushed through the event bus, and translated into domain events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::event::EventParseError;

/// Output state reported by OBS once an output is fully running
pub const OUTPUT_STARTED: &str = "OBS_WEBSOCKET_OUTPUT_STARTED";

/// Output state reported by OBS once an output has fully stopped
pub const OUTPUT_STOPPED: &str = "OBS_WEBSOCKET_OUTPUT_STOPPED";

/// Dispatch priority of an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObsEventPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// OBS event category, used for coarse filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObsEventCategory {
    General,
    Scenes,
    Inputs,
    Outputs,
    Ui,
}

/// Raw wire form of an OBS event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObsEvent {
    #[serde(rename = "eventType", alias = "event_type")]
    pub event_type: String,
    #[serde(rename = "eventData", alias = "event_data", default)]
    pub event_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(
        rename = "correlationId",
        alias = "correlation_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<Uuid>,
}

impl RawObsEvent {
    pub fn new(event_type: impl Into<String>, event_data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            event_data,
            timestamp: None,
            correlation_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSceneChanged {
    pub scene_name: String,
    #[serde(default)]
    pub scene_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneLifecycle {
    pub scene_name: String,
    #[serde(default)]
    pub scene_uuid: Option<String>,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRenamed {
    pub old_scene_name: String,
    pub scene_name: String,
    #[serde(default)]
    pub scene_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputAdded {
    pub input_name: String,
    #[serde(default)]
    pub input_uuid: Option<String>,
    #[serde(default)]
    pub input_kind: String,
    #[serde(default)]
    pub unversioned_input_kind: String,
    #[serde(default)]
    pub input_settings: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputGone {
    pub input_name: String,
    #[serde(default)]
    pub input_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMute {
    pub input_name: String,
    #[serde(default)]
    pub input_uuid: Option<String>,
    pub input_muted: bool,
}

fn unity_volume() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputVolume {
    pub input_name: String,
    #[serde(default)]
    pub input_uuid: Option<String>,
    #[serde(default = "unity_volume")]
    pub input_volume_mul: f64,
    #[serde(default)]
    pub input_volume_db: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputState {
    pub output_active: bool,
    pub output_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

impl OutputState {
    pub fn is_started(&self) -> bool {
        self.output_state == OUTPUT_STARTED
    }

    pub fn is_stopped(&self) -> bool {
        self.output_state == OUTPUT_STOPPED
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudioMode {
    pub studio_mode_enabled: bool,
}

/// Typed body of an inbound OBS event
#[derive(Debug, Clone, PartialEq)]
pub enum ObsEventData {
    CurrentProgramSceneChanged(ProgramSceneChanged),
    SceneCreated(SceneLifecycle),
    SceneRemoved(SceneLifecycle),
    SceneNameChanged(SceneRenamed),
    InputCreated(InputAdded),
    InputRemoved(InputGone),
    InputMuteStateChanged(InputMute),
    InputVolumeChanged(InputVolume),
    StreamStateChanged(OutputState),
    RecordStateChanged(OutputState),
    ExitStarted,
    StudioModeStateChanged(StudioMode),
}

fn parse_body<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, EventParseError> {
    serde_json::from_value(data).map_err(|e| EventParseError::InvalidPayload {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

impl ObsEventData {
    /// Every OBS event name this crate understands
    pub const KINDS: [&'static str; 12] = [
        "CurrentProgramSceneChanged",
        "SceneCreated",
        "SceneRemoved",
        "SceneNameChanged",
        "InputCreated",
        "InputRemoved",
        "InputMuteStateChanged",
        "InputVolumeChanged",
        "StreamStateChanged",
        "RecordStateChanged",
        "ExitStarted",
        "StudioModeStateChanged",
    ];

    pub fn from_parts(kind: &str, data: Value) -> Result<Self, EventParseError> {
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        Ok(match kind {
            "CurrentProgramSceneChanged" => {
                ObsEventData::CurrentProgramSceneChanged(parse_body(kind, data)?)
            }
            "SceneCreated" => ObsEventData::SceneCreated(parse_body(kind, data)?),
            "SceneRemoved" => ObsEventData::SceneRemoved(parse_body(kind, data)?),
            "SceneNameChanged" => ObsEventData::SceneNameChanged(parse_body(kind, data)?),
            "InputCreated" => ObsEventData::InputCreated(parse_body(kind, data)?),
            "InputRemoved" => ObsEventData::InputRemoved(parse_body(kind, data)?),
            "InputMuteStateChanged" => ObsEventData::InputMuteStateChanged(parse_body(kind, data)?),
            "InputVolumeChanged" => ObsEventData::InputVolumeChanged(parse_body(kind, data)?),
            "StreamStateChanged" => ObsEventData::StreamStateChanged(parse_body(kind, data)?),
            "RecordStateChanged" => ObsEventData::RecordStateChanged(parse_body(kind, data)?),
            "ExitStarted" => ObsEventData::ExitStarted,
            "StudioModeStateChanged" => {
                ObsEventData::StudioModeStateChanged(parse_body(kind, data)?)
            }
            other => return Err(EventParseError::UnknownKind(other.to_string())),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ObsEventData::CurrentProgramSceneChanged(_) => "CurrentProgramSceneChanged",
            ObsEventData::SceneCreated(_) => "SceneCreated",
            ObsEventData::SceneRemoved(_) => "SceneRemoved",
            ObsEventData::SceneNameChanged(_) => "SceneNameChanged",
            ObsEventData::InputCreated(_) => "InputCreated",
            ObsEventData::InputRemoved(_) => "InputRemoved",
            ObsEventData::InputMuteStateChanged(_) => "InputMuteStateChanged",
            ObsEventData::InputVolumeChanged(_) => "InputVolumeChanged",
            ObsEventData::StreamStateChanged(_) => "StreamStateChanged",
            ObsEventData::RecordStateChanged(_) => "RecordStateChanged",
            ObsEventData::ExitStarted => "ExitStarted",
            ObsEventData::StudioModeStateChanged(_) => "StudioModeStateChanged",
        }
    }

    pub fn priority(&self) -> ObsEventPriority {
        match self {
            ObsEventData::InputMuteStateChanged(_) => ObsEventPriority::High,
            ObsEventData::StreamStateChanged(_)
            | ObsEventData::RecordStateChanged(_)
            | ObsEventData::ExitStarted => ObsEventPriority::Critical,
            _ => ObsEventPriority::Normal,
        }
    }

    pub fn category(&self) -> ObsEventCategory {
        match self {
            ObsEventData::CurrentProgramSceneChanged(_)
            | ObsEventData::SceneCreated(_)
            | ObsEventData::SceneRemoved(_)
            | ObsEventData::SceneNameChanged(_) => ObsEventCategory::Scenes,
            ObsEventData::InputCreated(_)
            | ObsEventData::InputRemoved(_)
            | ObsEventData::InputMuteStateChanged(_)
            | ObsEventData::InputVolumeChanged(_) => ObsEventCategory::Inputs,
            ObsEventData::StreamStateChanged(_) | ObsEventData::RecordStateChanged(_) => {
                ObsEventCategory::Outputs
            }
            ObsEventData::ExitStarted => ObsEventCategory::General,
            ObsEventData::StudioModeStateChanged(_) => ObsEventCategory::Ui,
        }
    }

    fn to_value(&self) -> Value {
        let value = match self {
            ObsEventData::CurrentProgramSceneChanged(d) => serde_json::to_value(d),
            ObsEventData::SceneCreated(d) | ObsEventData::SceneRemoved(d) => {
                serde_json::to_value(d)
            }
            ObsEventData::SceneNameChanged(d) => serde_json::to_value(d),
            ObsEventData::InputCreated(d) => serde_json::to_value(d),
            ObsEventData::InputRemoved(d) => serde_json::to_value(d),
            ObsEventData::InputMuteStateChanged(d) => serde_json::to_value(d),
            ObsEventData::InputVolumeChanged(d) => serde_json::to_value(d),
            ObsEventData::StreamStateChanged(d) | ObsEventData::RecordStateChanged(d) => {
                serde_json::to_value(d)
            }
            ObsEventData::ExitStarted => Ok(Value::Object(Map::new())),
            ObsEventData::StudioModeStateChanged(d) => serde_json::to_value(d),
        };
        value.unwrap_or(Value::Null)
    }
}

/// A parsed inbound OBS event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RawObsEvent", try_from = "RawObsEvent")]
pub struct ObsEvent {
    pub timestamp: DateTime<Utc>,
    pub data: ObsEventData,
    /// Correlation scope open when the event was emitted
    pub correlation_id: Option<Uuid>,
}

impl ObsEvent {
    /// Wrap typed data with the current time
    pub fn new(data: ObsEventData) -> Self {
        Self {
            timestamp: Utc::now(),
            data,
            correlation_id: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn parse(raw: RawObsEvent) -> Result<Self, EventParseError> {
        let data = ObsEventData::from_parts(&raw.event_type, raw.event_data)?;
        Ok(Self {
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
            data,
            correlation_id: raw.correlation_id,
        })
    }

    /// Parse from a raw JSON value as received from OBS
    pub fn from_value(value: &Value) -> Result<Self, EventParseError> {
        let event_type = value
            .get("eventType")
            .or_else(|| value.get("event_type"))
            .and_then(Value::as_str)
            .ok_or_else(|| EventParseError::MissingField("eventType".to_string()))?;
        let raw: RawObsEvent =
            serde_json::from_value(value.clone()).map_err(|e| EventParseError::InvalidPayload {
                kind: event_type.to_string(),
                message: e.to_string(),
            })?;
        Self::parse(raw)
    }

    pub fn event_type(&self) -> &'static str {
        self.data.kind()
    }

    pub fn priority(&self) -> ObsEventPriority {
        self.data.priority()
    }

    pub fn category(&self) -> ObsEventCategory {
        self.data.category()
    }

    pub fn to_raw(&self) -> RawObsEvent {
        RawObsEvent {
            event_type: self.event_type().to_string(),
            event_data: self.data.to_value(),
            timestamp: Some(self.timestamp),
            correlation_id: self.correlation_id,
        }
    }
}

impl From<ObsEvent> for RawObsEvent {
    fn from(event: ObsEvent) -> Self {
        event.to_raw()
    }
}

impl TryFrom<RawObsEvent> for ObsEvent {
    type Error = EventParseError;

    fn try_from(raw: RawObsEvent) -> Result<Self, Self::Error> {
        ObsEvent::parse(raw)
    }
}

impl fmt::Display for ObsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.event_type(), self.timestamp.to_rfc3339())
    }
}
