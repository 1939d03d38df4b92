//! System state reconstructed by replaying events

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::{Event, EventPayload};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceState {
    #[serde(rename = "type")]
    pub source_type: Option<String>,
    pub volume: Option<f64>,
    pub muted: bool,
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    pub name: Option<String>,
    pub triggers: u64,
    pub executions: u64,
    pub failures: u64,
}

/// OBS state as of some point in the event history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub current_scene: String,
    pub previous_scene: Option<String>,
    pub is_streaming: bool,
    pub is_recording: bool,
    pub scenes: Vec<String>,
    pub sources: BTreeMap<String, SourceState>,
    pub automation_rules: BTreeMap<String, RuleState>,
    pub event_count: usize,
    pub last_event_id: Option<Uuid>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            current_scene: "Unknown".to_string(),
            previous_scene: None,
            is_streaming: false,
            is_recording: false,
            scenes: Vec::new(),
            sources: BTreeMap::new(),
            automation_rules: BTreeMap::new(),
            event_count: 0,
            last_event_id: None,
        }
    }
}

impl SystemState {
    /// Fold `events` in order from the default state
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut state = Self::default();
        for event in events {
            state.apply(event);
        }
        state
    }

    pub fn apply(&mut self, event: &Event) {
        self.event_count += 1;
        self.last_event_id = Some(event.id());

        match &event.payload {
            EventPayload::SceneCreated(data) => {
                if !self.scenes.contains(&data.scene_name) {
                    self.scenes.push(data.scene_name.clone());
                }
            }
            EventPayload::SceneDeleted(data) => {
                self.scenes.retain(|s| s != &data.scene_name);
            }
            EventPayload::SceneSwitched(data) => {
                let previous = std::mem::replace(&mut self.current_scene, data.to_scene.clone());
                self.previous_scene = Some(previous);
            }
            EventPayload::SourceCreated(data) => {
                let source = self.sources.entry(data.source_name.clone()).or_default();
                source.source_type = Some(data.source_type.clone());
                source.settings = data.source_settings.clone();
            }
            EventPayload::SourceVolumeChanged(data) => {
                self.sources.entry(data.source_name.clone()).or_default().volume =
                    Some(data.new_volume);
            }
            EventPayload::InputMuteChanged(data) => {
                self.sources.entry(data.input_name.clone()).or_default().muted = data.muted;
            }
            EventPayload::StreamStarted(_) => self.is_streaming = true,
            EventPayload::StreamStopped(_) => self.is_streaming = false,
            EventPayload::RecordingStarted(_) => self.is_recording = true,
            EventPayload::RecordingStopped(_) => self.is_recording = false,
            EventPayload::AutomationRuleCreated(data) => {
                self.rule(&data.rule_id).name = Some(data.rule_name.clone());
            }
            EventPayload::AutomationRuleTriggered(data) => self.rule(&data.rule_id).triggers += 1,
            EventPayload::AutomationRuleExecuted(data) => self.rule(&data.rule_id).executions += 1,
            EventPayload::AutomationRuleFailed(data) => self.rule(&data.rule_id).failures += 1,
            EventPayload::SystemError(_) | EventPayload::SystemPerformanceWarning(_) => {}
        }
    }

    fn rule(&mut self, rule_id: &str) -> &mut RuleState {
        self.automation_rules.entry(rule_id.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        InputMuteChangedData, RecordingStartedData, SceneCreatedData, SceneSwitchedData,
        SourceCreatedData,
    };
    use serde_json::json;

    #[test]
    fn test_empty_replay_is_default() {
        let state = SystemState::replay(std::iter::empty());
        assert_eq!(state, SystemState::default());
        assert_eq!(state.current_scene, "Unknown");
    }

    #[test]
    fn test_replay() {
        let events = vec![
            Event::new(
                "scene:Main",
                EventPayload::SceneCreated(SceneCreatedData {
                    scene_name: "Main".to_string(),
                    scene_settings: Map::new(),
                }),
            ),
            Event::new(
                "obs_system",
                EventPayload::SceneSwitched(SceneSwitchedData {
                    from_scene: "Unknown".to_string(),
                    to_scene: "Main".to_string(),
                    transition_type: None,
                    transition_duration: None,
                }),
            ),
            Event::new(
                "source:Mic",
                EventPayload::SourceCreated(SourceCreatedData {
                    source_name: "Mic".to_string(),
                    source_type: "wasapi_input_capture".to_string(),
                    source_settings: Map::new(),
                    scene_name: Some("Main".to_string()),
                }),
            ),
            Event::new(
                "source:Mic",
                EventPayload::InputMuteChanged(InputMuteChangedData {
                    input_name: "Mic".to_string(),
                    muted: true,
                }),
            ),
            Event::new(
                "recording",
                EventPayload::RecordingStarted(RecordingStartedData::default()),
            ),
        ];

        let state = SystemState::replay(&events);
        assert_eq!(state.current_scene, "Main");
        assert_eq!(state.previous_scene.as_deref(), Some("Unknown"));
        assert_eq!(state.scenes, vec!["Main"]);
        assert!(state.is_recording);
        assert!(!state.is_streaming);
        assert!(state.sources["Mic"].muted);
        assert_eq!(state.event_count, 5);
        assert_eq!(state.last_event_id, Some(events[4].id()));

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["sources"]["Mic"]["type"], json!("wasapi_input_capture"));
    }
}
