//! Built-in read models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Event, EventPayload, EventType};
use crate::utils::time::hour_of_day;

use super::Projection;

pub const SCENES: &str = "scenes";
pub const STREAMING: &str = "streaming";
pub const AUTOMATION: &str = "automation";
pub const PERFORMANCE: &str = "performance";
pub const AUDIO: &str = "audio";

const STREAM_HISTORY_LIMIT: usize = 100;
const RECENT_EXECUTIONS_LIMIT: usize = 50;

fn unknown_scene() -> String {
    "Unknown".to_string()
}

/// Scene usage: current scene, switch count, time spent per scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    pub current_scene: String,
    pub previous_scene: Option<String>,
    pub scenes: Vec<String>,
    pub scene_switch_count: u64,
    pub last_switch_time: Option<DateTime<Utc>>,
    /// Seconds spent in each scene, closed at the next switch
    pub scene_durations: BTreeMap<String, f64>,
    pub most_used_scene: Option<String>,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            current_scene: unknown_scene(),
            previous_scene: None,
            scenes: Vec::new(),
            scene_switch_count: 0,
            last_switch_time: None,
            scene_durations: BTreeMap::new(),
            most_used_scene: None,
        }
    }
}

pub struct SceneProjection;

impl Projection for SceneProjection {
    type State = SceneState;

    fn name(&self) -> &str {
        SCENES
    }

    fn initial_state(&self) -> SceneState {
        SceneState::default()
    }

    fn interested_in(&self) -> &[EventType] {
        &[
            EventType::SceneCreated,
            EventType::SceneSwitched,
            EventType::SceneDeleted,
        ]
    }

    fn apply(&self, state: &mut SceneState, event: &Event) {
        match &event.payload {
            EventPayload::SceneCreated(data) => {
                if !state.scenes.contains(&data.scene_name) {
                    state.scenes.push(data.scene_name.clone());
                }
            }
            EventPayload::SceneSwitched(data) => {
                let previous = std::mem::replace(&mut state.current_scene, data.to_scene.clone());
                state.scene_switch_count += 1;

                if let Some(last) = state.last_switch_time {
                    let seconds = (event.timestamp() - last).num_milliseconds().max(0) as f64 / 1000.0;
                    *state.scene_durations.entry(previous.clone()).or_insert(0.0) += seconds;
                }
                state.previous_scene = Some(previous);
                state.last_switch_time = Some(event.timestamp());

                state.most_used_scene = state
                    .scene_durations
                    .iter()
                    .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
                    .map(|(name, _)| name.clone());
            }
            EventPayload::SceneDeleted(data) => {
                state.scenes.retain(|s| s != &data.scene_name);
            }
            _ => {}
        }
    }
}

/// One finished stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub duration: u64,
    pub frames: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingState {
    pub is_streaming: bool,
    pub stream_start_time: Option<DateTime<Utc>>,
    pub total_stream_time: u64,
    pub stream_count: u64,
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub bytes_sent: u64,
    pub average_stream_duration: f64,
    pub longest_stream_duration: u64,
    /// Last 100 streams, oldest first
    pub stream_history: Vec<StreamRecord>,
}

pub struct StreamingProjection;

impl Projection for StreamingProjection {
    type State = StreamingState;

    fn name(&self) -> &str {
        STREAMING
    }

    fn initial_state(&self) -> StreamingState {
        StreamingState::default()
    }

    fn interested_in(&self) -> &[EventType] {
        &[EventType::StreamStarted, EventType::StreamStopped]
    }

    fn apply(&self, state: &mut StreamingState, event: &Event) {
        match &event.payload {
            EventPayload::StreamStarted(_) => {
                state.is_streaming = true;
                state.stream_start_time = Some(event.timestamp());
                state.stream_count += 1;
            }
            EventPayload::StreamStopped(data) => {
                state.is_streaming = false;
                state.total_stream_time += data.duration_seconds;
                state.total_frames += data.total_frames;
                state.dropped_frames += data.dropped_frames;
                state.bytes_sent += data.bytes_sent;

                if state.stream_count > 0 {
                    state.average_stream_duration =
                        state.total_stream_time as f64 / state.stream_count as f64;
                }
                state.longest_stream_duration =
                    state.longest_stream_duration.max(data.duration_seconds);

                state.stream_history.push(StreamRecord {
                    start_time: state.stream_start_time.take(),
                    end_time: event.timestamp(),
                    duration: data.duration_seconds,
                    frames: data.total_frames,
                    dropped: data.dropped_frames,
                });
                if state.stream_history.len() > STREAM_HISTORY_LIMIT {
                    let excess = state.stream_history.len() - STREAM_HISTORY_LIMIT;
                    state.stream_history.drain(..excess);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    pub name: String,
    pub trigger_count: u64,
    pub execution_count: u64,
    pub failure_count: u64,
    pub total_execution_time: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub rule_id: String,
    pub rule_name: String,
    pub timestamp: DateTime<Utc>,
    pub execution_time_ms: f64,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationState {
    pub rules: BTreeMap<String, RuleStats>,
    pub total_executions: u64,
    pub total_failures: u64,
    /// Mean execution time in ms across all executions of known rules
    pub average_execution_time: f64,
    pub most_triggered_rule: Option<String>,
    /// Last 50 executions, oldest first
    pub recent_executions: Vec<ExecutionRecord>,
}

pub struct AutomationProjection;

impl Projection for AutomationProjection {
    type State = AutomationState;

    fn name(&self) -> &str {
        AUTOMATION
    }

    fn initial_state(&self) -> AutomationState {
        AutomationState::default()
    }

    fn interested_in(&self) -> &[EventType] {
        &[
            EventType::AutomationRuleCreated,
            EventType::AutomationRuleTriggered,
            EventType::AutomationRuleExecuted,
            EventType::AutomationRuleFailed,
        ]
    }

    fn apply(&self, state: &mut AutomationState, event: &Event) {
        match &event.payload {
            EventPayload::AutomationRuleCreated(data) => {
                state.rules.insert(
                    data.rule_id.clone(),
                    RuleStats {
                        name: data.rule_name.clone(),
                        trigger_count: 0,
                        execution_count: 0,
                        failure_count: 0,
                        total_execution_time: 0.0,
                        enabled: true,
                    },
                );
            }
            EventPayload::AutomationRuleTriggered(data) => {
                if let Some(rule) = state.rules.get_mut(&data.rule_id) {
                    rule.trigger_count += 1;
                }
                state.most_triggered_rule = state
                    .rules
                    .iter()
                    .max_by(|a, b| a.1.trigger_count.cmp(&b.1.trigger_count).then_with(|| b.0.cmp(a.0)))
                    .map(|(id, _)| id.clone());
            }
            EventPayload::AutomationRuleExecuted(data) => {
                state.total_executions += 1;
                if let Some(rule) = state.rules.get_mut(&data.rule_id) {
                    rule.execution_count += 1;
                    rule.total_execution_time += data.execution_time_ms;
                }

                let total_time: f64 = state.rules.values().map(|r| r.total_execution_time).sum();
                state.average_execution_time = total_time / state.total_executions as f64;

                state.recent_executions.push(ExecutionRecord {
                    rule_id: data.rule_id.clone(),
                    rule_name: data.rule_name.clone(),
                    timestamp: event.timestamp(),
                    execution_time_ms: data.execution_time_ms,
                    actions: data.actions_executed.clone(),
                });
                if state.recent_executions.len() > RECENT_EXECUTIONS_LIMIT {
                    let excess = state.recent_executions.len() - RECENT_EXECUTIONS_LIMIT;
                    state.recent_executions.drain(..excess);
                }
            }
            EventPayload::AutomationRuleFailed(data) => {
                state.total_failures += 1;
                if let Some(rule) = state.rules.get_mut(&data.rule_id) {
                    rule.failure_count += 1;
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceState {
    pub event_counts_by_type: BTreeMap<String, u64>,
    /// Events per hour of day (UTC)
    pub hourly: BTreeMap<u32, u64>,
    pub busiest_hour: Option<u32>,
    pub error_count: u64,
    pub warning_count: u64,
}

pub struct PerformanceProjection;

impl Projection for PerformanceProjection {
    type State = PerformanceState;

    fn name(&self) -> &str {
        PERFORMANCE
    }

    fn initial_state(&self) -> PerformanceState {
        PerformanceState::default()
    }

    fn apply(&self, state: &mut PerformanceState, event: &Event) {
        *state
            .event_counts_by_type
            .entry(event.event_type().to_string())
            .or_insert(0) += 1;

        *state.hourly.entry(hour_of_day(event.timestamp())).or_insert(0) += 1;
        state.busiest_hour = state
            .hourly
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(hour, _)| *hour);

        match event.event_type() {
            EventType::SystemError => state.error_count += 1,
            EventType::SystemPerformanceWarning => state.warning_count += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputAudio {
    pub muted: bool,
    pub volume: Option<f64>,
    pub volume_db: Option<f64>,
}

/// Mute state and volume per input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioState {
    pub inputs: BTreeMap<String, InputAudio>,
}

impl AudioState {
    pub fn muted_inputs(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .filter(|(_, a)| a.muted)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

pub struct AudioProjection;

impl Projection for AudioProjection {
    type State = AudioState;

    fn name(&self) -> &str {
        AUDIO
    }

    fn initial_state(&self) -> AudioState {
        AudioState::default()
    }

    fn interested_in(&self) -> &[EventType] {
        &[
            EventType::SourceCreated,
            EventType::InputMuteChanged,
            EventType::SourceVolumeChanged,
        ]
    }

    fn apply(&self, state: &mut AudioState, event: &Event) {
        match &event.payload {
            EventPayload::SourceCreated(data) => {
                state.inputs.entry(data.source_name.clone()).or_default();
            }
            EventPayload::InputMuteChanged(data) => {
                state.inputs.entry(data.input_name.clone()).or_default().muted = data.muted;
            }
            EventPayload::SourceVolumeChanged(data) => {
                let input = state.inputs.entry(data.source_name.clone()).or_default();
                input.volume = Some(data.new_volume);
                input.volume_db = data.volume_db;
            }
            _ => {}
        }
    }
}
