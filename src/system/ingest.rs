//! Translation of inbound OBS events into domain events

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{
    scene_aggregate, source_aggregate, Event, EventPayload, InputMuteChangedData, ObsEvent,
    ObsEventData, RecordingStartedData, RecordingStoppedData, SceneCreatedData, SceneDeletedData,
    SceneSwitchedData, SourceCreatedData, SourceVolumeChangedData, StreamStartedData,
    StreamStoppedData, OBS_SYSTEM_AGGREGATE, RECORDING_AGGREGATE, STREAM_AGGREGATE,
};
use crate::utils::time::span_seconds;

/// Maps OBS notifications onto domain events
///
/// Keeps just enough state to fill in what OBS leaves out: the scene being
/// switched away from, the previous volume of each input and when the
/// current stream or recording started.
#[derive(Debug, Default)]
pub struct ObsEventTranslator {
    current_scene: Option<String>,
    volumes: HashMap<String, f64>,
    stream_started_at: Option<DateTime<Utc>>,
    recording_started_at: Option<DateTime<Utc>>,
}

impl ObsEventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_scene(&self) -> Option<&str> {
        self.current_scene.as_deref()
    }

    /// The domain event for `event`, if it has one
    pub fn translate(&mut self, event: &ObsEvent) -> Option<Event> {
        let at = event.timestamp;
        let (aggregate_id, payload) = match &event.data {
            ObsEventData::CurrentProgramSceneChanged(data) => {
                let from_scene = self
                    .current_scene
                    .replace(data.scene_name.clone())
                    .unwrap_or_else(|| "Unknown".to_string());
                (
                    OBS_SYSTEM_AGGREGATE.to_string(),
                    EventPayload::SceneSwitched(SceneSwitchedData {
                        from_scene,
                        to_scene: data.scene_name.clone(),
                        transition_type: None,
                        transition_duration: None,
                    }),
                )
            }
            ObsEventData::SceneCreated(data) => (
                scene_aggregate(&data.scene_name),
                EventPayload::SceneCreated(SceneCreatedData {
                    scene_name: data.scene_name.clone(),
                    scene_settings: Default::default(),
                }),
            ),
            ObsEventData::SceneRemoved(data) => (
                scene_aggregate(&data.scene_name),
                EventPayload::SceneDeleted(SceneDeletedData {
                    scene_name: data.scene_name.clone(),
                }),
            ),
            ObsEventData::InputCreated(data) => {
                let source_type = if data.unversioned_input_kind.is_empty() {
                    data.input_kind.clone()
                } else {
                    data.unversioned_input_kind.clone()
                };
                (
                    source_aggregate(&data.input_name),
                    EventPayload::SourceCreated(SourceCreatedData {
                        source_name: data.input_name.clone(),
                        source_type,
                        source_settings: data.input_settings.clone(),
                        scene_name: self.current_scene.clone(),
                    }),
                )
            }
            ObsEventData::InputMuteStateChanged(data) => (
                source_aggregate(&data.input_name),
                EventPayload::InputMuteChanged(InputMuteChangedData {
                    input_name: data.input_name.clone(),
                    muted: data.input_muted,
                }),
            ),
            ObsEventData::InputVolumeChanged(data) => {
                let old_volume = self
                    .volumes
                    .insert(data.input_name.clone(), data.input_volume_mul)
                    .unwrap_or(1.0);
                (
                    source_aggregate(&data.input_name),
                    EventPayload::SourceVolumeChanged(SourceVolumeChangedData {
                        source_name: data.input_name.clone(),
                        old_volume,
                        new_volume: data.input_volume_mul,
                        volume_db: Some(data.input_volume_db),
                    }),
                )
            }
            ObsEventData::StreamStateChanged(state) if state.is_started() => {
                self.stream_started_at = Some(at);
                (
                    STREAM_AGGREGATE.to_string(),
                    EventPayload::StreamStarted(StreamStartedData::default()),
                )
            }
            ObsEventData::StreamStateChanged(state) if state.is_stopped() => {
                let duration_seconds = elapsed(self.stream_started_at.take(), at);
                (
                    STREAM_AGGREGATE.to_string(),
                    EventPayload::StreamStopped(StreamStoppedData {
                        duration_seconds,
                        ..Default::default()
                    }),
                )
            }
            ObsEventData::RecordStateChanged(state) if state.is_started() => {
                self.recording_started_at = Some(at);
                (
                    RECORDING_AGGREGATE.to_string(),
                    EventPayload::RecordingStarted(RecordingStartedData {
                        output_path: state.output_path.clone(),
                    }),
                )
            }
            ObsEventData::RecordStateChanged(state) if state.is_stopped() => {
                let duration_seconds = elapsed(self.recording_started_at.take(), at);
                (
                    RECORDING_AGGREGATE.to_string(),
                    EventPayload::RecordingStopped(RecordingStoppedData {
                        output_path: state.output_path.clone(),
                        duration_seconds,
                    }),
                )
            }
            _ => return None,
        };

        let domain_event = Event::new(aggregate_id, payload).with_timestamp(at);
        Some(match event.correlation_id {
            Some(id) => domain_event.with_correlation_id(id),
            None => domain_event,
        })
    }
}

fn elapsed(started_at: Option<DateTime<Utc>>, at: DateTime<Utc>) -> u64 {
    started_at.map(|start| span_seconds(start, at) as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, RawObsEvent, OUTPUT_STARTED, OUTPUT_STOPPED};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn obs(kind: &str, data: serde_json::Value) -> ObsEvent {
        ObsEvent::parse(RawObsEvent::new(kind, data)).unwrap()
    }

    #[test]
    fn test_correlation_carried_onto_domain_event() {
        let mut translator = ObsEventTranslator::new();
        let id = uuid::Uuid::new_v4();

        let tagged = obs("CurrentProgramSceneChanged", json!({"sceneName": "Intro"}))
            .with_correlation_id(id);
        assert_eq!(translator.translate(&tagged).unwrap().correlation_id(), Some(id));

        let untagged = obs("CurrentProgramSceneChanged", json!({"sceneName": "Main"}));
        assert_eq!(translator.translate(&untagged).unwrap().correlation_id(), None);
    }

    #[test]
    fn test_scene_switches_track_previous_scene() {
        let mut translator = ObsEventTranslator::new();

        let first = translator
            .translate(&obs("CurrentProgramSceneChanged", json!({"sceneName": "Intro"})))
            .unwrap();
        let second = translator
            .translate(&obs("CurrentProgramSceneChanged", json!({"sceneName": "Main"})))
            .unwrap();

        assert_eq!(first.aggregate_id, "obs_system");
        match (&first.payload, &second.payload) {
            (EventPayload::SceneSwitched(a), EventPayload::SceneSwitched(b)) => {
                assert_eq!(a.from_scene, "Unknown");
                assert_eq!(b.from_scene, "Intro");
                assert_eq!(b.to_scene, "Main");
            }
            other => panic!("unexpected payloads {:?}", other),
        }
        assert_eq!(translator.current_scene(), Some("Main"));
    }

    #[test]
    fn test_volume_keeps_previous_level() {
        let mut translator = ObsEventTranslator::new();
        let data = |mul: f64| json!({"inputName": "Mic", "inputVolumeMul": mul, "inputVolumeDb": -6.0});

        translator.translate(&obs("InputVolumeChanged", data(0.5))).unwrap();
        let event = translator.translate(&obs("InputVolumeChanged", data(0.25))).unwrap();

        match event.payload {
            EventPayload::SourceVolumeChanged(v) => {
                assert_eq!(v.old_volume, 0.5);
                assert_eq!(v.new_volume, 0.25);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_stream_duration() {
        let mut translator = ObsEventTranslator::new();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        let state = |s: &str, active: bool| json!({"outputActive": active, "outputState": s});

        let started = translator
            .translate(&obs("StreamStateChanged", state(OUTPUT_STARTED, true)).at(t0))
            .unwrap();
        let stopped = translator
            .translate(
                &obs("StreamStateChanged", state(OUTPUT_STOPPED, false)).at(t0 + Duration::seconds(90)),
            )
            .unwrap();

        assert_eq!(started.event_type(), EventType::StreamStarted);
        assert_eq!(started.timestamp(), t0);
        match stopped.payload {
            EventPayload::StreamStopped(data) => assert_eq!(data.duration_seconds, 90),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_unmapped_events() {
        let mut translator = ObsEventTranslator::new();
        assert!(translator.translate(&ObsEvent::new(ObsEventData::ExitStarted)).is_none());
        assert!(translator
            .translate(&obs(
                "StreamStateChanged",
                json!({"outputActive": true, "outputState": "OBS_WEBSOCKET_OUTPUT_STARTING"})
            ))
            .is_none());
        assert!(translator
            .translate(&obs("StudioModeStateChanged", json!({"studioModeEnabled": true})))
            .is_none());
    }

    #[test]
    fn test_input_created() {
        let mut translator = ObsEventTranslator::new();
        let event = translator
            .translate(&obs(
                "InputCreated",
                json!({
                    "inputName": "Mic",
                    "inputKind": "wasapi_input_capture_v2",
                    "unversionedInputKind": "wasapi_input_capture",
                    "inputSettings": {"device_id": "default"}
                }),
            ))
            .unwrap();

        assert_eq!(event.aggregate_id, "source:Mic");
        match event.payload {
            EventPayload::SourceCreated(data) => {
                assert_eq!(data.source_type, "wasapi_input_capture");
                assert_eq!(data.source_settings["device_id"], json!("default"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
