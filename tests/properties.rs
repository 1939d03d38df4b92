//! Property tests over generated event histories

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::Map;

use obs_chronicle::debugger::DebugSession;
use obs_chronicle::event_store::{EventFilter, EventStore};
use obs_chronicle::projections::ProjectionBuilder;
use obs_chronicle::types::{
    Event, EventPayload, InputMuteChangedData, SceneCreatedData, SceneSwitchedData,
    StreamStartedData, StreamStoppedData,
};

const SCENES: [&str; 4] = ["Intro", "Main", "BRB", "Outro"];

#[derive(Debug, Clone)]
enum Step {
    Create(usize),
    Switch(usize),
    StreamStart,
    StreamStop(u64),
    Mute(bool),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..SCENES.len()).prop_map(Step::Create),
        (0..SCENES.len()).prop_map(Step::Switch),
        Just(Step::StreamStart),
        (0u64..7200).prop_map(Step::StreamStop),
        any::<bool>().prop_map(Step::Mute),
    ]
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap()
}

/// Events for `steps`, with timestamps offset by `gaps` seconds
fn history(steps: &[(Step, i64)]) -> Vec<Event> {
    let mut at = base_time();
    steps
        .iter()
        .map(|(step, gap)| {
            at += Duration::seconds(*gap);
            let (aggregate, payload) = match step {
                Step::Create(i) => (
                    format!("scene:{}", SCENES[*i]),
                    EventPayload::SceneCreated(SceneCreatedData {
                        scene_name: SCENES[*i].to_string(),
                        scene_settings: Map::new(),
                    }),
                ),
                Step::Switch(i) => (
                    "obs_system".to_string(),
                    EventPayload::SceneSwitched(SceneSwitchedData {
                        from_scene: String::new(),
                        to_scene: SCENES[*i].to_string(),
                        transition_type: None,
                        transition_duration: None,
                    }),
                ),
                Step::StreamStart => (
                    "stream".to_string(),
                    EventPayload::StreamStarted(StreamStartedData::default()),
                ),
                Step::StreamStop(duration) => (
                    "stream".to_string(),
                    EventPayload::StreamStopped(StreamStoppedData {
                        duration_seconds: *duration,
                        ..Default::default()
                    }),
                ),
                Step::Mute(muted) => (
                    "source:Mic".to_string(),
                    EventPayload::InputMuteChanged(InputMuteChangedData {
                        input_name: "Mic".to_string(),
                        muted: *muted,
                    }),
                ),
            };
            Event::new(aggregate, payload).with_timestamp(at)
        })
        .collect()
}

fn steps() -> impl Strategy<Value = Vec<(Step, i64)>> {
    prop::collection::vec((step(), 0i64..600), 0..40)
}

fn stored(events: Vec<Event>) -> Arc<EventStore> {
    let store = Arc::new(EventStore::in_memory());
    store.append_all(events).unwrap();
    store
}

fn session(store: &EventStore) -> DebugSession {
    DebugSession::new(
        base_time() - Duration::hours(1),
        base_time() + Duration::days(2),
        store.all_events(),
    )
}

proptest! {
    #[test]
    fn projections_rebuild_equals_live(steps in steps()) {
        let store = Arc::new(EventStore::in_memory());
        let live = Arc::new(ProjectionBuilder::with_builtins());
        live.attach(&store);
        store.append_all(history(&steps)).unwrap();

        let rebuilt = ProjectionBuilder::with_builtins();
        rebuilt.rebuild_all(&store.all_events());

        for name in live.names() {
            prop_assert_eq!(
                live.state(&name).map(|s| s.data),
                rebuilt.state(&name).map(|s| s.data)
            );
        }
        prop_assert_eq!(live.versions(), rebuilt.versions());
    }

    #[test]
    fn store_queries_preserve_append_order(steps in steps(), reversed in any::<bool>()) {
        let mut events = history(&steps);
        if reversed {
            // timestamps running backwards must not reorder the log
            events.reverse();
        }
        let ids: Vec<_> = events.iter().map(|e| e.id()).collect();
        let store = stored(events);

        let all = store.query(&EventFilter::new());
        prop_assert_eq!(all.iter().map(|e| e.id()).collect::<Vec<_>>(), ids);

        let stream = store.load_aggregate("stream");
        prop_assert!(stream.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn stepping_back_then_forward_round_trips(
        steps in steps(),
        position in 0usize..40,
        n in 0usize..40,
    ) {
        let store = stored(history(&steps));
        let mut session = session(&store);
        session.seek(position);

        let cursor = session.cursor();
        let state = session.state().clone();
        let n = n.min(cursor);

        session.step_backward(n);
        session.step_forward(n);

        prop_assert_eq!(session.cursor(), cursor);
        prop_assert_eq!(session.state(), &state);
    }

    #[test]
    fn what_if_is_pure(steps in steps(), position in 0usize..40) {
        let store = stored(history(&steps));
        let before = store.all_events();
        let mut session = session(&store);
        session.seek(position);

        let cursor = session.cursor();
        let state = session.state().clone();

        let _ = session.what_if(|mut events| {
            events.reverse();
            events.truncate(events.len() / 2);
            events
        });

        prop_assert_eq!(session.cursor(), cursor);
        prop_assert_eq!(session.state(), &state);
        prop_assert_eq!(store.all_events(), before);
    }
}
