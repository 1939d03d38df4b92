//! A debug session over a fixed range of the event log

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::types::{Event, EventType};
use crate::utils::time::{format_duration, span_seconds};

use super::pattern::find_pattern;
use super::state::SystemState;
use super::DebuggerError;

pub type BreakpointFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// A registered breakpoint condition and the event it first matched
#[derive(Clone)]
pub struct Breakpoint {
    pub id: usize,
    /// Position of the matched event within the session
    pub index: usize,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    condition: BreakpointFn,
}

impl Breakpoint {
    pub fn matches(&self, event: &Event) -> bool {
        (self.condition)(event)
    }
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoint")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("event_id", &self.event_id)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Where `continue_to_breakpoint` stopped
#[derive(Debug, Clone)]
pub struct BreakpointHit {
    pub breakpoint_id: usize,
    pub index: usize,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatistics {
    pub total_events: usize,
    pub event_rate_per_second: f64,
    pub time_span_seconds: f64,
    pub time_span: String,
    pub event_types: BTreeMap<String, usize>,
    /// Top 10 aggregates by event count
    pub most_active_aggregates: Vec<(String, usize)>,
    pub unique_correlations: usize,
}

/// A cursor over the events of a time range
///
/// The cursor counts how many events have been applied: `state` always
/// equals the replay of `events[..cursor]`. A new session starts with the
/// cursor at the end.
#[derive(Debug, Clone)]
pub struct DebugSession {
    id: Uuid,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    events: Vec<Event>,
    cursor: usize,
    state: SystemState,
    breakpoints: Vec<Breakpoint>,
}

impl DebugSession {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>, mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.sequence);
        let state = SystemState::replay(&events);
        Self {
            id: Uuid::new_v4(),
            since,
            until,
            cursor: events.len(),
            events,
            state,
            breakpoints: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.since, self.until)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// The last applied event, if any
    pub fn current_event(&self) -> Option<&Event> {
        self.cursor.checked_sub(1).map(|i| &self.events[i])
    }

    /// Apply up to `count` more events
    ///
    /// Returns the events passed over; empty at the end of the range.
    pub fn step_forward(&mut self, count: usize) -> (Vec<Event>, SystemState) {
        let end = self.cursor.saturating_add(count).min(self.events.len());
        let passed = self.events[self.cursor..end].to_vec();
        for event in &passed {
            self.state.apply(event);
        }
        self.cursor = end;
        (passed, self.state.clone())
    }

    /// Undo up to `count` events
    ///
    /// State is rebuilt from the start of the range. Returns the undone
    /// events in log order.
    pub fn step_backward(&mut self, count: usize) -> (Vec<Event>, SystemState) {
        let start = self.cursor.saturating_sub(count);
        let undone = self.events[start..self.cursor].to_vec();
        self.move_to(start);
        (undone, self.state.clone())
    }

    /// Move to the last event at or before `timestamp`
    pub fn goto(&mut self, timestamp: DateTime<Utc>) -> SystemState {
        let position = self
            .events
            .iter()
            .take_while(|e| e.timestamp() <= timestamp)
            .count();
        self.move_to(position);
        self.state.clone()
    }

    /// Move the cursor to `position`, clamped to the range
    pub fn seek(&mut self, position: usize) -> SystemState {
        self.move_to(position.min(self.events.len()));
        self.state.clone()
    }

    fn move_to(&mut self, position: usize) {
        if position >= self.cursor {
            for event in &self.events[self.cursor..position] {
                self.state.apply(event);
            }
        } else {
            self.state = SystemState::replay(&self.events[..position]);
        }
        self.cursor = position;
    }

    /// Register a breakpoint at the first event from the cursor matching
    /// `condition`
    ///
    /// The cursor does not move.
    pub fn set_breakpoint<F>(&mut self, condition: F) -> Result<Breakpoint, DebuggerError>
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let index = self.events[self.cursor..]
            .iter()
            .position(|e| condition(e))
            .map(|offset| self.cursor + offset)
            .ok_or(DebuggerError::BreakpointNotMatched)?;

        let event = &self.events[index];
        let breakpoint = Breakpoint {
            id: self.breakpoints.len() + 1,
            index,
            event_id: event.id(),
            timestamp: event.timestamp(),
            condition: Arc::new(condition),
        };
        self.breakpoints.push(breakpoint.clone());
        Ok(breakpoint)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Run forward until an event matching any breakpoint has been applied
    pub fn continue_to_breakpoint(&mut self) -> Result<(BreakpointHit, SystemState), DebuggerError> {
        let hit = self.events[self.cursor..].iter().enumerate().find_map(|(offset, event)| {
            self.breakpoints
                .iter()
                .find(|bp| bp.matches(event))
                .map(|bp| (self.cursor + offset, bp.id))
        });

        let (index, breakpoint_id) = hit.ok_or(DebuggerError::NoBreakpointAhead)?;
        self.move_to(index + 1);
        let hit = BreakpointHit {
            breakpoint_id,
            index,
            event: self.events[index].clone(),
        };
        Ok((hit, self.state.clone()))
    }

    pub fn find_event_pattern(&self, kinds: &[EventType], within: Duration) -> Vec<Vec<Event>> {
        find_pattern(&self.events, kinds, within)
    }

    /// Events in the range caused by `event_id`, transitively
    ///
    /// Breadth-first over causation links; the queried event itself is
    /// not included. Result is in log order.
    pub fn analyze_causation_chain(&self, event_id: Uuid) -> Vec<Event> {
        let mut children: HashMap<Uuid, Vec<usize>> = HashMap::new();
        for (index, event) in self.events.iter().enumerate() {
            if let Some(cause) = event.causation_id() {
                children.entry(cause).or_default().push(index);
            }
        }

        let mut visited: HashSet<Uuid> = HashSet::from([event_id]);
        let mut found: Vec<usize> = Vec::new();
        let mut queue = VecDeque::from([event_id]);

        while let Some(id) = queue.pop_front() {
            for &index in children.get(&id).into_iter().flatten() {
                let child = self.events[index].id();
                if visited.insert(child) {
                    found.push(index);
                    queue.push_back(child);
                }
            }
        }

        found.sort_unstable();
        found.into_iter().map(|i| self.events[i].clone()).collect()
    }

    pub fn analyze_correlation_chain(&self, correlation_id: Uuid) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| e.correlation_id() == Some(correlation_id))
            .cloned()
            .collect()
    }

    /// Fold a modified copy of the range
    ///
    /// Neither the session nor the store is touched.
    pub fn what_if<F>(&self, modify: F) -> SystemState
    where
        F: FnOnce(Vec<Event>) -> Vec<Event>,
    {
        let modified = modify(self.events.clone());
        SystemState::replay(&modified)
    }

    pub fn statistics(&self) -> SessionStatistics {
        let mut event_types: BTreeMap<String, usize> = BTreeMap::new();
        let mut aggregates: HashMap<&str, usize> = HashMap::new();
        let mut correlations: HashSet<Uuid> = HashSet::new();

        for event in &self.events {
            *event_types.entry(event.event_type().to_string()).or_insert(0) += 1;
            *aggregates.entry(event.aggregate_id.as_str()).or_insert(0) += 1;
            if let Some(id) = event.correlation_id() {
                correlations.insert(id);
            }
        }

        let mut most_active_aggregates: Vec<(String, usize)> = aggregates
            .into_iter()
            .map(|(id, count)| (id.to_string(), count))
            .collect();
        most_active_aggregates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_active_aggregates.truncate(10);

        let span = match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => last.timestamp() - first.timestamp(),
            _ => Duration::zero(),
        };
        let time_span_seconds = span.num_milliseconds().max(0) as f64 / 1000.0;
        let event_rate_per_second = if self.events.len() > 1 {
            self.events.len() as f64 / time_span_seconds.max(1.0)
        } else {
            0.0
        };

        SessionStatistics {
            total_events: self.events.len(),
            event_rate_per_second,
            time_span_seconds,
            time_span: format_duration(span),
            event_types,
            most_active_aggregates,
            unique_correlations: correlations.len(),
        }
    }

    /// Session metadata, breakpoints, statistics, state and events as
    /// pretty JSON
    pub fn export_session(&self) -> Result<String, DebuggerError> {
        let breakpoints: Vec<_> = self
            .breakpoints
            .iter()
            .map(|bp| {
                json!({
                    "id": bp.id,
                    "index": bp.index,
                    "event_id": bp.event_id,
                    "timestamp": bp.timestamp,
                })
            })
            .collect();

        let events: Vec<_> = self.events.iter().map(Event::to_record).collect();
        let document = json!({
            "session_id": self.id,
            "start_time": self.since,
            "end_time": self.until,
            "span_seconds": span_seconds(self.since, self.until),
            "cursor": self.cursor,
            "event_count": self.events.len(),
            "breakpoints": breakpoints,
            "statistics": self.statistics(),
            "current_state": self.state,
            "events": events,
        });
        Ok(serde_json::to_string_pretty(&document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        EventPayload, SceneCreatedData, SceneSwitchedData, StreamStartedData,
    };
    use chrono::TimeZone;
    use serde_json::{Map, Value};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn switch(to: &str, at: i64) -> Event {
        Event::new(
            "obs_system",
            EventPayload::SceneSwitched(SceneSwitchedData {
                from_scene: String::new(),
                to_scene: to.to_string(),
                transition_type: None,
                transition_duration: None,
            }),
        )
        .with_timestamp(t(at))
    }

    fn session() -> DebugSession {
        let mut events = vec![
            Event::new(
                "scene:1",
                EventPayload::SceneCreated(SceneCreatedData {
                    scene_name: "Scene 1".to_string(),
                    scene_settings: Map::new(),
                }),
            )
            .with_timestamp(t(0)),
            switch("Scene 1", 1),
            switch("Scene 2", 2),
            Event::new("stream", EventPayload::StreamStarted(StreamStartedData::default()))
                .with_timestamp(t(3)),
            switch("Scene 3", 4),
        ];
        for (i, event) in events.iter_mut().enumerate() {
            *event = event.clone().with_sequence(i as u64 + 1);
        }
        DebugSession::new(t(0), t(10), events)
    }

    #[test]
    fn test_starts_at_end() {
        let session = session();
        assert_eq!(session.cursor(), 5);
        assert_eq!(session.state().current_scene, "Scene 3");
        assert!(session.state().is_streaming);
    }

    #[test]
    fn test_step_clamps() {
        let mut session = session();
        let (passed, _) = session.step_forward(3);
        assert!(passed.is_empty());

        let (undone, state) = session.step_backward(100);
        assert_eq!(undone.len(), 5);
        assert_eq!(state, SystemState::default());
        assert_eq!(session.cursor(), 0);

        let (undone, _) = session.step_backward(1);
        assert!(undone.is_empty());
    }

    #[test]
    fn test_step_round_trip() {
        let mut session = session();
        let before = session.state().clone();

        let (undone, mid) = session.step_backward(3);
        assert_eq!(undone.len(), 3);
        assert_eq!(mid.current_scene, "Scene 1");
        assert!(!mid.is_streaming);

        let (passed, after) = session.step_forward(3);
        assert_eq!(passed, undone);
        assert_eq!(after, before);
        assert_eq!(session.cursor(), 5);
    }

    #[test]
    fn test_goto_and_seek() {
        let mut session = session();
        let state = session.goto(t(2));
        assert_eq!(session.cursor(), 3);
        assert_eq!(state.current_scene, "Scene 2");

        let state = session.seek(99);
        assert_eq!(session.cursor(), 5);
        assert_eq!(state.current_scene, "Scene 3");

        session.goto(t(-5));
        assert_eq!(session.cursor(), 0);
        assert_eq!(session.current_event(), None);
    }

    #[test]
    fn test_breakpoints() {
        let mut session = session();
        session.seek(0);

        let bp = session
            .set_breakpoint(|e| e.event_type() == EventType::StreamStarted)
            .unwrap();
        assert_eq!(bp.index, 3);
        assert_eq!(session.cursor(), 0);

        let (hit, state) = session.continue_to_breakpoint().unwrap();
        assert_eq!(hit.index, 3);
        assert_eq!(hit.breakpoint_id, bp.id);
        assert_eq!(session.cursor(), 4);
        assert!(state.is_streaming);

        assert!(matches!(
            session.continue_to_breakpoint(),
            Err(DebuggerError::NoBreakpointAhead)
        ));
        assert!(matches!(
            session.set_breakpoint(|e| e.event_type() == EventType::StreamStarted),
            Err(DebuggerError::BreakpointNotMatched)
        ));
    }

    #[test]
    fn test_what_if_is_pure() {
        let session = session();
        let before = session.state().clone();

        let alternative = session.what_if(|events| {
            events
                .into_iter()
                .map(|e| match &e.payload {
                    EventPayload::SceneSwitched(data) if data.to_scene == "Scene 3" => {
                        e.with_payload(EventPayload::SceneSwitched(SceneSwitchedData {
                            to_scene: "Alternative Scene".to_string(),
                            ..data.clone()
                        }))
                    }
                    _ => e,
                })
                .collect()
        });

        assert_eq!(alternative.current_scene, "Alternative Scene");
        assert_eq!(session.state(), &before);
        assert_eq!(session.what_if(|_| Vec::new()), SystemState::default());
    }

    #[test]
    fn test_causation_chain() {
        let root = switch("A", 0).with_sequence(1);
        let child = switch("B", 1).with_causation_id(root.id()).with_sequence(2);
        let unrelated = switch("C", 2).with_sequence(3);
        let grandchild = switch("D", 3).with_causation_id(child.id()).with_sequence(4);
        let session = DebugSession::new(
            t(0),
            t(10),
            vec![root.clone(), child.clone(), unrelated, grandchild.clone()],
        );

        let chain = session.analyze_causation_chain(root.id());
        assert_eq!(chain, vec![child, grandchild]);
        assert!(session.analyze_causation_chain(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn test_statistics() {
        let session = session();
        let stats = session.statistics();
        assert_eq!(stats.total_events, 5);
        assert_eq!(stats.time_span_seconds, 4.0);
        assert_eq!(stats.event_rate_per_second, 1.25);
        assert_eq!(stats.time_span, "0:00:04");
        assert_eq!(stats.event_types.get("scene.switched"), Some(&3));
        assert_eq!(stats.most_active_aggregates[0], ("obs_system".to_string(), 3));
        assert_eq!(stats.unique_correlations, 0);

        let empty = DebugSession::new(t(0), t(10), Vec::new());
        assert_eq!(empty.statistics().event_rate_per_second, 0.0);
    }

    #[test]
    fn test_export_session() {
        let mut session = session();
        session.seek(1);
        session.set_breakpoint(|e| e.event_type() == EventType::StreamStarted).unwrap();

        let exported: Value = serde_json::from_str(&session.export_session().unwrap()).unwrap();
        assert_eq!(exported["event_count"], 5);
        assert_eq!(exported["cursor"], 1);
        assert_eq!(exported["breakpoints"][0]["index"], 3);
        assert_eq!(exported["current_state"]["current_scene"], "Unknown");
        assert_eq!(exported["events"][4]["event_type"], "scene.switched");
    }
}
