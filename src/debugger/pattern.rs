//! Ordered event-kind pattern search

use std::collections::HashMap;

use chrono::Duration;
use rayon::prelude::*;

use crate::types::{Event, EventType};

/// Start positions above this count are scanned in parallel
const PARALLEL_SEARCH_THRESHOLD: usize = 1000;

/// Find every group of events matching `kinds` in order within `within`
///
/// For each event of `kinds[0]`, the earliest later event of each
/// following kind is taken in turn, which gives the tightest group for
/// that start. A group is kept when its last event is at most `within`
/// after its first, and when no other group lies strictly inside it:
/// of the groups ending on the same event only the latest start
/// survives. `events` must be ascending by sequence; results are ordered
/// by their first event.
pub fn find_pattern(events: &[Event], kinds: &[EventType], within: Duration) -> Vec<Vec<Event>> {
    let Some((&first_kind, rest)) = kinds.split_first() else {
        return Vec::new();
    };

    let mut positions: HashMap<EventType, Vec<usize>> = HashMap::new();
    for (index, event) in events.iter().enumerate() {
        positions.entry(event.event_type()).or_default().push(index);
    }

    let Some(starts) = positions.get(&first_kind) else {
        return Vec::new();
    };

    let match_from = |&start: &usize| -> Option<Vec<usize>> {
        let mut indices = Vec::with_capacity(kinds.len());
        indices.push(start);

        let mut last = start;
        for kind in rest {
            let candidates = positions.get(kind)?;
            let next = candidates.partition_point(|&p| p <= last);
            last = *candidates.get(next)?;
            indices.push(last);
        }

        let span = events[last].timestamp() - events[start].timestamp();
        if span > within {
            return None;
        }
        Some(indices)
    };

    let groups: Vec<Vec<usize>> = if starts.len() > PARALLEL_SEARCH_THRESHOLD {
        starts.par_iter().filter_map(match_from).collect()
    } else {
        starts.iter().filter_map(match_from).collect()
    };

    // ends never decrease as starts advance, so groups sharing an end are adjacent
    groups
        .iter()
        .enumerate()
        .filter(|(i, group)| {
            groups
                .get(i + 1)
                .map_or(true, |next| next.last() != group.last())
        })
        .map(|(_, group)| group.iter().map(|&i| events[i].clone()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        EventPayload, SceneSwitchedData, StreamStartedData, StreamStoppedData,
    };
    use chrono::{DateTime, TimeZone, Utc};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn switch(at: i64) -> Event {
        Event::new(
            "obs_system",
            EventPayload::SceneSwitched(SceneSwitchedData {
                from_scene: "A".to_string(),
                to_scene: "B".to_string(),
                transition_type: None,
                transition_duration: None,
            }),
        )
        .with_timestamp(t(at))
    }

    fn start(at: i64) -> Event {
        Event::new("stream", EventPayload::StreamStarted(StreamStartedData::default()))
            .with_timestamp(t(at))
    }

    fn stop(at: i64) -> Event {
        Event::new("stream", EventPayload::StreamStopped(StreamStoppedData::default()))
            .with_timestamp(t(at))
    }

    const PATTERN: [EventType; 2] = [EventType::SceneSwitched, EventType::StreamStarted];

    #[test]
    fn test_match_within_window() {
        let events = vec![switch(0), start(5)];
        let matches = find_pattern(&events, &PATTERN, Duration::seconds(10));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0], events);
    }

    #[test]
    fn test_no_match_outside_window() {
        let events = vec![switch(0), start(15)];
        assert!(find_pattern(&events, &PATTERN, Duration::seconds(10)).is_empty());
    }

    #[test]
    fn test_intervening_events_are_skipped() {
        let events = vec![switch(0), stop(1), start(2)];
        let matches = find_pattern(&events, &PATTERN, Duration::seconds(10));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0][1].id(), events[2].id());
    }

    #[test]
    fn test_only_tightest_group_per_end() {
        let events = vec![switch(0), switch(1), start(2)];
        let matches = find_pattern(&events, &PATTERN, Duration::seconds(10));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0][0].id(), events[1].id());
        assert_eq!(matches[0][1].id(), events[2].id());
    }

    #[test]
    fn test_enclosing_group_dropped_for_longer_patterns() {
        let events = vec![switch(0), stop(1), switch(2), stop(3), start(4)];
        let kinds = [EventType::SceneSwitched, EventType::StreamStopped, EventType::StreamStarted];
        let matches = find_pattern(&events, &kinds, Duration::seconds(10));
        assert_eq!(matches.len(), 1);
        let ids: Vec<_> = matches[0].iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![events[2].id(), events[3].id(), events[4].id()]);
    }

    #[test]
    fn test_adjacent_groups_with_distinct_ends_kept() {
        let events = vec![switch(0), start(1), switch(2), start(3)];
        let matches = find_pattern(&events, &PATTERN, Duration::seconds(10));
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0][1].id(), events[1].id());
        assert_eq!(matches[1][0].id(), events[2].id());
    }

    #[test]
    fn test_order_is_required() {
        let events = vec![start(0), switch(1)];
        assert!(find_pattern(&events, &PATTERN, Duration::seconds(10)).is_empty());
        assert!(find_pattern(&events, &[], Duration::seconds(10)).is_empty());
    }

    #[test]
    fn test_parallel_scan_keeps_order() {
        let mut events = Vec::new();
        for i in 0..1500 {
            events.push(switch(i * 2));
            events.push(start(i * 2 + 1));
        }

        let matches = find_pattern(&events, &PATTERN, Duration::seconds(1));
        assert_eq!(matches.len(), 1500);
        for (i, group) in matches.iter().enumerate() {
            assert_eq!(group[0].id(), events[i * 2].id());
        }
    }
}
