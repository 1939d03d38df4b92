//! Read-side queries

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::event_store::{EventFilter, EventStore, EventStoreError};
use crate::projections::{
    ProjectionBuilder, SceneState, StreamingState, SCENES, STREAMING,
};
use crate::types::Event;

use super::AggregateState;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("projection not found: {0}")]
    ProjectionNotFound(String),
}

#[derive(Debug, Clone)]
pub enum Query {
    GetCurrentScene,
    GetStreamStatus,
    GetSceneList,
    GetEventHistory(EventFilter),
    /// Fold of one aggregate, optionally as of a point in time
    GetAggregateState {
        aggregate_id: String,
        at: Option<DateTime<Utc>>,
    },
    /// A projection's state, or one dotted key inside it
    GetProjection { name: String, key: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub is_streaming: bool,
    pub stream_start_time: Option<DateTime<Utc>>,
    pub stream_count: u64,
    pub total_stream_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    CurrentScene(String),
    StreamStatus(StreamStatus),
    SceneList(Vec<String>),
    Events(Vec<Event>),
    AggregateState {
        state: AggregateState,
        last_sequence: u64,
    },
    Projection(Option<Value>),
}

pub struct QueryBus {
    store: Arc<EventStore>,
    projections: Arc<ProjectionBuilder>,
}

impl QueryBus {
    pub fn new(store: Arc<EventStore>, projections: Arc<ProjectionBuilder>) -> Self {
        Self { store, projections }
    }

    pub fn send(&self, query: Query) -> Result<QueryResult, QueryError> {
        match query {
            Query::GetCurrentScene => {
                let scenes: SceneState = self.read_model(SCENES)?;
                Ok(QueryResult::CurrentScene(scenes.current_scene))
            }
            Query::GetStreamStatus => {
                let streaming: StreamingState = self.read_model(STREAMING)?;
                Ok(QueryResult::StreamStatus(StreamStatus {
                    is_streaming: streaming.is_streaming,
                    stream_start_time: streaming.stream_start_time,
                    stream_count: streaming.stream_count,
                    total_stream_time: streaming.total_stream_time,
                }))
            }
            Query::GetSceneList => {
                let scenes: SceneState = self.read_model(SCENES)?;
                Ok(QueryResult::SceneList(scenes.scenes))
            }
            Query::GetEventHistory(filter) => Ok(QueryResult::Events(self.store.query(&filter))),
            Query::GetAggregateState { aggregate_id, at } => {
                let (state, last_sequence) = match at {
                    Some(at) => AggregateState::at(&self.store, &aggregate_id, at),
                    None => AggregateState::load(&self.store, &aggregate_id)?,
                };
                Ok(QueryResult::AggregateState {
                    state,
                    last_sequence,
                })
            }
            Query::GetProjection { name, key } => {
                if !self.projections.contains(&name) {
                    return Err(QueryError::ProjectionNotFound(name));
                }
                let value = match key {
                    Some(key) => self.projections.query(&name, &key),
                    None => self.projections.state(&name).map(|s| s.data),
                };
                Ok(QueryResult::Projection(value))
            }
        }
    }

    fn read_model<T: Clone + 'static>(&self, name: &str) -> Result<T, QueryError> {
        self.projections
            .state_as::<T>(name)
            .ok_or_else(|| QueryError::ProjectionNotFound(name.to_string()))
    }
}
