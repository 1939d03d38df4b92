//! Time-travel debugging over the event log
//!
//! ```text
//!   idle ──start_session──▶ active ──end_session──▶ idle
//!                             │  ▲
//!                 step/goto/  │  │ state = replay(events[..cursor])
//!                 continue    ▼  │
//! ```
//!
//! A session copies the events of a time range out of the store. Nothing
//! here writes back to the store.

mod pattern;
mod session;
mod state;

pub use pattern::find_pattern;
pub use session::{Breakpoint, BreakpointFn, BreakpointHit, DebugSession, SessionStatistics};
pub use state::{RuleState, SourceState, SystemState};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::event_store::{EventFilter, EventStore};
use crate::types::{Event, EventType};

/// Default session range when no start is given
pub const DEFAULT_HOURS_BACK: i64 = 24;

#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("no active debugging session")]
    NoActiveSession,

    #[error("breakpoint condition never matched")]
    BreakpointNotMatched,

    #[error("no breakpoints ahead")]
    NoBreakpointAhead,

    #[error("session export failed: {0}")]
    Export(#[from] serde_json::Error),
}

pub type DebuggerResult<T> = Result<T, DebuggerError>;

pub struct TimeTravelDebugger {
    store: Arc<EventStore>,
    session: Option<DebugSession>,
}

impl TimeTravelDebugger {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            session: None,
        }
    }

    /// Load the events in `[since, until]` into a new session
    ///
    /// `until` defaults to now and `since` to 24 hours before `until`.
    /// Any previous session is discarded.
    pub fn start_session(
        &mut self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> &DebugSession {
        let until = until.unwrap_or_else(Utc::now);
        let since = since.unwrap_or_else(|| hours_before(until, DEFAULT_HOURS_BACK));

        let events = self.store.query(&EventFilter::new().since(since).until(until));
        let session = DebugSession::new(since, until, events);
        info!(
            session_id = %session.id(),
            events = session.len(),
            since = %since,
            until = %until,
            "debug session started"
        );
        self.session.insert(session)
    }

    /// Session over the last `hours_back` hours; a span reaching past the
    /// earliest representable instant starts there
    pub fn start_session_hours_back(&mut self, hours_back: i64) -> &DebugSession {
        let until = Utc::now();
        self.start_session(Some(hours_before(until, hours_back)), Some(until))
    }

    /// Discard the active session
    pub fn end_session(&mut self) -> Option<DebugSession> {
        let session = self.session.take();
        if let Some(session) = &session {
            info!(session_id = %session.id(), "debug session ended");
        }
        session
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> DebuggerResult<&DebugSession> {
        self.session.as_ref().ok_or(DebuggerError::NoActiveSession)
    }

    pub fn session_mut(&mut self) -> DebuggerResult<&mut DebugSession> {
        self.session.as_mut().ok_or(DebuggerError::NoActiveSession)
    }

    pub fn state(&self) -> DebuggerResult<&SystemState> {
        Ok(self.session()?.state())
    }

    pub fn step_forward(&mut self, count: usize) -> DebuggerResult<(Vec<Event>, SystemState)> {
        Ok(self.session_mut()?.step_forward(count))
    }

    pub fn step_backward(&mut self, count: usize) -> DebuggerResult<(Vec<Event>, SystemState)> {
        Ok(self.session_mut()?.step_backward(count))
    }

    pub fn goto(&mut self, timestamp: DateTime<Utc>) -> DebuggerResult<SystemState> {
        Ok(self.session_mut()?.goto(timestamp))
    }

    pub fn seek(&mut self, position: usize) -> DebuggerResult<SystemState> {
        Ok(self.session_mut()?.seek(position))
    }

    pub fn set_breakpoint<F>(&mut self, condition: F) -> DebuggerResult<Breakpoint>
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.session_mut()?.set_breakpoint(condition)
    }

    pub fn continue_to_breakpoint(&mut self) -> DebuggerResult<(BreakpointHit, SystemState)> {
        self.session_mut()?.continue_to_breakpoint()
    }

    pub fn find_event_pattern(
        &self,
        kinds: &[EventType],
        within: Duration,
    ) -> DebuggerResult<Vec<Vec<Event>>> {
        Ok(self.session()?.find_event_pattern(kinds, within))
    }

    pub fn analyze_causation_chain(&self, event_id: Uuid) -> DebuggerResult<Vec<Event>> {
        Ok(self.session()?.analyze_causation_chain(event_id))
    }

    pub fn analyze_correlation_chain(&self, correlation_id: Uuid) -> DebuggerResult<Vec<Event>> {
        Ok(self.session()?.analyze_correlation_chain(correlation_id))
    }

    pub fn what_if<F>(&self, modify: F) -> DebuggerResult<SystemState>
    where
        F: FnOnce(Vec<Event>) -> Vec<Event>,
    {
        Ok(self.session()?.what_if(modify))
    }

    pub fn statistics(&self) -> DebuggerResult<SessionStatistics> {
        Ok(self.session()?.statistics())
    }

    pub fn export_session(&self) -> DebuggerResult<String> {
        self.session()?.export_session()
    }
}

fn hours_before(at: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    Duration::try_hours(hours)
        .and_then(|span| at.checked_sub_signed(span))
        .unwrap_or(if hours < 0 {
            DateTime::<Utc>::MAX_UTC
        } else {
            DateTime::<Utc>::MIN_UTC
        })
}
