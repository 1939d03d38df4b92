//! Asynchronous event bus
//!
//! `EventHandler` queues emitted events and dispatches them from a single
//! consumer task: kind-level filters first, then every handler registered
//! for the kind, each wrapped in the middleware chain.
//!
//! ```text
//! emit() ──► [mpsc queue] ──► consumer task ──► filters ──► middleware ──► handler
//!   │                                                      (outermost first)
//!   └──► recording buffer (while recording)
//! ```
//!
//! The bus is generic over the event family: it carries `ObsEvent`s from the
//! live connection and can equally carry stored domain `Event`s.

mod handler;
mod middleware;
mod recording;

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Event, ObsEvent};
use crate::utils::AtomicError;

pub use handler::{BusConfig, EventHandler, FilterFn, HandlerFn};
pub use middleware::{LoggingMiddleware, Middleware, Next, RecoverMiddleware, TimingMiddleware};
pub use recording::{load_events, save_events, RecordingBuffer};

/// Something that can travel over the bus
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// Dispatch key; handlers and filters are registered per kind
    fn kind(&self) -> &str;

    /// When the event originally happened (drives replay pacing)
    fn occurred_at(&self) -> DateTime<Utc>;
}

impl BusEvent for ObsEvent {
    fn kind(&self) -> &str {
        self.event_type()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl BusEvent for Event {
    fn kind(&self) -> &str {
        self.event_type().as_str()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp()
    }
}

/// Handle for a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

/// Handle for a registered kind-level filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Failure reported by a single handler invocation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
    #[error("handler panicked")]
    Panicked,
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

pub type HandlerResult = Result<(), HandlerError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("replay speed must be positive, got {0}")]
    InvalidSpeed(f64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AtomicError> for BusError {
    fn from(e: AtomicError) -> Self {
        match e {
            AtomicError::Io(io) => BusError::Io(io),
        }
    }
}
