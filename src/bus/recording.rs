//! Event recording buffer and recording files

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::utils::atomic_write;

use super::BusError;

/// Bounded FIFO buffer; the oldest event is evicted when full
#[derive(Debug, Clone)]
pub struct RecordingBuffer<E> {
    events: VecDeque<E>,
    capacity: usize,
}

impl<E: Clone> RecordingBuffer<E> {
    /// A buffer holding at most `capacity` events; a capacity of zero
    /// holds one
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: E) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Take every buffered event, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<E> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Write events to `path` as a pretty JSON array
pub fn save_events<E: Serialize>(events: &[E], path: &Path) -> Result<(), BusError> {
    let json = serde_json::to_string_pretty(events)?;
    atomic_write(path, &json)?;
    info!(count = events.len(), path = %path.display(), "saved events");
    Ok(())
}

/// Read events saved by `save_events`
///
/// Entries that no longer parse (e.g. unknown kinds) are logged and
/// skipped.
pub fn load_events<E: DeserializeOwned>(path: &Path) -> Result<Vec<E>, BusError> {
    let content = fs::read_to_string(path)?;
    let items: Vec<Value> = serde_json::from_str(&content)?;

    let mut events = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value(item) {
            Ok(event) => events.push(event),
            Err(e) => warn!(index, error = %e, "skipping unreadable recorded event"),
        }
    }

    info!(count = events.len(), path = %path.display(), "loaded events");
    Ok(events)
}
