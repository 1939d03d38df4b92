//! Correlation scope shared by every write path of one system

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::types::Event;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("correlation scope already active: {0}")]
    AlreadyActive(Uuid),
}

/// Holds the id of the currently open correlation scope, if any
///
/// Clones share the same cell. Scopes do not nest: opening one while
/// another is active fails.
#[derive(Debug, Clone, Default)]
pub struct CorrelationContext {
    current: Arc<Mutex<Option<Uuid>>>,
}

impl CorrelationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope with a fresh id
    pub fn start(&self) -> Result<Uuid, CorrelationError> {
        let mut current = self.current.lock();
        if let Some(existing) = *current {
            return Err(CorrelationError::AlreadyActive(existing));
        }
        let id = Uuid::new_v4();
        *current = Some(id);
        debug!(correlation_id = %id, "correlation started");
        Ok(id)
    }

    /// Open a scope that closes when the guard is dropped
    pub fn begin(&self) -> Result<CorrelationGuard, CorrelationError> {
        let id = self.start()?;
        Ok(CorrelationGuard {
            context: self.clone(),
            id,
        })
    }

    /// Close the open scope, returning its id
    pub fn end(&self) -> Option<Uuid> {
        let ended = self.current.lock().take();
        if let Some(id) = ended {
            debug!(correlation_id = %id, "correlation ended");
        }
        ended
    }

    pub fn current(&self) -> Option<Uuid> {
        *self.current.lock()
    }

    pub fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Give `event` the current correlation id unless it already has one
    pub fn stamp(&self, event: Event) -> Event {
        match (event.correlation_id(), self.current()) {
            (None, Some(id)) => event.with_correlation_id(id),
            _ => event,
        }
    }

    fn end_if(&self, id: Uuid) {
        let mut current = self.current.lock();
        if *current == Some(id) {
            *current = None;
            debug!(correlation_id = %id, "correlation ended");
        }
    }
}

/// Closes its correlation scope on drop
///
/// A scope already closed with `end()` is left alone, as is any scope
/// opened after it.
#[must_use = "the scope closes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct CorrelationGuard {
    context: CorrelationContext,
    id: Uuid,
}

impl CorrelationGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for CorrelationGuard {
    fn drop(&mut self) {
        self.context.end_if(self.id);
    }
}
