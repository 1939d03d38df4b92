//! OBS Chronicle
//!
//! Event sourcing and time-travel debugging for an OBS Studio automation
//! agent. Everything that happens in OBS, and everything the agent does
//! about it, is kept as an append-only log of domain events; current state,
//! read models and past states are all derived by replaying that log.
//!
//! # Modules
//!
//! - `types`: domain events and inbound OBS events
//! - `event_store`: append-only log, snapshots, export
//! - `bus`: async event bus with filters, middleware, recording and replay
//! - `cqrs`: command bus, aggregates and query bus
//! - `projections`: read models folded from the log
//! - `debugger`: time-travel debugging sessions
//! - `system`: the `EventSourcingSystem` façade and correlation scopes
//! - `config`, `logging`, `utils`: runtime settings and helpers
//!
//! # Example
//!
//! ```no_run
//! use obs_chronicle::{Command, EventSourcingSystem, Query};
//!
//! # async fn run() -> Result<(), obs_chronicle::SystemError> {
//! let system = EventSourcingSystem::in_memory();
//! system.start();
//!
//! system.send_command(Command::switch_scene("Main")).await?;
//! let scene = system.query(Query::GetCurrentScene)?;
//! println!("{}", serde_json::to_string(&scene).unwrap_or_default());
//!
//! system.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod cqrs;
pub mod debugger;
pub mod event_store;
pub mod logging;
pub mod projections;
pub mod system;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use bus::{BusConfig, EventHandler, HandlerError};
pub use config::{EventSourcingConfig, LogConfig, LogFormat};
pub use cqrs::{Command, CommandBus, CommandEnvelope, CommandError, Query, QueryBus, QueryResult};
pub use debugger::{DebugSession, SystemState, TimeTravelDebugger};
pub use event_store::{EventFilter, EventStore, EventStoreConfig, EventStoreError, ExportFormat};
pub use projections::{Projection, ProjectionBuilder};
pub use system::{CorrelationContext, EventSourcingSystem, SystemError, SystemStatistics};
pub use types::{Event, EventPayload, EventType, ObsEvent, ObsEventData, RawObsEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
