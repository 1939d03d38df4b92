//! Utility functions and helpers
//!
//! Atomic file writes and time formatting shared by the store, the bus,
//! and the debugger.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write, atomic_write_with, cleanup_temp_files, AtomicError, AtomicResult};
pub use time::{format_duration, hour_of_day, span_seconds};
