//! Runtime configuration
//!
//! Defaults suit an in-memory run; every field can be overridden through
//! an `OBS_CHRONICLE_*` environment variable.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::bus::BusConfig;
use crate::event_store::EventStoreConfig;

pub const ENV_DATA_DIR: &str = "OBS_CHRONICLE_DATA_DIR";
pub const ENV_ENABLE_SNAPSHOTS: &str = "OBS_CHRONICLE_ENABLE_SNAPSHOTS";
pub const ENV_SNAPSHOT_FREQUENCY: &str = "OBS_CHRONICLE_SNAPSHOT_FREQUENCY";
pub const ENV_ENABLE_PROJECTIONS: &str = "OBS_CHRONICLE_ENABLE_PROJECTIONS";
pub const ENV_ENABLE_TIME_TRAVEL: &str = "OBS_CHRONICLE_ENABLE_TIME_TRAVEL";
pub const ENV_RECORDING_CAPACITY: &str = "OBS_CHRONICLE_RECORDING_CAPACITY";
pub const ENV_DEQUEUE_TIMEOUT_MS: &str = "OBS_CHRONICLE_DEQUEUE_TIMEOUT_MS";
pub const ENV_SLOW_HANDLER_MS: &str = "OBS_CHRONICLE_SLOW_HANDLER_MS";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "OBS_CHRONICLE_SHUTDOWN_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "OBS_CHRONICLE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "OBS_CHRONICLE_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventSourcingConfig {
    /// Where the event log and snapshots live; `None` keeps everything in
    /// memory
    pub data_dir: Option<PathBuf>,
    pub enable_snapshots: bool,
    /// Events per aggregate between snapshots
    pub snapshot_frequency: u64,
    pub enable_projections: bool,
    pub enable_time_travel: bool,
    /// Events kept while recording; zero is rejected when read from the
    /// environment
    pub recording_capacity: usize,
    pub dequeue_timeout: Duration,
    pub slow_handler_threshold: Duration,
    /// Upper bound on draining queued events during `stop`
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
}

impl Default for EventSourcingConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            enable_snapshots: true,
            snapshot_frequency: 100,
            enable_projections: true,
            enable_time_travel: true,
            recording_capacity: 1000,
            dequeue_timeout: Duration::from_millis(100),
            slow_handler_threshold: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            log: LogConfig::default(),
        }
    }
}

impl EventSourcingConfig {
    /// Defaults overridden from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden from `lookup`; unparsable values are ignored
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            config.data_dir = Some(resolve_dir(&dir));
        }
        override_with(&lookup, ENV_ENABLE_SNAPSHOTS, parse_bool, &mut config.enable_snapshots);
        override_with(&lookup, ENV_SNAPSHOT_FREQUENCY, parse, &mut config.snapshot_frequency);
        override_with(&lookup, ENV_ENABLE_PROJECTIONS, parse_bool, &mut config.enable_projections);
        override_with(&lookup, ENV_ENABLE_TIME_TRAVEL, parse_bool, &mut config.enable_time_travel);
        override_with(&lookup, ENV_RECORDING_CAPACITY, parse_capacity, &mut config.recording_capacity);
        override_with(&lookup, ENV_DEQUEUE_TIMEOUT_MS, parse_millis, &mut config.dequeue_timeout);
        override_with(&lookup, ENV_SLOW_HANDLER_MS, parse_millis, &mut config.slow_handler_threshold);
        override_with(&lookup, ENV_SHUTDOWN_TIMEOUT_MS, parse_millis, &mut config.shutdown_timeout);
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|l| !l.trim().is_empty()) {
            config.log.level = level;
        }
        override_with(&lookup, ENV_LOG_FORMAT, parse, &mut config.log.format);

        config
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.data_dir.is_some()
    }

    /// Store location, if persistent
    pub fn store_config(&self) -> Option<EventStoreConfig> {
        self.data_dir.as_ref().map(EventStoreConfig::new)
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            dequeue_timeout: self.dequeue_timeout,
            recording_capacity: self.recording_capacity,
        }
    }

    /// Snapshot frequency when snapshots are on
    pub fn effective_snapshot_frequency(&self) -> Option<u64> {
        Some(self.snapshot_frequency).filter(|&f| self.enable_snapshots && f > 0)
    }
}

/// Relative paths are taken from the current directory
fn resolve_dir(dir: &str) -> PathBuf {
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        return path;
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

fn override_with<L, T, P>(lookup: &L, key: &str, parse: P, target: &mut T)
where
    L: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    if let Some(raw) = lookup(key) {
        match parse(raw.trim()) {
            Some(value) => *target = value,
            None => warn!(key, value = %raw, "ignoring unparsable setting"),
        }
    }
}

fn parse<T: FromStr>(raw: &str) -> Option<T> {
    raw.parse().ok()
}

fn parse_capacity(raw: &str) -> Option<usize> {
    raw.parse().ok().filter(|&n| n > 0)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_millis(raw: &str) -> Option<Duration> {
    raw.parse().ok().map(Duration::from_millis)
}
