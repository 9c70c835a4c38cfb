//! Core types for the car tracker library
//!
//! This module defines the values every tracker component passes around:
//! scalar attribute values, per-table snapshots, event and command kinds, and
//! the error taxonomy. None of these types hold state across poll cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::str::FromStr;

/// Timestamp type used throughout the tracker
pub type Timestamp = DateTime<Utc>;

/// Result type for fatal tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// A single scalar attribute value as reported by the vehicle API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One fetch of one attribute table (e.g. `driveState`) at one instant
///
/// Key order is irrelevant; a `BTreeMap` keeps iteration and serialized
/// output deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, Value>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add or replace an attribute
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Numeric attribute lookup (integers are widened)
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Snapshot(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// The fixed set of events a tracker can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    StoppedMoving,
    StartedMoving,
    EnterRegion,
    ExitRegion,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::StoppedMoving,
        EventType::StartedMoving,
        EventType::EnterRegion,
        EventType::ExitRegion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StoppedMoving => "STOPPED_MOVING",
            EventType::StartedMoving => "STARTED_MOVING",
            EventType::EnterRegion => "ENTER_REGION",
            EventType::ExitRegion => "EXIT_REGION",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownEventType(s.to_string()))
    }
}

/// A notification produced by a tracker and handed to its notifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub event_type: EventType,
    /// VIN of the vehicle that raised the event
    pub vin: String,
    /// Opaque handler argument (VIN for motion events, region id for fence events)
    pub arg: String,
}

/// Control commands accepted on a tracker's command channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Stop,
}

impl Command {
    /// Parse a raw channel payload; anything but the three exact keywords is `None`
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            "PAUSE" => Some(Command::Pause),
            "RESUME" => Some(Command::Resume),
            "STOP" => Some(Command::Stop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Pause => "PAUSE",
            Command::Resume => "RESUME",
            Command::Stop => "STOP",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid tracker, region or notifier configuration. Always fatal at construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid region '{id}': {reason}")]
    InvalidRegion { id: String, reason: String },

    #[error("Invalid notifier program '{}' for events {events:?}", path.display())]
    InvalidNotifier { path: PathBuf, events: Vec<String> },

    #[error("Invalid event type '{0}'")]
    UnknownEventType(String),

    #[error("Invalid interval for table '{table}': {secs}s (must be at least 1s)")]
    InvalidInterval { table: String, secs: u64 },

    #[error("Location table '{0}' has no configured interval")]
    MissingLocationTable(String),

    #[error("No tables configured for polling")]
    NoTables,

    #[error("Invalid recording '{}': {reason}", path.display())]
    InvalidRecording { path: PathBuf, reason: String },
}

/// A single failed attempt to fetch a table from the vehicle API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Worth retrying (timeouts, vehicle asleep, server hiccups)
    #[error("Transient fetch failure: {0}")]
    Transient(String),

    /// Retrying will not help (bad request, unknown table)
    #[error("Permanent fetch failure: {0}")]
    Permanent(String),
}

/// Failure writing to the sample store
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure delivering a notification to its handlers
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Must provide an argument for {0} notifications")]
    MissingArg(EventType),

    #[error("No handlers registered for {0}")]
    NoHandlers(EventType),

    #[error("Failed to run notifier '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{}({arg})' failed: {status}", program.display())]
    HandlerFailed {
        program: PathBuf,
        arg: String,
        status: ExitStatus,
    },
}

/// Errors that terminate a single tracker
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Initial sample incomplete, no data for tables {missing:?}")]
    IncompleteSample { missing: Vec<String> },

    #[error("Notification failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("No location in table '{table}': expected numeric '{latitude}' and '{longitude}'")]
    InvalidLocation {
        table: String,
        latitude: String,
        longitude: String,
    },

    #[error("Tracker panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_numeric_view() {
        assert_eq!(Value::Integer(42).as_f64(), Some(42.0));
        assert_eq!(Value::Float(37.5).as_f64(), Some(37.5));
        assert_eq!(Value::Text("D".into()).as_f64(), None);
        assert_eq!(Value::Null.as_f64(), None);
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = r#"{"latitude": 37.46, "speed": null, "shift_state": "D", "timestamp": 1500000000, "locked": true}"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot.get_f64("latitude"), Some(37.46));
        assert_eq!(snapshot.get("speed"), Some(&Value::Null));
        assert_eq!(snapshot.get("shift_state"), Some(&Value::Text("D".into())));
        assert_eq!(snapshot.get("timestamp"), Some(&Value::Integer(1_500_000_000)));
        assert_eq!(snapshot.get("locked"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_event_type_parsing() {
        for event in EventType::ALL {
            assert_eq!(event.as_str().parse::<EventType>().unwrap(), event);
        }
        assert!(matches!(
            "XYZZY".parse::<EventType>(),
            Err(ConfigError::UnknownEventType(name)) if name == "XYZZY"
        ));
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("PAUSE"), Some(Command::Pause));
        assert_eq!(Command::parse("RESUME"), Some(Command::Resume));
        assert_eq!(Command::parse("STOP"), Some(Command::Stop));
        assert_eq!(Command::parse("stop"), None);
        assert_eq!(Command::parse("REBOOT"), None);
    }
}
