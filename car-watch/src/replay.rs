//! Recorded vehicle data as a [`TableSource`]
//!
//! A recording is a JSON document holding, per table, the sequence of
//! snapshots the vehicle reported:
//!
//! ```json
//! {
//!   "vin": "5YJ3E1EA7JF000001",
//!   "name": "Red Car",
//!   "tables": {
//!     "driveState": [{"latitude": 37.46, "longitude": -122.17}, null, {"latitude": 37.47, "longitude": -122.17}],
//!     "chargeState": [{"battery_level": 80}]
//!   }
//! }
//! ```
//!
//! Each fetch of a table returns its next entry; once a table's entries are
//! used up the last one keeps being returned. A `null` entry is served as a
//! transient failure, which exercises the retry path.

use crate::api::TableSource;
use crate::types::{ConfigError, FetchError, Snapshot};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct Recording {
    vin: String,
    name: String,
    tables: BTreeMap<String, Vec<Option<Snapshot>>>,
}

#[derive(Debug)]
struct Track {
    entries: Vec<Option<Snapshot>>,
    cursor: usize,
}

#[derive(Debug)]
pub struct ReplaySource {
    vin: String,
    name: String,
    tables: BTreeMap<String, Track>,
}

impl ReplaySource {
    /// Load a recording from a JSON file
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRecording {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let recording: Recording = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

        if let Some((table, _)) = recording.tables.iter().find(|(_, entries)| entries.is_empty()) {
            return Err(invalid(format!("table '{}' has no entries", table)));
        }

        log::info!(
            "Loaded recording for {} ({}) with tables {:?}",
            recording.vin,
            recording.name,
            recording.tables.keys().collect::<Vec<_>>()
        );
        Ok(Self::from_parts(recording))
    }

    /// Build a source directly from in-memory tables
    pub fn from_tables(
        vin: impl Into<String>,
        name: impl Into<String>,
        tables: BTreeMap<String, Vec<Option<Snapshot>>>,
    ) -> Self {
        Self::from_parts(Recording {
            vin: vin.into(),
            name: name.into(),
            tables,
        })
    }

    fn from_parts(recording: Recording) -> Self {
        let tables = recording
            .tables
            .into_iter()
            .map(|(name, entries)| (name, Track { entries, cursor: 0 }))
            .collect();
        Self {
            vin: recording.vin,
            name: recording.name,
            tables,
        }
    }
}

impl TableSource for ReplaySource {
    fn vin(&self) -> &str {
        &self.vin
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn fetch(&mut self, table: &str) -> Result<Snapshot, FetchError> {
        let track = self
            .tables
            .get_mut(table)
            .ok_or_else(|| FetchError::Permanent(format!("invalid table name '{}'", table)))?;

        let Some(entry) = track.entries.get(track.cursor) else {
            return Err(FetchError::Permanent(format!("no recorded data for '{}'", table)));
        };
        let entry = entry.clone();
        if track.cursor + 1 < track.entries.len() {
            track.cursor += 1;
        }

        entry.ok_or_else(|| FetchError::Transient(format!("no response recorded for '{}'", table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const RECORDING: &str = r#"{
        "vin": "5YJ3E1EA7JF000001",
        "name": "Red Car",
        "tables": {
            "driveState": [{"latitude": 37.46}, null, {"latitude": 37.47}],
            "chargeState": [{"battery_level": 80}]
        }
    }"#;

    fn recording_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_replay_sequence() {
        let file = recording_file(RECORDING);
        let mut source = ReplaySource::open(file.path()).unwrap();
        assert_eq!(source.vin(), "5YJ3E1EA7JF000001");
        assert_eq!(source.display_name(), "Red Car");

        assert_eq!(source.fetch("driveState").unwrap().get_f64("latitude"), Some(37.46));
        assert!(matches!(source.fetch("driveState"), Err(FetchError::Transient(_))));
        assert_eq!(source.fetch("driveState").unwrap().get_f64("latitude"), Some(37.47));
        // Exhausted: the last entry repeats
        assert_eq!(source.fetch("driveState").unwrap().get_f64("latitude"), Some(37.47));

        assert_eq!(source.fetch("chargeState").unwrap().get_f64("battery_level"), Some(80.0));
        assert_eq!(source.fetch("chargeState").unwrap().get_f64("battery_level"), Some(80.0));
    }

    #[test]
    fn test_unknown_table_is_permanent() {
        let file = recording_file(RECORDING);
        let mut source = ReplaySource::open(file.path()).unwrap();
        assert!(matches!(source.fetch("guiSettings"), Err(FetchError::Permanent(_))));
    }

    #[test]
    fn test_invalid_recordings() {
        let empty_table = recording_file(r#"{"vin": "V", "name": "N", "tables": {"driveState": []}}"#);
        assert!(matches!(
            ReplaySource::open(empty_table.path()),
            Err(ConfigError::InvalidRecording { .. })
        ));

        let garbage = recording_file("not json");
        assert!(ReplaySource::open(garbage.path()).is_err());

        assert!(ReplaySource::open(Path::new("/nonexistent/recording.json")).is_err());
    }
}
