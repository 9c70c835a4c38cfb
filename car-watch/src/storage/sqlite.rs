//! SQLite-backed sample store
//!
//! Every snapshot becomes one row of the `samples` table, with the attribute
//! values kept as a JSON object. Several trackers may share one database
//! file, each through its own connection.

use crate::storage::Storage;
use crate::types::{Snapshot, StorageError, Timestamp};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY,
    vin TEXT NOT NULL,
    table_name TEXT NOT NULL,
    sampled_at TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS samples_by_table ON samples(vin, table_name, sampled_at);
";

const INSERT_SAMPLE: &str =
    "INSERT INTO samples(vin, table_name, sampled_at, data) VALUES (?1, ?2, ?3, ?4)";

/// Concurrent writers from other trackers wait this long for the file lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStorage {
    vin: String,
    conn: Connection,
}

impl SqliteStorage {
    /// Open (or create) the database at `path` for the vehicle `vin`
    pub fn open(path: &Path, vin: impl Into<String>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::init(conn, vin.into())
    }

    /// Private in-memory database
    pub fn open_in_memory(vin: impl Into<String>) -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?, vin.into())
    }

    fn init(conn: Connection, vin: String) -> Result<Self, StorageError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        log::debug!("Sample store ready for {}", vin);
        Ok(Self { vin, conn })
    }

    /// Number of stored rows for this vehicle, optionally limited to one table
    pub fn count_rows(&self, table: Option<&str>) -> Result<usize, StorageError> {
        let count: i64 = match table {
            Some(table) => self.conn.query_row(
                "SELECT COUNT(*) FROM samples WHERE vin = ?1 AND table_name = ?2",
                params![self.vin, table],
                |r| r.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM samples WHERE vin = ?1",
                params![self.vin],
                |r| r.get(0),
            )?,
        };
        Ok(count as usize)
    }

    /// Most recently inserted snapshot of `table`
    pub fn latest(&self, table: &str) -> Result<Option<Snapshot>, StorageError> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM samples WHERE vin = ?1 AND table_name = ?2 ORDER BY id DESC LIMIT 1",
                params![self.vin, table],
                |r| r.get(0),
            )
            .optional()?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

impl Storage for SqliteStorage {
    fn insert_row(&mut self, table: &str, snapshot: &Snapshot, sampled_at: Timestamp) -> Result<(), StorageError> {
        let data = serde_json::to_string(snapshot)?;
        self.conn.execute(
            INSERT_SAMPLE,
            params![self.vin, table, sampled_at.to_rfc3339(), data],
        )?;
        log::trace!("Stored {} row for {}", table, self.vin);
        Ok(())
    }

    fn insert_state(&mut self, state: &BTreeMap<String, Snapshot>, sampled_at: Timestamp) -> Result<(), StorageError> {
        let at = sampled_at.to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(INSERT_SAMPLE)?;
            for (table, snapshot) in state {
                stmt.execute(params![self.vin, table, at, serde_json::to_string(snapshot)?])?;
            }
        }
        tx.commit()?;
        log::debug!("Stored full state ({} tables) for {}", state.len(), self.vin);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        log::debug!("Closing sample store for {}", self.vin);
        self.conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
    }
}
