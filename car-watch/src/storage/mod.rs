//! Persistence of sampled tables
//!
//! The tracker only needs the three operations of [`Storage`]. `close`
//! consumes the handle, so it can run at most once.

pub mod sqlite;

pub use sqlite::SqliteStorage;

use crate::types::{Snapshot, StorageError, Timestamp};
use std::collections::BTreeMap;

pub trait Storage: Send {
    /// Persist one table's snapshot
    fn insert_row(&mut self, table: &str, snapshot: &Snapshot, sampled_at: Timestamp) -> Result<(), StorageError>;

    /// Persist a full vehicle state (one snapshot per table)
    fn insert_state(&mut self, state: &BTreeMap<String, Snapshot>, sampled_at: Timestamp) -> Result<(), StorageError>;

    /// Release the underlying handle
    fn close(self: Box<Self>) -> Result<(), StorageError>;
}
