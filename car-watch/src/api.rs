//! Vehicle data API seen by a tracker
//!
//! A [`TableSource`] performs raw, single-attempt fetches and says whether a
//! failure is worth retrying. [`RetryingApi`] wraps a source with a bounded
//! retry policy and exposes the [`VehicleApi`] the tracker consumes, where
//! every failure has already collapsed into "no data".

use crate::clock::Clock;
use crate::types::{FetchError, Snapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Data API consumed by a tracker
pub trait VehicleApi: Send {
    fn vin(&self) -> &str;

    /// Display name of the vehicle
    fn name(&self) -> &str;

    /// Fetch one table; `None` means no data this time, for whatever reason
    fn get_table(&mut self, table: &str) -> Option<Snapshot>;

    /// Fetch every listed table; tables that produced no data are absent
    fn get_car_state(&mut self, tables: &[String]) -> BTreeMap<String, Snapshot>;
}

/// Raw single-attempt access to a vehicle's tables
pub trait TableSource: Send {
    fn vin(&self) -> &str;
    fn display_name(&self) -> &str;
    fn fetch(&mut self, table: &str) -> Result<Snapshot, FetchError>;
}

/// Bounded retry settings for [`RetryingApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first transient failure
    pub max_retries: u32,
    /// Pause between attempts
    pub delay: Duration,
    /// Pause between consecutive tables of a full state fetch
    pub inter_command_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(3),
            inter_command_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the retry bound
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder method: set the pause between attempts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Builder method: set the pause between tables of a full state fetch
    pub fn with_inter_command_delay(mut self, delay: Duration) -> Self {
        self.inter_command_delay = delay;
        self
    }
}

/// [`VehicleApi`] over a [`TableSource`] with bounded retries
pub struct RetryingApi<S> {
    source: S,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: TableSource> RetryingApi<S> {
    pub fn new(source: S, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { source, policy, clock }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: TableSource> VehicleApi for RetryingApi<S> {
    fn vin(&self) -> &str {
        self.source.vin()
    }

    fn name(&self) -> &str {
        self.source.display_name()
    }

    fn get_table(&mut self, table: &str) -> Option<Snapshot> {
        let mut retries_left = self.policy.max_retries;
        loop {
            match self.source.fetch(table) {
                Ok(snapshot) => return Some(snapshot),
                Err(FetchError::Permanent(reason)) => {
                    log::warn!("{}: no data for table '{}': {}", self.source.vin(), table, reason);
                    return None;
                }
                Err(FetchError::Transient(reason)) if retries_left > 0 => {
                    retries_left -= 1;
                    log::warn!(
                        "{}: fetch of '{}' failed ({}), {} retries left",
                        self.source.vin(),
                        table,
                        reason,
                        retries_left
                    );
                    self.clock.sleep(self.policy.delay);
                }
                Err(FetchError::Transient(reason)) => {
                    log::warn!(
                        "{}: giving up on table '{}' after {} retries: {}",
                        self.source.vin(),
                        table,
                        self.policy.max_retries,
                        reason
                    );
                    return None;
                }
            }
        }
    }

    fn get_car_state(&mut self, tables: &[String]) -> BTreeMap<String, Snapshot> {
        let mut state = BTreeMap::new();
        for (i, table) in tables.iter().enumerate() {
            if i > 0 {
                self.clock.sleep(self.policy.inter_command_delay);
            }
            if let Some(snapshot) = self.get_table(table) {
                state.insert(table.clone(), snapshot);
            }
        }
        state
    }
}
