//! Per-table due-time bookkeeping
//!
//! Each table has a fixed poll interval and remembers when it was last
//! sampled. The next due time is measured from the completion time of the
//! last successful fetch, so the period drifts by the fetch latency.

use crate::types::{ConfigError, Timestamp};
use chrono::{DateTime, Duration, Utc};

/// Pure due-time decision: due once `interval` has elapsed since `last_sampled_at`
pub fn is_due_at(now: Timestamp, last_sampled_at: Timestamp, interval: Duration) -> bool {
    now >= due_time(last_sampled_at, interval)
}

/// `last_sampled_at + interval`, saturating at the latest representable instant
fn due_time(last_sampled_at: Timestamp, interval: Duration) -> Timestamp {
    last_sampled_at
        .checked_add_signed(interval)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone)]
struct TableSchedule {
    name: String,
    interval: Duration,
    last_sampled_at: Option<Timestamp>,
}

/// Schedule for every table polled by one tracker
#[derive(Debug, Clone)]
pub struct Scheduler {
    tables: Vec<TableSchedule>,
}

impl Scheduler {
    /// Build a schedule from `(table, interval seconds)` pairs, kept in the given order
    pub fn new<I, S>(intervals: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut tables = Vec::new();
        for (name, secs) in intervals {
            let name = name.into();
            if secs == 0 || secs > i64::MAX as u64 / 1000 {
                return Err(ConfigError::InvalidInterval { table: name, secs });
            }
            tables.push(TableSchedule {
                name,
                interval: Duration::seconds(secs as i64),
                last_sampled_at: None,
            });
        }

        if tables.is_empty() {
            return Err(ConfigError::NoTables);
        }

        Ok(Self { tables })
    }

    /// A table that was never sampled is always due; unknown tables never are
    pub fn is_due(&self, table: &str, now: Timestamp) -> bool {
        match self.find(table) {
            Some(TableSchedule { last_sampled_at: Some(last), interval, .. }) => is_due_at(now, *last, *interval),
            Some(TableSchedule { last_sampled_at: None, .. }) => true,
            None => false,
        }
    }

    /// Tables due at `now`, in configured order
    pub fn due_tables(&self, now: Timestamp) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| self.is_due(&t.name, now))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Record a successful fetch of `table` completing at `at`
    pub fn record_sample(&mut self, table: &str, at: Timestamp) {
        match self.tables.iter_mut().find(|t| t.name == table) {
            Some(schedule) => schedule.last_sampled_at = Some(at),
            None => log::warn!("Ignoring sample for unscheduled table '{}'", table),
        }
    }

    pub fn last_sampled_at(&self, table: &str) -> Option<Timestamp> {
        self.find(table).and_then(|t| t.last_sampled_at)
    }

    pub fn interval(&self, table: &str) -> Option<Duration> {
        self.find(table).map(|t| t.interval)
    }

    /// Earliest time any table becomes due (`None` if some table was never sampled)
    pub fn next_due(&self) -> Option<Timestamp> {
        self.tables
            .iter()
            .map(|t| t.last_sampled_at.map(|last| due_time(last, t.interval)))
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()
    }

    pub fn min_interval(&self) -> Duration {
        self.tables
            .iter()
            .map(|t| t.interval)
            .min()
            .unwrap_or_else(|| Duration::seconds(1))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    fn find(&self, table: &str) -> Option<&TableSchedule> {
        self.tables.iter().find(|t| t.name == table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> Timestamp {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_due_boundary() {
        let interval = Duration::seconds(60);
        assert!(!is_due_at(at(1059), at(1000), interval));
        assert!(is_due_at(at(1060), at(1000), interval));
        assert!(is_due_at(at(5000), at(1000), interval));
    }

    #[test]
    fn test_per_table_schedule() {
        let mut scheduler = Scheduler::new([("driveState", 5), ("chargeState", 100)]).unwrap();
        assert_eq!(scheduler.due_tables(at(0)), vec!["driveState", "chargeState"]);
        assert_eq!(scheduler.next_due(), None);

        scheduler.record_sample("driveState", at(0));
        scheduler.record_sample("chargeState", at(0));
        assert!(scheduler.due_tables(at(4)).is_empty());
        assert_eq!(scheduler.due_tables(at(5)), vec!["driveState"]);
        assert_eq!(scheduler.next_due(), Some(at(5)));

        // Next due time follows the actual completion time, not a fixed grid
        scheduler.record_sample("driveState", at(7));
        assert_eq!(scheduler.last_sampled_at("driveState"), Some(at(7)));
        assert!(!scheduler.is_due("driveState", at(11)));
        assert!(scheduler.is_due("driveState", at(12)));
        assert_eq!(scheduler.due_tables(at(100)), vec!["driveState", "chargeState"]);
    }

    #[test]
    fn test_unknown_table() {
        let mut scheduler = Scheduler::new([("driveState", 5)]).unwrap();
        assert!(!scheduler.is_due("climateState", at(0)));
        scheduler.record_sample("climateState", at(0));
        assert_eq!(scheduler.last_sampled_at("climateState"), None);
        assert_eq!(scheduler.interval("driveState"), Some(Duration::seconds(5)));
    }

    #[test]
    fn test_invalid_intervals() {
        assert!(matches!(
            Scheduler::new([("driveState", 0)]),
            Err(ConfigError::InvalidInterval { secs: 0, .. })
        ));
        assert!(matches!(
            Scheduler::new(Vec::<(String, u64)>::new()),
            Err(ConfigError::NoTables)
        ));
    }

    #[test]
    fn test_unrepresentable_due_time_is_never_due() {
        let mut scheduler = Scheduler::new([("driveState", 5), ("chargeState", 9_000_000_000_000)]).unwrap();
        scheduler.record_sample("driveState", at(0));
        scheduler.record_sample("chargeState", at(0));

        assert!(!scheduler.is_due("chargeState", at(1_000_000)));
        assert_eq!(scheduler.due_tables(at(5)), vec!["driveState"]);
        assert_eq!(scheduler.next_due(), Some(at(5)));

        scheduler.record_sample("driveState", DateTime::<Utc>::MAX_UTC);
        assert_eq!(scheduler.next_due(), Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_min_interval() {
        let scheduler = Scheduler::new([("a", 300), ("b", 5), ("c", 900)]).unwrap();
        assert_eq!(scheduler.min_interval(), Duration::seconds(5));
        assert_eq!(scheduler.table_names(), vec!["a", "b", "c"]);
    }
}
