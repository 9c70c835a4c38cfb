//! Per-vehicle tracker
//!
//! One `Tracker` owns everything about one vehicle: its API handle, optional
//! sample store and notifier, the per-table schedule, the last sample of
//! every table, the geofences and the motion state. It runs a strictly
//! sequential poll / diff / detect / dispatch cycle and is controlled through
//! a command channel:
//!
//! ```text
//! STARTING ──> RUNNING <──> PAUSED
//!    │            │
//!    │            ├──> STOPPED
//!    └────────────┴──> FAILED
//! ```
//!
//! Lifecycle and failures are reported as plain strings on the status
//! channel (`TRACKING <name>`, `PAUSED <name>`, `RESUMED <name>`,
//! `STOPPING <name>`, `BAILING <name>: <error>`).

use crate::api::VehicleApi;
use crate::clock::Clock;
use crate::config::{DispatchPolicy, TrackerConfig};
use crate::diff::{diff, SnapshotDiff};
use crate::geo::{Fence, LatLon, TransitionKind};
use crate::notifier::Notifier;
use crate::scheduler::Scheduler;
use crate::storage::Storage;
use crate::types::{Command, ConfigError, EventType, NotificationEvent, Result, Snapshot, Timestamp, TrackerError};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Capacity of each tracker's command channel
pub const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Shortest pause between cycles, so a table that keeps returning no data
/// is not polled in a tight loop
pub const MIN_CYCLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Starting,
    Running,
    Paused,
    Stopped,
    Failed,
}

impl TrackerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackerState::Stopped | TrackerState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Moving,
    Stopped,
}

/// Result of one RUNNING cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    Stopped,
}

/// Latest sample of one table
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub snapshot: Snapshot,
    pub sampled_at: Timestamp,
}

/// Supervisor's end of a tracker's channels
#[derive(Debug)]
pub struct ControlLink {
    commands: SyncSender<String>,
    status: Receiver<String>,
}

impl ControlLink {
    /// Queue a command; fails if the tracker is gone or its queue is full
    pub fn send(&self, command: Command) -> bool {
        self.send_raw(command.as_str())
    }

    /// Queue an arbitrary payload (unknown payloads are ignored by the tracker)
    pub fn send_raw(&self, payload: &str) -> bool {
        match self.commands.try_send(payload.to_string()) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Could not deliver command '{}': {}", payload, e);
                false
            }
        }
    }

    /// Next status message, if one is waiting
    pub fn try_status(&self) -> Option<String> {
        self.status.try_recv().ok()
    }

    /// Wait up to `timeout` for the next status message
    pub fn recv_status_timeout(&self, timeout: Duration) -> Option<String> {
        self.status.recv_timeout(timeout).ok()
    }

    /// All status messages currently waiting
    pub fn drain_status(&self) -> Vec<String> {
        self.status.try_iter().collect()
    }
}

pub struct Tracker {
    /// Captured once so every status message can name the vehicle
    name: String,
    vin: String,
    config: TrackerConfig,
    api: Box<dyn VehicleApi>,
    storage: Option<Box<dyn Storage>>,
    notifier: Option<Notifier>,
    clock: Arc<dyn Clock>,
    commands: Receiver<String>,
    status: Sender<String>,
    scheduler: Scheduler,
    samples: BTreeMap<String, SampleRecord>,
    fences: Vec<Fence>,
    motion: Option<MotionState>,
    state: TrackerState,
}

impl Tracker {
    /// Build a tracker and the supervisor's end of its channels
    ///
    /// Region and interval problems are reported here, before any polling.
    pub fn new(
        api: Box<dyn VehicleApi>,
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<(Self, ControlLink), ConfigError> {
        config.validate()?;
        let scheduler = Scheduler::new(config.intervals.iter().map(|(t, s)| (t.clone(), *s)))?;
        let fences = config.build_fences()?;

        let (command_tx, command_rx) = mpsc::sync_channel(COMMAND_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = mpsc::channel();

        let tracker = Self {
            name: api.name().to_string(),
            vin: api.vin().to_string(),
            config,
            api,
            storage: None,
            notifier: None,
            clock,
            commands: command_rx,
            status: status_tx,
            scheduler,
            samples: BTreeMap::new(),
            fences,
            motion: None,
            state: TrackerState::Starting,
        };
        let link = ControlLink {
            commands: command_tx,
            status: status_rx,
        };
        Ok((tracker, link))
    }

    /// Builder method: persist samples to `storage`
    pub fn with_storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Builder method: dispatch events through `notifier`
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run the full lifecycle until STOP or a fatal error
    ///
    /// A panic inside the start or a cycle is reported like any other fatal
    /// error, and the sample store is still released.
    pub fn run(mut self) -> TrackerState {
        if let Err(e) = self.guarded(Self::start) {
            self.bail(&e);
            return self.finish();
        }

        loop {
            match self.guarded(Self::step) {
                Ok(CycleOutcome::Continue) => self.clock.sleep(self.next_sleep()),
                Ok(CycleOutcome::Stopped) => break,
                Err(e) => {
                    self.bail(&e);
                    break;
                }
            }
        }
        self.finish()
    }

    /// STARTING: take and persist a full sample, seed every table and fence
    pub fn start(&mut self) -> Result<()> {
        self.state = TrackerState::Starting;
        log::info!("Starting tracker for {} ({})", self.name, self.vin);

        let tables = self.scheduler.table_names();
        let state = self.api.get_car_state(&tables);
        let missing: Vec<String> = tables.iter().filter(|t| !state.contains_key(*t)).cloned().collect();
        if !missing.is_empty() {
            return Err(TrackerError::IncompleteSample { missing });
        }

        let location = state
            .get(&self.config.location_table)
            .and_then(|snapshot| self.location_of(snapshot));
        if location.is_none() {
            return Err(self.invalid_location());
        }

        let sampled_at = self.clock.now();
        if let Some(storage) = self.storage.as_mut() {
            if let Err(e) = storage.insert_state(&state, sampled_at) {
                log::warn!("{}: failed to store initial state: {}", self.vin, e);
                self.emit(format!("Initial state insert failed for {}: {}", self.name, e));
            }
        }

        for (table, snapshot) in state {
            self.scheduler.record_sample(&table, sampled_at);
            self.samples.insert(table, SampleRecord { snapshot, sampled_at });
        }
        self.update_fences()?;

        self.emit(format!("TRACKING {}", self.name));
        self.state = TrackerState::Running;
        Ok(())
    }

    /// One RUNNING cycle, without the trailing sleep
    pub fn step(&mut self) -> Result<CycleOutcome> {
        match self.next_command() {
            Some(Command::Stop) => return Ok(self.stop()),
            Some(Command::Pause) => {
                if !self.wait_for_resume() {
                    return Ok(self.stop());
                }
            }
            Some(Command::Resume) | None => {}
        }

        self.poll_due_tables()?;
        self.update_fences()?;
        Ok(CycleOutcome::Continue)
    }

    /// Release the sample store and report the final state
    pub fn finish(mut self) -> TrackerState {
        if let Some(storage) = self.storage.take() {
            if let Err(e) = storage.close() {
                log::warn!("{}: failed to close sample store: {}", self.vin, e);
            }
        }
        log::info!("Tracker for {} finished in state {:?}", self.name, self.state);
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn sample(&self, table: &str) -> Option<&SampleRecord> {
        self.samples.get(table)
    }

    pub fn fences(&self) -> &[Fence] {
        &self.fences
    }

    /// `None` until two location samples have been compared
    pub fn motion_state(&self) -> Option<MotionState> {
        self.motion
    }

    /// Pause before the next cycle: until the earliest due table, bounded by
    /// [`MIN_CYCLE`] below and the shortest interval above
    pub fn next_sleep(&self) -> Duration {
        let ceiling = self.scheduler.min_interval().to_std().unwrap_or(MIN_CYCLE).max(MIN_CYCLE);
        let until_due = match self.scheduler.next_due() {
            Some(due) => (due - self.clock.now()).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        };
        until_due.clamp(MIN_CYCLE, ceiling)
    }

    fn next_command(&mut self) -> Option<Command> {
        match self.commands.try_recv() {
            Ok(payload) => match Command::parse(&payload) {
                Some(command) => {
                    log::debug!("{}: received {}", self.vin, command);
                    Some(command)
                }
                None => {
                    log::warn!("{}: unknown tracker command '{}'", self.vin, payload);
                    None
                }
            },
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("{}: command channel closed, stopping", self.vin);
                Some(Command::Stop)
            }
        }
    }

    /// PAUSED: block on the command channel until RESUME. Returns false if
    /// the channel closed first.
    fn wait_for_resume(&mut self) -> bool {
        self.state = TrackerState::Paused;
        log::info!("{}: paused", self.vin);
        self.emit(format!("PAUSED {}", self.name));
        loop {
            match self.commands.recv() {
                Ok(payload) if Command::parse(&payload) == Some(Command::Resume) => {
                    log::info!("{}: resumed", self.vin);
                    self.emit(format!("RESUMED {}", self.name));
                    self.state = TrackerState::Running;
                    return true;
                }
                Ok(payload) => log::debug!("{}: ignoring '{}' while paused", self.vin, payload),
                Err(_) => {
                    log::warn!("{}: command channel closed while paused", self.vin);
                    return false;
                }
            }
        }
    }

    /// Run `f`, turning a panic into a fatal error
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(result) => result,
            Err(payload) => Err(TrackerError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    fn stop(&mut self) -> CycleOutcome {
        self.emit(format!("STOPPING {}", self.name));
        self.state = TrackerState::Stopped;
        CycleOutcome::Stopped
    }

    fn bail(&mut self, error: &TrackerError) {
        log::error!("{}: tracker failed: {}", self.vin, error);
        self.emit(format!("BAILING {}: {}", self.name, error));
        self.state = TrackerState::Failed;
    }

    fn poll_due_tables(&mut self) -> Result<()> {
        let now = self.clock.now();
        for table in self.scheduler.due_tables(now) {
            match self.api.get_table(&table) {
                Some(snapshot) => {
                    let sampled_at = self.clock.now();
                    self.refresh_table(&table, snapshot, sampled_at)?;
                }
                None => log::debug!("{}: no data for '{}' this cycle", self.vin, table),
            }
        }
        Ok(())
    }

    fn refresh_table(&mut self, table: &str, snapshot: Snapshot, sampled_at: Timestamp) -> Result<()> {
        let previous = self.samples.get(table);
        let changes = match previous {
            Some(record) => diff(&snapshot, &record.snapshot),
            None => diff(&snapshot, &Snapshot::new()),
        };
        let previous_location = previous.and_then(|record| self.location_of(&record.snapshot));

        if changes.is_schema_change() {
            self.emit(schema_change_message(table, &changes));
        }

        if changes.is_schema_change() || changes.has_material_change(&self.config.volatile_fields) {
            self.persist(table, &snapshot, sampled_at);
        } else {
            log::trace!("{}: '{}' unchanged apart from volatile fields", self.vin, table);
        }

        let current_location = self.location_of(&snapshot);
        self.samples.insert(table.to_string(), SampleRecord { snapshot, sampled_at });
        self.scheduler.record_sample(table, sampled_at);

        if table == self.config.location_table {
            if current_location.is_none() {
                let error = self.invalid_location();
                log::warn!("{}: {}", self.vin, error);
                self.emit(format!("LOCATION MISSING {}: {}", self.name, error));
            }
            self.check_motion(previous_location, current_location)?;
        }
        Ok(())
    }

    fn persist(&mut self, table: &str, snapshot: &Snapshot, sampled_at: Timestamp) {
        let Some(storage) = self.storage.as_mut() else {
            return;
        };
        if let Err(e) = storage.insert_row(table, snapshot, sampled_at) {
            log::warn!("{}: failed to store '{}': {}", self.vin, table, e);
            self.emit(format!("Table {} insert failed for {}: {}", table, self.name, e));
        }
    }

    fn check_motion(&mut self, previous: Option<LatLon>, current: Option<LatLon>) -> Result<()> {
        let (Some(previous), Some(current)) = (previous, current) else {
            return Ok(());
        };

        let moved_km = previous.distance_km(&current);
        let observed = if moved_km > self.config.distance_threshold_km {
            MotionState::Moving
        } else {
            MotionState::Stopped
        };
        log::trace!("{}: moved {:.3} km, {:?}", self.vin, moved_km, observed);

        let event = match (self.motion.replace(observed), observed) {
            (Some(MotionState::Stopped), MotionState::Moving) => EventType::StartedMoving,
            (Some(MotionState::Moving), MotionState::Stopped) => EventType::StoppedMoving,
            _ => return Ok(()),
        };
        let vin = self.vin.clone();
        self.dispatch(event, vin)
    }

    fn update_fences(&mut self) -> Result<()> {
        let Some((position, at)) = self.current_location() else {
            return Ok(());
        };

        let mut crossings = Vec::new();
        for fence in &mut self.fences {
            if let Some(transition) = fence.update(position.lat, position.lon, at) {
                crossings.push((fence.id().to_string(), transition.kind));
            }
        }

        for (region, kind) in crossings {
            let event = match kind {
                TransitionKind::Enter => EventType::EnterRegion,
                TransitionKind::Exit => EventType::ExitRegion,
            };
            self.dispatch(event, region)?;
        }
        Ok(())
    }

    fn dispatch(&self, event_type: EventType, arg: String) -> Result<()> {
        log::info!("{}: {} ({})", self.vin, event_type, arg);
        let Some(notifier) = self.notifier.as_ref() else {
            return Ok(());
        };

        let event = NotificationEvent {
            event_type,
            vin: self.vin.clone(),
            arg,
        };
        match notifier.dispatch(&event) {
            Ok(()) => Ok(()),
            Err(e) if self.config.dispatch_policy == DispatchPolicy::Continue => {
                log::warn!("{}: notification {} failed: {}", self.vin, event_type, e);
                self.emit(format!("NOTIFY FAILED {}: {}", self.name, e));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Freshest position and when it was sampled
    fn current_location(&self) -> Option<(LatLon, Timestamp)> {
        let record = self.samples.get(&self.config.location_table)?;
        Some((self.location_of(&record.snapshot)?, record.sampled_at))
    }

    fn invalid_location(&self) -> TrackerError {
        TrackerError::InvalidLocation {
            table: self.config.location_table.clone(),
            latitude: self.config.latitude_field.clone(),
            longitude: self.config.longitude_field.clone(),
        }
    }

    fn location_of(&self, snapshot: &Snapshot) -> Option<LatLon> {
        let lat = snapshot.get_f64(&self.config.latitude_field)?;
        let lon = snapshot.get_f64(&self.config.longitude_field)?;
        Some(LatLon::new(lat, lon))
    }

    fn emit(&self, message: String) {
        log::debug!("status: {}", message);
        if self.status.send(message).is_err() {
            log::trace!("{}: status receiver gone", self.vin);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn schema_change_message(table: &str, changes: &SnapshotDiff) -> String {
    format!(
        "Table {} Schema Change: ADD={:?}, REM={:?}",
        table, changes.added, changes.removed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_change_message() {
        let mut changes = SnapshotDiff::default();
        changes.added.insert("heading".to_string());
        changes.removed.insert("power".to_string());
        assert_eq!(
            schema_change_message("driveState", &changes),
            r#"Table driveState Schema Change: ADD={"heading"}, REM={"power"}"#
        );
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }

    #[test]
    fn test_terminal_states() {
        assert!(TrackerState::Stopped.is_terminal());
        assert!(TrackerState::Failed.is_terminal());
        assert!(!TrackerState::Paused.is_terminal());
        assert!(!TrackerState::Running.is_terminal());
    }
}
