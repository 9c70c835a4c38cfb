//! Car Watch Tracker Library
//!
//! Continuously tracks intermittently-reachable vehicles by polling their
//! data API on a per-table schedule, keeping the latest sample of every
//! table, persisting meaningful changes, and raising geofence and motion
//! notifications.
//!
//! # Architecture
//!
//! Every vehicle gets its own [`Tracker`], fully isolated from the others:
//! - [`Scheduler`] decides which tables are due
//! - [`diff`](diff::diff) compares each fresh snapshot with the previous one
//! - [`Fence`]s and the motion check detect region and movement edges
//! - the [`Notifier`] runs external programs for those edges
//! - a [`Storage`] keeps the samples that actually changed
//!
//! Trackers are driven from a [`Supervisor`] that gives each one a thread, a
//! bounded command channel (`PAUSE` / `RESUME` / `STOP`) and an unbounded
//! status channel.
//!
//! # Example Usage
//!
//! ```no_run
//! use car_watch::{
//!     Command, RetryPolicy, RetryingApi, ReplaySource, Supervisor, SystemClock, Tracker,
//!     TrackerConfig, RegionSpec,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(SystemClock);
//! let source = ReplaySource::open(Path::new("red-car.json")).unwrap();
//! let api = RetryingApi::new(source, RetryPolicy::default(), clock.clone());
//!
//! let config = TrackerConfig::new()
//!     .with_interval("driveState", 60)
//!     .add_region(RegionSpec::Circle { lat: 37.46, lon: -122.17, radius_km: 0.5, id: Some("home".into()) });
//!
//! let (tracker, link) = Tracker::new(Box::new(api), config, clock).unwrap();
//! let mut supervisor = Supervisor::new();
//! supervisor.spawn(tracker, link).unwrap();
//!
//! supervisor.broadcast(Command::Stop);
//! for (vin, state, _) in supervisor.join_all() {
//!     println!("{} ended {:?}", vin, state);
//! }
//! ```

// Public modules
pub mod api;
pub mod clock;
pub mod config;
pub mod diff;
pub mod geo;
pub mod notifier;
pub mod replay;
pub mod scheduler;
pub mod storage;
pub mod supervisor;
pub mod tracker;
pub mod types;

// Re-export main types for convenience
pub use api::{RetryPolicy, RetryingApi, TableSource, VehicleApi};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DispatchPolicy, RegionSpec, TrackerConfig};
pub use diff::SnapshotDiff;
pub use geo::{Fence, FenceTransition, LatLon, Shape, TransitionKind};
pub use notifier::{Notifier, NotifierSpec, DEFAULT_NOTIFIER_DIR};
pub use replay::ReplaySource;
pub use scheduler::Scheduler;
pub use storage::{SqliteStorage, Storage};
pub use supervisor::{Supervisor, TrackerHandle};
pub use tracker::{ControlLink, CycleOutcome, MotionState, SampleRecord, Tracker, TrackerState};
pub use types::{
    Command, ConfigError, DispatchError, EventType, FetchError, NotificationEvent, Result,
    Snapshot, StorageError, Timestamp, TrackerError, Value,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
