//! Car Watch CLI Application
//!
//! Command-line front end for the car-watch tracker library. It reads a
//! TOML configuration, starts one tracker per vehicle and relays every
//! tracker status message to the log until the trackers end.

use anyhow::{bail, Context, Result};
use car_watch::{
    Clock, Command, ControlLink, Notifier, ReplaySource, RetryPolicy, RetryingApi, SqliteStorage, Supervisor,
    SystemClock, TableSource, Tracker, TrackerState,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod config;

use config::VehicleConfig;

/// How often tracker status channels are drained
const STATUS_POLL: Duration = Duration::from_millis(250);

/// Car Watch - Track vehicles, persist changes and fire geofence notifications
#[derive(Parser, Debug)]
#[command(name = "car-watch")]
#[command(about = "Track vehicle state, geofences and motion", long_about = None)]
#[command(version, disable_version_flag = true)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "./car-watch.toml")]
    config: PathBuf,

    /// SQLite database for samples (overrides the config file)
    #[arg(short, long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Only track the vehicle with this VIN
    #[arg(short = 'V', long, value_name = "VIN")]
    vin: Option<String>,

    /// Send STOP to every tracker after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,

    /// Print version (-V selects a vehicle)
    #[arg(long, action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Car Watch CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using tracker library v{}", car_watch::VERSION);

    log::info!("Loading configuration from: {:?}", args.config);
    let app_config = config::load_config(&args.config)?;

    // Command line wins over the config file
    let database = args.database.clone().or_else(|| app_config.general.database.clone());
    let vehicles = app_config.select_vehicles(args.vin.as_deref())?;
    if vehicles.is_empty() {
        bail!("No vehicles configured in {:?}", args.config);
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut supervisor = Supervisor::new();
    for vehicle in vehicles {
        let (tracker, link) = build_tracker(
            vehicle,
            database.as_deref(),
            &app_config.general.notifier_dir,
            clock.clone(),
        )?;
        supervisor
            .spawn(tracker, link)
            .with_context(|| format!("Failed to start tracker thread for {}", vehicle.vin))?;
    }

    let failed = supervise(supervisor, args.duration.map(Duration::from_secs));
    if failed > 0 {
        bail!("{} tracker(s) failed", failed);
    }

    Ok(())
}

/// Wire one vehicle's replay source, storage and notifier into a tracker
fn build_tracker(
    vehicle: &VehicleConfig,
    database: Option<&Path>,
    notifier_dir: &Path,
    clock: Arc<dyn Clock>,
) -> Result<(Tracker, ControlLink)> {
    let source = ReplaySource::open(&vehicle.replay)
        .with_context(|| format!("Failed to load recording for {}", vehicle.vin))?;
    if source.vin() != vehicle.vin {
        bail!(
            "Recording {:?} is for VIN {}, configured as {}",
            vehicle.replay,
            source.vin(),
            vehicle.vin
        );
    }
    let api = RetryingApi::new(source, RetryPolicy::default(), clock.clone());

    let (mut tracker, link) = Tracker::new(Box::new(api), vehicle.tracking.clone(), clock)
        .with_context(|| format!("Invalid configuration for {}", vehicle.vin))?;

    if let Some(path) = database {
        let storage = SqliteStorage::open(path, vehicle.vin.clone())
            .with_context(|| format!("Failed to open database {:?}", path))?;
        tracker = tracker.with_storage(Box::new(storage));
    }

    if !vehicle.notifiers.is_empty() {
        let notifier = Notifier::new(notifier_dir, &vehicle.notifiers)
            .with_context(|| format!("Invalid notifiers for {}", vehicle.vin))?;
        log::debug!("{}", notifier);
        tracker = tracker.with_notifier(notifier);
    }

    Ok((tracker, link))
}

/// Relay status messages until every tracker ends; returns the number that failed
fn supervise(supervisor: Supervisor, duration: Option<Duration>) -> usize {
    let deadline = duration.map(|d| Instant::now() + d);
    let mut stop_sent = false;

    loop {
        for (vin, message) in supervisor.poll_status() {
            log::info!("[{}] {}", vin, message);
        }
        if supervisor.all_finished() {
            break;
        }
        if !stop_sent && deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("Duration elapsed, stopping {} tracker(s)", supervisor.len());
            supervisor.broadcast(Command::Stop);
            stop_sent = true;
        }
        thread::sleep(STATUS_POLL);
    }

    let mut failed = 0;
    for (vin, state, remaining) in supervisor.join_all() {
        for message in remaining {
            log::info!("[{}] {}", vin, message);
        }
        if state == TrackerState::Failed {
            log::error!("Tracker for {} failed", vin);
            failed += 1;
        } else {
            log::info!("Tracker for {} ended {:?}", vin, state);
        }
    }
    failed
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
