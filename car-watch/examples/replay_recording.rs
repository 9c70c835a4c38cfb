//! Replay a vehicle recording through a tracker in simulated time
//!
//! Runs the full tracker cycle (scheduling, diffing, motion and geofences)
//! against a JSON recording, with a manual clock so hours of polling finish
//! instantly. Status messages and per-cycle motion/fence state are printed.
//!
//! Usage:
//!   replay_recording <recording.json> [--cycles <count>] [--region <lat,lon,radius_km>]
//!
//! Example:
//!   replay_recording demos/red-car.json --cycles 20 --region 37.4636,-122.1700,0.5

use car_watch::{
    Clock, CycleOutcome, ManualClock, RegionSpec, ReplaySource, RetryPolicy, RetryingApi, Tracker,
    TrackerConfig,
};
use chrono::Utc;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

fn parse_region(value: &str) -> Option<RegionSpec> {
    let parts: Vec<f64> = value.split(',').map(|p| p.trim().parse().ok()).collect::<Option<_>>()?;
    match parts.as_slice() {
        [lat, lon, radius_km] => Some(RegionSpec::Circle {
            lat: *lat,
            lon: *lon,
            radius_km: *radius_km,
            id: Some("region".to_string()),
        }),
        _ => None,
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <recording.json> [--cycles <count>] [--region <lat,lon,radius_km>]", args[0]);
        std::process::exit(1);
    }

    let recording = PathBuf::from(&args[1]);
    let mut cycles = 10usize;
    let mut config = TrackerConfig::new();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--cycles" if i + 1 < args.len() => {
                cycles = args[i + 1].parse().unwrap_or(cycles);
                i += 2;
            }
            "--region" if i + 1 < args.len() => {
                match parse_region(&args[i + 1]) {
                    Some(region) => config = config.add_region(region),
                    None => eprintln!("Ignoring malformed region: {}", args[i + 1]),
                }
                i += 2;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                i += 1;
            }
        }
    }

    let clock = ManualClock::new(Utc::now());
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());

    let source = match ReplaySource::open(&recording) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let api = RetryingApi::new(source, RetryPolicy::default(), shared.clone());

    let (mut tracker, link) = match Tracker::new(Box::new(api), config, shared) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("=== Replaying {:?} ===\n", recording);

    if let Err(e) = tracker.start() {
        eprintln!("Initial sample failed: {}", e);
        std::process::exit(1);
    }
    for message in link.drain_status() {
        println!("[{}] {}", clock.now().format("%H:%M:%S"), message);
    }

    for cycle in 1..=cycles {
        clock.sleep(tracker.next_sleep());
        let outcome = tracker.step();
        for message in link.drain_status() {
            println!("[{}] {}", clock.now().format("%H:%M:%S"), message);
        }

        let inside: Vec<&str> = tracker
            .fences()
            .iter()
            .filter(|f| f.is_inside() == Some(true))
            .map(|f| f.id())
            .collect();
        println!(
            "cycle {:>3} at {}: motion={:?} inside={:?}",
            cycle,
            clock.now().format("%H:%M:%S"),
            tracker.motion_state(),
            inside
        );

        match outcome {
            Ok(CycleOutcome::Continue) => {}
            Ok(CycleOutcome::Stopped) => break,
            Err(e) => {
                eprintln!("Tracker failed: {}", e);
                break;
            }
        }
    }

    let state = tracker.finish();
    println!("\nTracker ended {:?}", state);
}
