//! Running trackers on their own threads
//!
//! Each tracker gets a dedicated OS thread and shares nothing with the
//! others; the supervisor only holds the channel ends and join handles.

use crate::tracker::{ControlLink, Tracker, TrackerState};
use crate::types::Command;
use std::ops::Deref;
use std::thread::{self, JoinHandle};

/// A running tracker
#[derive(Debug)]
pub struct TrackerHandle {
    vin: String,
    name: String,
    link: ControlLink,
    thread: JoinHandle<TrackerState>,
}

impl TrackerHandle {
    /// Start `tracker` on a new thread
    pub fn spawn(tracker: Tracker, link: ControlLink) -> std::io::Result<Self> {
        let vin = tracker.vin().to_string();
        let name = tracker.name().to_string();
        let thread = thread::Builder::new()
            .name(format!("tracker-{}", vin))
            .spawn(move || tracker.run())?;
        Ok(Self { vin, name, link, thread })
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the tracker to end, returning its final state and any status
    /// messages nobody read yet. A panicking tracker counts as failed.
    pub fn join(self) -> (TrackerState, Vec<String>) {
        let state = match self.thread.join() {
            Ok(state) => state,
            Err(_) => {
                log::error!("Tracker thread for {} panicked", self.vin);
                TrackerState::Failed
            }
        };
        // The tracker's sender is gone now, so this drains everything it sent
        (state, self.link.drain_status())
    }
}

impl Deref for TrackerHandle {
    type Target = ControlLink;

    fn deref(&self) -> &ControlLink {
        &self.link
    }
}

/// Set of independently running trackers
#[derive(Debug, Default)]
pub struct Supervisor {
    handles: Vec<TrackerHandle>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, tracker: Tracker, link: ControlLink) -> std::io::Result<()> {
        let handle = TrackerHandle::spawn(tracker, link)?;
        log::info!("Spawned tracker for {} ({})", handle.name(), handle.vin());
        self.handles.push(handle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[TrackerHandle] {
        &self.handles
    }

    /// Send `command` to every tracker
    pub fn broadcast(&self, command: Command) {
        for handle in &self.handles {
            handle.send(command);
        }
    }

    /// Pending status messages from every tracker, tagged with the VIN
    pub fn poll_status(&self) -> Vec<(String, String)> {
        self.handles
            .iter()
            .flat_map(|h| h.drain_status().into_iter().map(move |msg| (h.vin().to_string(), msg)))
            .collect()
    }

    pub fn all_finished(&self) -> bool {
        self.handles.iter().all(TrackerHandle::is_finished)
    }

    /// Wait for every tracker, returning `(vin, final state, undelivered status messages)`
    pub fn join_all(self) -> Vec<(String, TrackerState, Vec<String>)> {
        self.handles
            .into_iter()
            .map(|handle| {
                let vin = handle.vin().to_string();
                let (state, remaining) = handle.join();
                (vin, state, remaining)
            })
            .collect()
    }
}
