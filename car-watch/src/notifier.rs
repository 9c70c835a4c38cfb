//! Event notification dispatch
//!
//! A `Notifier` maps each event type to the external programs that should be
//! run when it fires. Programs live in a notifier directory and receive a
//! single command-line argument; a zero exit status means success.

use crate::types::{ConfigError, DispatchError, EventType, NotificationEvent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Default location of notifier programs
pub const DEFAULT_NOTIFIER_DIR: &str = "./notifiers";

/// One configured notifier program and the events it subscribes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierSpec {
    /// Program file name, relative to the notifier directory
    pub program: String,
    /// Event type names (e.g. "ENTER_REGION")
    pub events: Vec<String>,
}

impl NotifierSpec {
    pub fn new<I, S>(program: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            events: events.into_iter().map(Into::into).collect(),
        }
    }
}

/// Validated event type → handler programs table
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    handlers: BTreeMap<EventType, Vec<PathBuf>>,
}

impl Notifier {
    /// Validate every notifier entry and build the dispatch table
    ///
    /// Fails if a program is missing or not executable, or if any event type
    /// is outside the fixed set. Handlers for each event keep the order in
    /// which they were configured.
    pub fn new(notifier_dir: &Path, specs: &[NotifierSpec]) -> Result<Self, ConfigError> {
        let mut handlers: BTreeMap<EventType, Vec<PathBuf>> = BTreeMap::new();

        for spec in specs {
            let path = notifier_dir.join(&spec.program);
            if !is_executable(&path) {
                return Err(ConfigError::InvalidNotifier {
                    path,
                    events: spec.events.clone(),
                });
            }

            // Repeated event names within one entry register the program once
            let events = spec
                .events
                .iter()
                .map(|name| name.parse::<EventType>())
                .collect::<Result<BTreeSet<_>, _>>()?;

            for event in events {
                handlers.entry(event).or_default().push(path.clone());
            }
            log::debug!("Registered notifier {:?} for {:?}", path, spec.events);
        }

        Ok(Self { handlers })
    }

    /// Handlers registered for `event`, in configured order
    pub fn handlers(&self, event: EventType) -> &[PathBuf] {
        self.handlers.get(&event).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run every handler registered for `event` with `arg`
    ///
    /// Stops at the first handler that fails to start or exits non-zero.
    pub fn notify(&self, event: EventType, arg: &str) -> Result<(), DispatchError> {
        if arg.is_empty() {
            return Err(DispatchError::MissingArg(event));
        }

        let programs = self.handlers(event);
        if programs.is_empty() {
            return Err(DispatchError::NoHandlers(event));
        }

        for program in programs {
            log::info!("Event: {}, Notifier: {:?}({})", event, program, arg);
            let status = Command::new(program)
                .arg(arg)
                .status()
                .map_err(|source| DispatchError::Spawn {
                    program: program.clone(),
                    source,
                })?;

            if !status.success() {
                return Err(DispatchError::HandlerFailed {
                    program: program.clone(),
                    arg: arg.to_string(),
                    status,
                });
            }
        }

        Ok(())
    }

    pub fn dispatch(&self, event: &NotificationEvent) -> Result<(), DispatchError> {
        self.notify(event.event_type, &event.arg)
    }
}

impl fmt::Display for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "eventsNotifiers:")?;
        for (event, programs) in &self.handlers {
            let names: Vec<String> = programs.iter().map(|p| p.display().to_string()).collect();
            writeln!(f, "  {}: [{}]", event, names.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script into `dir`
    fn script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn notifier_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        // Each handler appends its name and argument to calls.log
        script(dir.path(), "sms.sh", r#"echo "sms $1" >> "$(dirname "$0")/calls.log""#);
        script(dir.path(), "push.sh", r#"echo "push $1" >> "$(dirname "$0")/calls.log""#);
        script(dir.path(), "broken.sh", "exit 3");
        dir
    }

    fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_handlers_in_configured_order() {
        let dir = notifier_dir();
        let notifier = Notifier::new(
            dir.path(),
            &[
                NotifierSpec::new("sms.sh", ["STOPPED_MOVING", "STARTED_MOVING", "ENTER_REGION"]),
                NotifierSpec::new("push.sh", ["ENTER_REGION"]),
            ],
        )
        .unwrap();

        assert_eq!(
            notifier.handlers(EventType::EnterRegion),
            &[dir.path().join("sms.sh"), dir.path().join("push.sh")]
        );
        assert_eq!(notifier.handlers(EventType::StoppedMoving), &[dir.path().join("sms.sh")]);
        assert!(notifier.handlers(EventType::ExitRegion).is_empty());

        notifier.notify(EventType::EnterRegion, "home").unwrap();
        assert_eq!(calls(dir.path()), vec!["sms home", "push home"]);
    }

    #[test]
    fn test_repeated_event_registers_once() {
        let dir = notifier_dir();
        let notifier = Notifier::new(
            dir.path(),
            &[NotifierSpec::new("sms.sh", ["ENTER_REGION", "EXIT_REGION", "ENTER_REGION"])],
        )
        .unwrap();

        assert_eq!(notifier.handlers(EventType::EnterRegion), &[dir.path().join("sms.sh")]);
        notifier.notify(EventType::EnterRegion, "home").unwrap();
        assert_eq!(calls(dir.path()), vec!["sms home"]);
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let dir = notifier_dir();
        let result = Notifier::new(dir.path(), &[NotifierSpec::new("sms.sh", ["XYZZY"])]);
        assert!(matches!(result, Err(ConfigError::UnknownEventType(name)) if name == "XYZZY"));
    }

    #[test]
    fn test_missing_program_rejected() {
        let dir = notifier_dir();
        let result = Notifier::new(dir.path(), &[NotifierSpec::new("asdf", ["EXIT_REGION"])]);
        assert!(matches!(result, Err(ConfigError::InvalidNotifier { .. })));
    }

    #[test]
    fn test_non_executable_program_rejected() {
        let dir = notifier_dir();
        fs::write(dir.path().join("plain.txt"), "not a program").unwrap();
        let result = Notifier::new(dir.path(), &[NotifierSpec::new("plain.txt", ["EXIT_REGION"])]);
        assert!(matches!(result, Err(ConfigError::InvalidNotifier { .. })));
    }

    #[test]
    fn test_notify_requires_arg_and_handlers() {
        let dir = notifier_dir();
        let notifier =
            Notifier::new(dir.path(), &[NotifierSpec::new("sms.sh", ["ENTER_REGION"])]).unwrap();

        assert!(matches!(
            notifier.notify(EventType::EnterRegion, ""),
            Err(DispatchError::MissingArg(EventType::EnterRegion))
        ));
        assert!(matches!(
            notifier.notify(EventType::ExitRegion, "home"),
            Err(DispatchError::NoHandlers(EventType::ExitRegion))
        ));
        assert!(calls(dir.path()).is_empty());
    }

    #[test]
    fn test_failing_handler_aborts_dispatch() {
        let dir = notifier_dir();
        let notifier = Notifier::new(
            dir.path(),
            &[
                NotifierSpec::new("broken.sh", ["EXIT_REGION"]),
                NotifierSpec::new("sms.sh", ["EXIT_REGION"]),
            ],
        )
        .unwrap();

        let event = NotificationEvent {
            event_type: EventType::ExitRegion,
            vin: "5YJ3E1EA7JF000001".into(),
            arg: "work".into(),
        };
        let err = notifier.dispatch(&event).unwrap_err();
        assert!(matches!(err, DispatchError::HandlerFailed { ref arg, .. } if arg == "work"));
        // sms.sh comes after the failing handler and never runs
        assert!(calls(dir.path()).is_empty());
    }

    #[test]
    fn test_display_lists_handlers() {
        let dir = notifier_dir();
        let notifier =
            Notifier::new(dir.path(), &[NotifierSpec::new("sms.sh", ["STARTED_MOVING"])]).unwrap();
        let text = notifier.to_string();
        assert!(text.starts_with("eventsNotifiers:"));
        assert!(text.contains("STARTED_MOVING"));
        assert!(text.contains("sms.sh"));
    }
}
