//! Matching key presses against the mapping and running their actions
//!
//! Actions never block the caller. Combos and commands are started as
//! detached child processes; their exit status is collected by a reaper
//! thread and only logged. The only error a caller sees is a failure to
//! start the process at all.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::combo::{parse_combo, Chord};
use crate::config::{ActionSpec, MappingDocument};
use crate::input::{KeyCode, KeyEvent, KeyPhase};

/// Result of offering one key event to the dispatcher
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A release; only presses trigger actions
    Ignored,
    /// The document is disabled
    Suppressed,
    /// No action is mapped to this key
    Unmapped,
    /// Same key fired again inside the debounce window
    Debounced,
    /// A combo was handed to the injection tool
    Injected,
    /// A command was started
    Launched,
}

impl DispatchOutcome {
    /// Whether an action was actually invoked
    pub fn invoked(self) -> bool {
        matches!(self, DispatchOutcome::Injected | DispatchOutcome::Launched)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("failed to inject combo {combo:?}: {reason}")]
    InjectionFailed { combo: String, reason: String },
    #[error("failed to launch {command:?}: {reason}")]
    LaunchFailed { command: String, reason: String },
}

/// Boundary to the platform facilities that carry out actions
///
/// Implementations must return promptly: start the work, don't wait for it.
pub trait ActionRunner {
    fn inject(&self, chord: &Chord) -> Result<(), DispatchError>;
    fn launch(&self, command: &str) -> Result<(), DispatchError>;
}

impl<R: ActionRunner + ?Sized> ActionRunner for &R {
    fn inject(&self, chord: &Chord) -> Result<(), DispatchError> {
        (**self).inject(chord)
    }

    fn launch(&self, command: &str) -> Result<(), DispatchError> {
        (**self).launch(command)
    }
}

/// Runs actions with `xdotool` (X11) and `sh -c`
#[derive(Debug, Clone)]
pub struct SystemRunner {
    injector: OsString,
    shell: OsString,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            injector: "xdotool".into(),
            shell: "sh".into(),
        }
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use different programs for injection and command launching
    pub fn with_programs(injector: impl Into<OsString>, shell: impl Into<OsString>) -> Self {
        Self {
            injector: injector.into(),
            shell: shell.into(),
        }
    }
}

impl ActionRunner for SystemRunner {
    fn inject(&self, chord: &Chord) -> Result<(), DispatchError> {
        let keys = chord.to_xdotool();
        let mut cmd = Command::new(&self.injector);
        cmd.args(["key", "--clearmodifiers", keys.as_str()]);

        let label = format!("combo {}", keys);
        spawn_detached(cmd, label).map_err(|e| DispatchError::InjectionFailed {
            combo: chord.to_string(),
            reason: e.to_string(),
        })
    }

    fn launch(&self, command: &str) -> Result<(), DispatchError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);

        let label = format!("command {:?}", command);
        spawn_detached(cmd, label).map_err(|e| DispatchError::LaunchFailed {
            command: command.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Start a child in its own process group and reap it on a background thread
fn spawn_detached(mut cmd: Command, label: String) -> io::Result<()> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        // Own process group: a Ctrl+C aimed at the daemon does not reach it
        .process_group(0);

    let child = cmd.spawn()?;
    let pid = child.id();
    tracing::debug!(pid, "Started {}", label);

    let reaper = thread::Builder::new()
        .name(format!("reap-{}", pid))
        .spawn(move || reap(child, label));
    if let Err(e) = reaper {
        tracing::warn!(pid, "Could not start reaper thread: {}", e);
    }
    Ok(())
}

fn reap(mut child: Child, label: String) {
    let pid = child.id();
    match child.wait() {
        Ok(status) if status.success() => tracing::debug!(pid, "{} finished", label),
        Ok(status) => tracing::warn!(pid, "{} exited with {}", label, status),
        Err(e) => tracing::warn!(pid, "Waiting for {} failed: {}", label, e),
    }
}

/// Matches key events against a document and invokes actions
pub struct Dispatcher<R> {
    runner: R,
    debounce: Duration,
    last_fired: HashMap<KeyCode, SystemTime>,
    /// Parsed chords by combo text; each distinct combo is parsed once
    chords: HashMap<String, Chord>,
}

impl<R: ActionRunner> Dispatcher<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            debounce: Duration::ZERO,
            last_fired: HashMap::new(),
            chords: HashMap::new(),
        }
    }

    /// Drop presses of a key that arrive within `window` of its last action
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Offer one key event; at most one action runs per qualifying press
    pub fn dispatch(
        &mut self,
        event: &KeyEvent,
        document: &MappingDocument,
    ) -> Result<DispatchOutcome, DispatchError> {
        if event.phase == KeyPhase::Released {
            return Ok(DispatchOutcome::Ignored);
        }
        if !document.enabled {
            return Ok(DispatchOutcome::Suppressed);
        }
        self.fire(event, document)
    }

    /// Run the action mapped to `code` now, whether or not the document is enabled
    pub fn test_fire(
        &mut self,
        code: KeyCode,
        document: &MappingDocument,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.fire(&KeyEvent::pressed(code, SystemTime::now()), document)
    }

    fn fire(
        &mut self,
        event: &KeyEvent,
        document: &MappingDocument,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(action) = document.lookup(event.code) else {
            return Ok(DispatchOutcome::Unmapped);
        };
        if self.is_bouncing(event) {
            tracing::debug!(code = event.code.0, "Debounced repeat press");
            return Ok(DispatchOutcome::Debounced);
        }
        self.last_fired.insert(event.code, event.timestamp);

        match action {
            ActionSpec::Combo(text) => {
                let chord = cached_chord(&mut self.chords, text)?;
                self.runner.inject(chord)?;
                tracing::info!(code = event.code.0, "Combo: {}", text);
                Ok(DispatchOutcome::Injected)
            }
            ActionSpec::Command(command) => {
                self.runner.launch(command)?;
                tracing::info!(code = event.code.0, "Run: {}", command);
                Ok(DispatchOutcome::Launched)
            }
        }
    }

    fn is_bouncing(&self, event: &KeyEvent) -> bool {
        if self.debounce.is_zero() {
            return false;
        }
        self.last_fired
            .get(&event.code)
            .and_then(|last| event.timestamp.duration_since(*last).ok())
            .map(|elapsed| elapsed < self.debounce)
            .unwrap_or(false)
    }
}

/// Loaded documents hold only valid combos; one built in code may not
fn cached_chord<'a>(
    cache: &'a mut HashMap<String, Chord>,
    text: &str,
) -> Result<&'a Chord, DispatchError> {
    match cache.entry(text.to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let chord = parse_combo(text).map_err(|e| DispatchError::InjectionFailed {
                combo: text.to_string(),
                reason: e.to_string(),
            })?;
            Ok(entry.insert(chord))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl ActionRunner for Recorder {
        fn inject(&self, chord: &Chord) -> Result<(), DispatchError> {
            self.calls.borrow_mut().push(format!("inject {}", chord.to_xdotool()));
            Ok(())
        }

        fn launch(&self, command: &str) -> Result<(), DispatchError> {
            self.calls.borrow_mut().push(format!("launch {}", command));
            Ok(())
        }
    }

    fn document() -> MappingDocument {
        MappingDocument::parse(
            r#"{"device_path": "kbd", "enabled": true, "mapping": {
                "116": {"kind": "combo", "value": "Ctrl+Alt+T"},
                "117": {"kind": "command", "value": "firefox"}
            }}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_release_is_ignored() {
        let mut dispatcher = Dispatcher::new(Recorder::default());
        let event = KeyEvent::released(KeyCode(116), SystemTime::now());
        assert_eq!(
            dispatcher.dispatch(&event, &document()),
            Ok(DispatchOutcome::Ignored)
        );
        assert!(dispatcher.runner().calls.borrow().is_empty());
    }

    #[test]
    fn test_debounce_window() {
        let mut dispatcher =
            Dispatcher::new(Recorder::default()).with_debounce(Duration::from_millis(50));
        let doc = document();
        let t0 = SystemTime::now();

        let first = KeyEvent::pressed(KeyCode(117), t0);
        let bounce = KeyEvent::pressed(KeyCode(117), t0 + Duration::from_millis(10));
        let later = KeyEvent::pressed(KeyCode(117), t0 + Duration::from_millis(80));

        assert_eq!(dispatcher.dispatch(&first, &doc), Ok(DispatchOutcome::Launched));
        assert_eq!(dispatcher.dispatch(&bounce, &doc), Ok(DispatchOutcome::Debounced));
        assert_eq!(dispatcher.dispatch(&later, &doc), Ok(DispatchOutcome::Launched));
        assert_eq!(dispatcher.runner().calls.borrow().len(), 2);
    }

    #[test]
    fn test_debounce_is_per_key() {
        let mut dispatcher =
            Dispatcher::new(Recorder::default()).with_debounce(Duration::from_millis(50));
        let doc = document();
        let t0 = SystemTime::now();

        dispatcher.dispatch(&KeyEvent::pressed(KeyCode(116), t0), &doc).unwrap();
        let other = KeyEvent::pressed(KeyCode(117), t0 + Duration::from_millis(1));
        assert_eq!(dispatcher.dispatch(&other, &doc), Ok(DispatchOutcome::Launched));
    }

    #[test]
    fn test_combo_parsed_once() {
        let mut dispatcher = Dispatcher::new(Recorder::default());
        let doc = document();
        for _ in 0..3 {
            dispatcher
                .dispatch(&KeyEvent::pressed(KeyCode(116), SystemTime::now()), &doc)
                .unwrap();
        }
        assert_eq!(dispatcher.chords.len(), 1);
        assert_eq!(dispatcher.runner().calls.borrow().len(), 3);
    }

    #[test]
    fn test_hand_built_bad_combo_is_injection_failed() {
        let mut doc = MappingDocument::suggested("kbd");
        doc.mapping
            .insert(KeyCode(99), ActionSpec::Combo("Ctrl+A+B".to_string()));
        let mut dispatcher = Dispatcher::new(Recorder::default());

        let result = dispatcher.dispatch(&KeyEvent::pressed(KeyCode(99), SystemTime::now()), &doc);
        assert!(matches!(result, Err(DispatchError::InjectionFailed { .. })));
        assert!(dispatcher.runner().calls.borrow().is_empty());
        assert!(dispatcher.chords.is_empty());
    }

    #[test]
    fn test_fire_ignores_disabled_document() {
        let mut dispatcher = Dispatcher::new(Recorder::default());
        let mut doc = document();
        doc.enabled = false;

        assert_eq!(
            dispatcher.test_fire(KeyCode(117), &doc),
            Ok(DispatchOutcome::Launched)
        );
        assert_eq!(dispatcher.test_fire(KeyCode(200), &doc), Ok(DispatchOutcome::Unmapped));
        assert_eq!(*dispatcher.runner().calls.borrow(), vec!["launch firefox".to_string()]);
    }

    #[test]
    fn test_outcome_invoked() {
        assert!(DispatchOutcome::Injected.invoked());
        assert!(DispatchOutcome::Launched.invoked());
        assert!(!DispatchOutcome::Unmapped.invoked());
        assert!(!DispatchOutcome::Suppressed.invoked());
    }
}
