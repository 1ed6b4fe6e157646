//! Shared test helpers for integration tests
//!
//! Note: Functions may appear unused because each test file compiles separately.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use keypad_mapper::combo::Chord;
use keypad_mapper::daemon::{DaemonEvent, Resolve};
use keypad_mapper::dispatch::{ActionRunner, DispatchError};
use keypad_mapper::input::{RawEvent, ReplayEnd, ReplaySource, ResolveError};
use tempfile::TempDir;

/// The scenario document: 116 → combo, 117 → command
pub const SCENARIO_JSON: &str = r#"{
    "device_path": "kbd-alias",
    "enabled": true,
    "mapping": {
        "116": {"kind": "combo", "value": "Ctrl+Alt+T"},
        "117": {"kind": "command", "value": "firefox"}
    }
}"#;

/// Write `json` to a fresh temp dir, returning the dir guard and file path
pub fn write_config(json: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("keymap.json");
    std::fs::write(&path, json).expect("Failed to write config");
    (dir, path)
}

/// What a recording runner was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Inject(String),
    Launch(String),
}

/// Records actions instead of running them; optionally fails every call
#[derive(Clone, Default)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<Invocation>>>,
    fail: bool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

impl ActionRunner for RecordingRunner {
    fn inject(&self, chord: &Chord) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push(Invocation::Inject(chord.to_xdotool()));
        if self.fail {
            return Err(DispatchError::InjectionFailed {
                combo: chord.to_string(),
                reason: "test failure".into(),
            });
        }
        Ok(())
    }

    fn launch(&self, command: &str) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push(Invocation::Launch(command.to_string()));
        if self.fail {
            return Err(DispatchError::LaunchFailed {
                command: command.to_string(),
                reason: "test failure".into(),
            });
        }
        Ok(())
    }
}

/// Hands out scripted resolve results in order, then reports NotFound forever
pub struct ScriptedResolver {
    script: VecDeque<Result<ReplaySource, ResolveError>>,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedResolver {
    pub fn new(script: Vec<Result<ReplaySource, ResolveError>>) -> Self {
        Self {
            script: script.into(),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of resolve calls, readable after the daemon consumed the resolver
    pub fn attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }
}

impl Resolve for ScriptedResolver {
    type Source = ReplaySource;

    fn resolve(&mut self, alias: &str) -> Result<ReplaySource, ResolveError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.script.pop_front().unwrap_or_else(|| {
            Err(ResolveError::NotFound {
                alias: alias.to_string(),
            })
        })
    }
}

pub fn not_found() -> Result<ReplaySource, ResolveError> {
    Err(ResolveError::NotFound {
        alias: "kbd-alias".into(),
    })
}

/// A full key tap as the kernel reports it: down, sync, up, sync
pub fn tap(code: u16) -> Vec<RawEvent> {
    vec![
        RawEvent::key(code, 1),
        RawEvent::sync(),
        RawEvent::key(code, 0),
        RawEvent::sync(),
    ]
}

/// A source that delivers each tap as one batch, then ends as `end` says
pub fn tapping(codes: &[u16], end: ReplayEnd) -> ReplaySource {
    ReplaySource::new(codes.iter().map(|c| Ok(tap(*c))).collect(), end)
}

/// Collect daemon events until `done` matches one, or panic after `timeout`
pub fn collect_until(
    rx: &Receiver<DaemonEvent>,
    timeout: Duration,
    done: impl Fn(&DaemonEvent) -> bool,
) -> Vec<DaemonEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = rx
            .recv_timeout(remaining)
            .unwrap_or_else(|e| panic!("No matching daemon event ({e}); saw {seen:?}"));
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

/// Whether `event` is a dispatch of a press of `code`
pub fn is_press_of(event: &DaemonEvent, code: u16) -> bool {
    matches!(
        event,
        DaemonEvent::Dispatched { event, .. } if event.code.0 == code && event.is_pressed()
    )
}
