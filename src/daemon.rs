//! The background listener: resolve → decode → dispatch, with recovery
//!
//! # States
//!
//! ```text
//! Starting ──ok──▶ Running ──source lost──▶ Recovering ──resolved──▶ Running
//!    │                │                         │
//!    └─not found──────┼────────────────────────▶┘ (wait, retry)
//!                     └──stop signal──▶ Stopped
//! ```
//!
//! The configuration is read once in `Starting`. A missing device is waited
//! for; a device that cannot be used (permissions, not a keyboard, grabbed
//! elsewhere) is fatal, as is a bad configuration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{self, ConfigError};
use crate::dispatch::{ActionRunner, DispatchError, DispatchOutcome, Dispatcher};
use crate::input::{
    self, DecodeError, DeviceHandle, EventSource, KeyDecoder, KeyEvent, ResolveError,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Floor for every retry delay
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DaemonState {
    Starting,
    Running,
    Recovering,
    Stopped,
}

/// Notifications for whoever is watching the daemon (an editor, a test)
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    StateChanged(DaemonState),
    Dispatched {
        event: KeyEvent,
        result: Result<DispatchOutcome, DispatchError>,
    },
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no input device configured in {}", .0.display())]
    NoDevice(PathBuf),
    #[error(transparent)]
    Device(#[from] ResolveError),
}

/// Opens the configured device; the seam tests use to simulate unplugging
pub trait Resolve {
    type Source: EventSource;

    fn resolve(&mut self, alias: &str) -> Result<Self::Source, ResolveError>;
}

/// Resolves real evdev devices
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceResolver;

impl Resolve for DeviceResolver {
    type Source = DeviceHandle;

    fn resolve(&mut self, alias: &str) -> Result<DeviceHandle, ResolveError> {
        input::resolve(alias)
    }
}

/// Capped exponential backoff for re-resolving the device
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    /// Delays never drop below [`MIN_BACKOFF`]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(MIN_BACKOFF);
        let initial = initial.clamp(MIN_BACKOFF, max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// The delay to wait now; doubles the following one up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config_path: PathBuf,
    /// Upper bound on how long a stop request can go unnoticed
    pub poll_interval: Duration,
    pub backoff: Backoff,
    pub debounce: Duration,
}

impl DaemonOptions {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: Backoff::default(),
            debounce: Duration::ZERO,
        }
    }
}

/// Install a SIGINT/SIGTERM handler that raises the returned flag
pub fn install_stop_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(stop)
}

pub struct Daemon<Rv, Ru> {
    options: DaemonOptions,
    resolver: Rv,
    runner: Ru,
    lifecycle: Lifecycle,
}

impl<Rv: Resolve, Ru: ActionRunner> Daemon<Rv, Ru> {
    pub fn new(options: DaemonOptions, resolver: Rv, runner: Ru, stop: Arc<AtomicBool>) -> Self {
        let lifecycle = Lifecycle {
            stop,
            observer: None,
            state: DaemonState::Starting,
            tick: options.poll_interval,
        };
        Self {
            options,
            resolver,
            runner,
            lifecycle,
        }
    }

    /// Report state changes and dispatch results on `tx`
    pub fn with_observer(mut self, tx: Sender<DaemonEvent>) -> Self {
        self.lifecycle.observer = Some(tx);
        self
    }

    /// Run until stopped. Errors are startup or unrecoverable device failures.
    pub fn run(self) -> Result<(), DaemonError> {
        let Daemon {
            options,
            mut resolver,
            runner,
            mut lifecycle,
        } = self;
        lifecycle.notify(DaemonEvent::StateChanged(DaemonState::Starting));

        let document = config::load(&options.config_path)?;
        let alias = document.device_path.trim().to_string();
        if alias.is_empty() {
            return Err(DaemonError::NoDevice(options.config_path));
        }
        if !document.enabled {
            tracing::warn!("Mapping is disabled; key presses will be ignored");
        }
        tracing::info!("Listening for device {}, enabled={}", alias, document.enabled);

        let mut dispatcher = Dispatcher::new(runner).with_debounce(options.debounce);
        let mut backoff = options.backoff;
        let mut decoder: Option<KeyDecoder<Rv::Source>> = None;

        while !lifecycle.stop_requested() {
            if decoder.is_none() {
                match resolver.resolve(&alias) {
                    Ok(source) => {
                        backoff.reset();
                        decoder = Some(KeyDecoder::new(source));
                        lifecycle.transition(DaemonState::Running);
                    }
                    Err(e) if e.is_retryable() => {
                        let delay = backoff.next_delay();
                        tracing::warn!("{}; retrying in {:?}", e, delay);
                        lifecycle.transition(DaemonState::Recovering);
                        lifecycle.sleep(delay);
                    }
                    Err(e) => return Err(e.into()),
                }
                continue;
            }
            let Some(active) = decoder.as_mut() else {
                continue;
            };

            match active.next_event(options.poll_interval) {
                Ok(Some(event)) => {
                    let result = dispatcher.dispatch(&event, &document);
                    log_dispatch(&event, &result);
                    lifecycle.notify(DaemonEvent::Dispatched { event, result });
                }
                Ok(None) => {}
                Err(DecodeError::SourceLost(reason)) => {
                    tracing::warn!("Input source lost ({}); releasing device", reason);
                    decoder = None;
                    lifecycle.transition(DaemonState::Recovering);
                }
            }
        }

        drop(decoder);
        lifecycle.transition(DaemonState::Stopped);
        tracing::info!("Daemon stopped");
        Ok(())
    }
}

/// Stop flag, current state and observer of one daemon run
struct Lifecycle {
    stop: Arc<AtomicBool>,
    observer: Option<Sender<DaemonEvent>>,
    state: DaemonState,
    tick: Duration,
}

impl Lifecycle {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleep for `total`, waking early on a stop request
    fn sleep(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(self.tick));
        }
    }

    fn transition(&mut self, next: DaemonState) {
        if self.state == next {
            return;
        }
        tracing::debug!("Daemon state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.notify(DaemonEvent::StateChanged(next));
    }

    fn notify(&self, event: DaemonEvent) {
        if let Some(tx) = &self.observer {
            // A departed observer is not the daemon's problem
            let _ = tx.send(event);
        }
    }
}

fn log_dispatch(event: &KeyEvent, result: &Result<DispatchOutcome, DispatchError>) {
    match result {
        Ok(DispatchOutcome::Unmapped) => {
            tracing::debug!(code = event.code.0, "Unmapped key")
        }
        Ok(outcome) => tracing::trace!(code = event.code.0, ?outcome, "Dispatched"),
        Err(e) => tracing::error!(code = event.code.0, "{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(3));
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 3000, 3000]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), DEFAULT_INITIAL_BACKOFF);
    }

    #[test]
    fn test_backoff_initial_clamped_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_zero_durations_floored() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(backoff.next_delay(), MIN_BACKOFF);
        assert_eq!(backoff.next_delay(), MIN_BACKOFF);
    }

    #[test]
    fn test_options_defaults() {
        let options = DaemonOptions::new("/tmp/keymap.json");
        assert_eq!(options.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(options.debounce.is_zero());
    }
}
