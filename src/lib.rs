//! keypad-mapper - mini keypad to action daemon
//!
//! This crate provides the dispatch engine behind the `keypad-mapper` daemon:
//! it resolves a keypad's input device, decodes its key presses, and runs the
//! key combo or shell command the user mapped to each key.

pub mod cli;
pub mod combo;
pub mod config;
pub mod config_paths;
pub mod daemon;
pub mod dispatch;
pub mod input;
pub mod tracing;

// Re-export commonly used types
pub use config::{ActionSpec, ConfigError, MappingDocument};
pub use daemon::{Daemon, DaemonEvent, DaemonOptions, DaemonState};
pub use dispatch::{ActionRunner, DispatchError, DispatchOutcome, Dispatcher, SystemRunner};
pub use input::{KeyCode, KeyEvent, KeyPhase};
