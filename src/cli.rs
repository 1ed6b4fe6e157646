//! Command-line argument parsing
//!
//! Supports:
//! - Running the daemon (the default)
//! - Validating and displaying the mapping document
//! - Listing input devices and capturing key codes while setting up
//! - Test-firing one mapped key

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::daemon::{Backoff, DaemonOptions, DEFAULT_INITIAL_BACKOFF};

/// Map mini keypad keys to key combos and shell commands
#[derive(Parser, Debug)]
#[command(name = "keypad-mapper", version, about = "Map mini keypad keys to combos and commands")]
pub struct CliArgs {
    /// Mapping document (default: $KEYPAD_MAPPER_CONFIG, then ~/.keymap.json)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Listen on the keypad and run mapped actions (default)
    Run(RunArgs),
    /// Validate the mapping document
    Check,
    /// Print the mapping table
    Show,
    /// List input devices with their aliases and key capabilities
    ListDevices,
    /// Print key codes as keys are pressed, without running actions
    Capture {
        /// Device alias to listen on instead of the configured one
        #[arg(short, long, value_name = "ALIAS")]
        device: Option<String>,
    },
    /// Run the action mapped to one key code, even when the mapping is disabled
    Trigger {
        /// Key code, e.g. 79 for KEY_KP1
        code: u16,
    },
    /// Write a starter mapping document for an 8-key keypad
    Init {
        /// Device alias to record in the document
        #[arg(short, long, value_name = "ALIAS")]
        device: Option<String>,
        /// Overwrite an existing document
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    /// How often a blocked read checks for shutdown, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 100)]
    pub poll_ms: u64,

    /// Ignore presses of the same key closer together than this (0 = off)
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub debounce_ms: u64,

    /// Longest wait between attempts to reopen a missing device (at least the poll interval)
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    pub max_backoff_ms: u64,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            poll_ms: 100,
            debounce_ms: 0,
            max_backoff_ms: 10_000,
        }
    }
}

impl RunArgs {
    pub fn daemon_options(&self, config_path: PathBuf) -> DaemonOptions {
        let mut options = DaemonOptions::new(config_path);
        options.poll_interval = Duration::from_millis(self.poll_ms.max(1));
        options.debounce = Duration::from_millis(self.debounce_ms);
        // A zero cap would retry a missing device in a tight loop
        let max_backoff = Duration::from_millis(self.max_backoff_ms).max(options.poll_interval);
        options.backoff = Backoff::new(DEFAULT_INITIAL_BACKOFF, max_backoff);
        options
    }
}

impl CliArgs {
    /// The subcommand to run, `run` with defaults when none was given
    pub fn command(&self) -> CliCommand {
        self.command
            .clone()
            .unwrap_or_else(|| CliCommand::Run(RunArgs::default()))
    }

    /// Resolve the mapping document location
    pub fn config_path(&self) -> Result<PathBuf, String> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => crate::config_paths::mapping_file()
                .ok_or_else(|| "No home directory; pass --config".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_no_args_runs_daemon() {
        let args = parse(&["keypad-mapper"]);
        assert_eq!(args.command(), CliCommand::Run(RunArgs::default()));
    }

    #[test]
    fn test_run_defaults_match_clap_defaults() {
        let args = parse(&["keypad-mapper", "run"]);
        assert_eq!(args.command(), CliCommand::Run(RunArgs::default()));
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let args = parse(&["keypad-mapper", "show", "--config", "/tmp/keys.json"]);
        assert_eq!(args.command(), CliCommand::Show);
        assert_eq!(args.config_path().unwrap(), PathBuf::from("/tmp/keys.json"));
    }

    #[test]
    fn test_trigger_code() {
        let args = parse(&["keypad-mapper", "trigger", "79"]);
        assert_eq!(args.command(), CliCommand::Trigger { code: 79 });
    }

    #[test]
    fn test_trigger_rejects_negative_code() {
        assert!(CliArgs::try_parse_from(["keypad-mapper", "trigger", "-3"]).is_err());
    }

    #[test]
    fn test_init_flags() {
        let args = parse(&["keypad-mapper", "init", "--device", "usb-kbd", "--force"]);
        assert_eq!(
            args.command(),
            CliCommand::Init {
                device: Some("usb-kbd".to_string()),
                force: true
            }
        );
    }

    #[test]
    fn test_run_options_conversion() {
        let args = parse(&[
            "keypad-mapper",
            "run",
            "--poll-ms",
            "0",
            "--debounce-ms",
            "40",
            "--max-backoff-ms",
            "2000",
        ]);
        let CliCommand::Run(run) = args.command() else {
            panic!("Expected run command");
        };
        let options = run.daemon_options(PathBuf::from("keys.json"));
        // Zero would spin; clamp to the smallest useful tick
        assert_eq!(options.poll_interval, Duration::from_millis(1));
        assert_eq!(options.debounce, Duration::from_millis(40));
        assert_eq!(options.config_path, PathBuf::from("keys.json"));
    }

    #[test]
    fn test_zero_max_backoff_still_waits() {
        let args = parse(&["keypad-mapper", "run", "--max-backoff-ms", "0"]);
        let CliCommand::Run(run) = args.command() else {
            panic!("Expected run command");
        };
        let mut options = run.daemon_options(PathBuf::from("keys.json"));

        let first = options.backoff.next_delay();
        assert_eq!(first, options.poll_interval);
        assert!(!first.is_zero());
        assert!(!options.backoff.next_delay().is_zero());
    }

    #[test]
    fn test_max_backoff_caps_delay() {
        let args = parse(&["keypad-mapper", "run", "--max-backoff-ms", "2000"]);
        let CliCommand::Run(run) = args.command() else {
            panic!("Expected run command");
        };
        let mut backoff = run.daemon_options(PathBuf::from("keys.json")).backoff;

        let delays: Vec<Duration> = (0..4).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], DEFAULT_INITIAL_BACKOFF);
        assert_eq!(delays[3], Duration::from_millis(2000));
    }
}
