use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use keypad_mapper::cli::{CliArgs, CliCommand, RunArgs};
use keypad_mapper::config::{self, ConfigError, MappingDocument};
use keypad_mapper::daemon::{
    install_stop_handler, Daemon, DaemonError, DeviceResolver, DEFAULT_POLL_INTERVAL,
};
use keypad_mapper::dispatch::{Dispatcher, SystemRunner};
use keypad_mapper::input::{self, key_name, KeyCode, KeyDecoder, KeyPhase, ResolveError};

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let command = args.command();

    let default_level = match command {
        CliCommand::Run(_) => "info",
        _ => "warn",
    };
    keypad_mapper::tracing::init(default_level);

    let config_path = args.config_path().map_err(|e| anyhow!(e))?;

    match command {
        CliCommand::Run(run) => run_daemon(config_path, &run),
        CliCommand::Check => check(&config_path),
        CliCommand::Show => show(&config_path),
        CliCommand::ListDevices => list_devices(),
        CliCommand::Capture { device } => capture(&config_path, device),
        CliCommand::Trigger { code } => trigger(&config_path, KeyCode(code)),
        CliCommand::Init { device, force } => init(&config_path, device, force),
    }
}

fn run_daemon(config_path: PathBuf, run: &RunArgs) -> Result<()> {
    let stop = install_stop_handler().context("Failed to install signal handler")?;
    let options = run.daemon_options(config_path);

    Daemon::new(options, DeviceResolver, SystemRunner::new(), stop)
        .run()
        .map_err(explain_daemon_error)
}

/// Attach operator hints to the failures that have a known fix
fn explain_daemon_error(e: DaemonError) -> anyhow::Error {
    let hint = match &e {
        DaemonError::Config(ConfigError::NotFound(_)) => {
            Some("create one with `keypad-mapper init --device <alias>` or the editor")
        }
        DaemonError::NoDevice(_) => {
            Some("set \"device_path\" to an alias from `keypad-mapper list-devices`")
        }
        DaemonError::Device(ResolveError::PermissionDenied { .. }) => Some(
            "add your user to the 'input' group (sudo usermod -aG input $USER) and log in again",
        ),
        DaemonError::Device(ResolveError::NotAKeyboard { .. }) => {
            Some("pick the keypad's *-event-kbd alias from `keypad-mapper list-devices`")
        }
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(e).context(format!("Daemon failed to start ({})", hint)),
        None => anyhow::Error::new(e).context("Daemon failed"),
    }
}

fn check(config_path: &Path) -> Result<()> {
    let doc = load(config_path)?;
    println!(
        "{}: OK ({} entries, enabled={})",
        config_path.display(),
        doc.mapping.len(),
        doc.enabled
    );

    let alias = doc.device_path.trim();
    if alias.is_empty() {
        bail!("No device_path configured");
    }
    match input::locate(alias) {
        Some(path) => println!("Device {} present at {}", alias, path.display()),
        None => println!("Device {} not present (the daemon will wait for it)", alias),
    }
    Ok(())
}

fn show(config_path: &Path) -> Result<()> {
    let doc = load(config_path)?;
    println!("Device:  {}", doc.device_path);
    println!("Enabled: {}", doc.enabled);

    if doc.is_empty() {
        println!("(no mappings)");
        return Ok(());
    }
    println!();
    println!("{:>5}  {:<16} {:<8} VALUE", "CODE", "KEY", "KIND");
    for (code, action) in &doc.mapping {
        println!(
            "{:>5}  {:<16} {:<8} {}",
            code,
            key_name(code.0),
            action.kind(),
            action.value()
        );
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = input::list_devices().context("Failed to enumerate /dev/input")?;
    if devices.is_empty() {
        println!("No input devices found. Are you inside a container/VM without access?");
        return Ok(());
    }

    for dev in devices {
        println!("{}", dev.path.display());
        if let Some(err) = &dev.error {
            println!("  <{}>", err);
            println!("  perms: {}", dev.permissions);
            println!();
            continue;
        }
        println!("  name: {}", dev.name.as_deref().unwrap_or("?"));
        println!("  phys: {}", dev.phys.as_deref().unwrap_or(""));
        println!("  uniq: {}", dev.uniq.as_deref().unwrap_or(""));
        println!("  perms: {}", dev.permissions);
        println!("  has EV_KEY: {}", dev.has_keys);
        if dev.has_keys {
            let preview: Vec<String> = dev.key_preview.iter().map(u16::to_string).collect();
            println!("  keys preview: {}", preview.join(", "));
        }
        for alias in &dev.aliases {
            println!("  alias: {}", alias.display());
        }
        println!();
    }
    Ok(())
}

fn capture(config_path: &Path, device: Option<String>) -> Result<()> {
    let alias = match device {
        Some(alias) => alias,
        None => load(config_path)
            .context("No --device given")?
            .device_path,
    };
    if alias.trim().is_empty() {
        bail!("No device to capture from; pass --device <alias>");
    }

    let stop = install_stop_handler().context("Failed to install signal handler")?;
    let handle = input::resolve(&alias).with_context(|| format!("Cannot open {}", alias))?;
    println!(
        "Listening on {} ({}). Press keys, Ctrl+C to stop.",
        handle.name(),
        handle.path().display()
    );

    let mut decoder = KeyDecoder::new(handle);
    while !stop.load(Ordering::SeqCst) {
        if let Some(event) = decoder.next_event(DEFAULT_POLL_INTERVAL)? {
            let phase = match event.phase {
                KeyPhase::Pressed => "pressed",
                KeyPhase::Released => "released",
            };
            println!("{:<9} {:>5}  {}", phase, event.code, key_name(event.code.0));
        }
    }
    Ok(())
}

fn trigger(config_path: &Path, code: KeyCode) -> Result<()> {
    let doc = load(config_path)?;
    if !doc.enabled {
        println!("Mapping is disabled; firing anyway");
    }
    let mut dispatcher = Dispatcher::new(SystemRunner::new());

    let outcome = dispatcher
        .test_fire(code, &doc)
        .with_context(|| format!("Key {} failed", code))?;
    println!("{} ({}): {:?}", code, key_name(code.0), outcome);
    Ok(())
}

fn init(config_path: &Path, device: Option<String>, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite",
            config_path.display()
        );
    }
    let doc = MappingDocument::suggested(device.unwrap_or_default());
    doc.save(config_path)?;
    println!("Wrote {} ({} entries)", config_path.display(), doc.mapping.len());
    if doc.device_path.is_empty() {
        println!(
            "Set \"device_path\" before starting the daemon (see `keypad-mapper list-devices`)."
        );
    }
    Ok(())
}

fn load(config_path: &Path) -> Result<MappingDocument> {
    config::load(config_path).with_context(|| format!("Cannot load {}", config_path.display()))
}
