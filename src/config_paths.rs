//! Centralized paths for keypad-mapper
//!
//! The mapping document lives at `~/.keymap.json`, the file the editor writes.
//! Logs live under:
//! - `$XDG_CONFIG_HOME/keypad-mapper/logs/` if XDG_CONFIG_HOME is set
//! - `~/.config/keypad-mapper/logs/` otherwise
//!
//! This module is the single source of truth for filesystem locations.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

const APP_DIR: &str = "keypad-mapper";

/// File name of the mapping document inside the home directory
pub const MAPPING_FILE_NAME: &str = ".keymap.json";

/// Environment variable that overrides the mapping document location
pub const CONFIG_ENV: &str = "KEYPAD_MAPPER_CONFIG";

/// Base config directory for keypad-mapper
pub fn config_dir() -> Option<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|config| config.join(APP_DIR))
}

/// Mapping document path: `$KEYPAD_MAPPER_CONFIG`, else `~/.keymap.json`
pub fn mapping_file() -> Option<PathBuf> {
    env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(MAPPING_FILE_NAME)))
}

/// `~/.config/keypad-mapper/logs/`
pub fn logs_dir() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("logs"))
}

fn ensure_dir(path: &Path) -> Result<(), String> {
    fs::create_dir_all(path)
        .map_err(|e| format!("Failed to create directory {}: {}", path.display(), e))
}

/// Ensure logs dir exists, returning it
pub fn ensure_logs_dir() -> Result<PathBuf, String> {
    let logs = logs_dir().ok_or_else(|| "No config directory available".to_string())?;
    ensure_dir(&logs)?;
    Ok(logs)
}
