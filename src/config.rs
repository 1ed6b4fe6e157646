//! Mapping document persistence
//!
//! The document is the JSON file the editor writes (`~/.keymap.json` by default):
//!
//! ```json
//! {
//!   "device_path": "usb-1a2c_USB_Keyboard-event-kbd",
//!   "enabled": true,
//!   "mapping": {
//!     "79": { "kind": "combo", "value": "Ctrl+Alt+T" },
//!     "80": { "kind": "command", "value": "firefox" }
//!   }
//! }
//! ```
//!
//! Loading is all-or-nothing: one bad entry rejects the whole document.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::combo::parse_combo;
use crate::input::KeyCode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid mapping entry {key:?}: {reason}")]
    InvalidEntry { key: String, reason: String },
}

/// What a key does when pressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ActionSpec {
    /// A chord such as "Ctrl+Alt+T", injected into the focused window
    Combo(String),
    /// A shell command line, launched detached
    Command(String),
}

impl ActionSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionSpec::Combo(_) => "combo",
            ActionSpec::Command(_) => "command",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ActionSpec::Combo(v) | ActionSpec::Command(v) => v,
        }
    }

    /// Build from the persisted `kind`/`value` pair, validating the value
    fn from_raw(key: &str, kind: &str, value: String) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEntry {
            key: key.to_string(),
            reason,
        };

        if value.trim().is_empty() {
            return Err(invalid(format!("empty {} value", kind)));
        }
        match kind {
            "combo" => {
                parse_combo(&value).map_err(|e| invalid(e.to_string()))?;
                Ok(ActionSpec::Combo(value))
            }
            "command" => Ok(ActionSpec::Command(value)),
            other => Err(invalid(format!("unrecognized action kind {:?}", other))),
        }
    }
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.value())
    }
}

/// The persisted key → action mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingDocument {
    /// Alias of the input device to listen on
    pub device_path: String,
    /// When false the mapping is loaded but never dispatched
    pub enabled: bool,
    #[serde(serialize_with = "serialize_mapping")]
    pub mapping: BTreeMap<KeyCode, ActionSpec>,
}

/// The empty, disabled document a caller may use when no file exists
impl Default for MappingDocument {
    fn default() -> Self {
        Self {
            device_path: String::new(),
            enabled: false,
            mapping: BTreeMap::new(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    device_path: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    mapping: RawMapping,
}

#[derive(Deserialize)]
struct RawAction {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    value: String,
}

/// Mapping entries in file order, duplicates kept so they can be reported
#[derive(Default)]
struct RawMapping(Vec<(String, RawAction)>);

impl<'de> Deserialize<'de> for RawMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawMapping;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of key code → action")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, RawAction>()? {
                    entries.push(entry);
                }
                Ok(RawMapping(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

fn serialize_mapping<S: Serializer>(
    mapping: &BTreeMap<KeyCode, ActionSpec>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(mapping.iter().map(|(code, action)| (code.to_string(), action)))
}

impl MappingDocument {
    /// Parse and validate a document
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument = serde_json::from_str(json)?;

        let mut mapping = BTreeMap::new();
        for (key, action) in raw.mapping.0 {
            let code: KeyCode = key.parse().map_err(|_| ConfigError::InvalidEntry {
                key: key.clone(),
                reason: "key must be a non-negative integer key code".to_string(),
            })?;
            let spec = ActionSpec::from_raw(&key, &action.kind, action.value)?;
            if mapping.insert(code, spec).is_some() {
                return Err(ConfigError::InvalidEntry {
                    key,
                    reason: format!("duplicate key code {}", code),
                });
            }
        }

        Ok(Self {
            device_path: raw.device_path,
            enabled: raw.enabled,
            mapping,
        })
    }

    /// Serialize as pretty JSON, entries in key code order
    pub fn to_json(&self) -> String {
        // Serializing strings and maps with string keys cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn lookup(&self, code: KeyCode) -> Option<&ActionSpec> {
        self.mapping.get(&code)
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// The starter layout for an 8-key keypad (KP1..KP8)
    pub fn suggested(device_path: impl Into<String>) -> Self {
        const SUGGESTED: [(u16, &str); 8] = [
            (79, "Ctrl+Alt+T"), // KEY_KP1
            (80, "Super+A"),    // KEY_KP2
            (81, "Super"),      // KEY_KP3
            (75, "Super+E"),    // KEY_KP4
            (76, "Super+Tab"),  // KEY_KP5
            (77, "Alt+Tab"),    // KEY_KP6
            (71, "Super+L"),    // KEY_KP7
            (72, "Super+H"),    // KEY_KP8
        ];

        Self {
            device_path: device_path.into(),
            enabled: true,
            mapping: SUGGESTED
                .iter()
                .map(|(code, combo)| (KeyCode(*code), ActionSpec::Combo(combo.to_string())))
                .collect(),
        }
    }

    /// Write the document, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.to_json() + "\n").map_err(io_err)?;

        tracing::info!("Saved mapping to {}", path.display());
        Ok(())
    }
}

/// Load and validate the document at `path`
pub fn load(path: &Path) -> Result<MappingDocument, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let document = MappingDocument::parse(&content)?;
    tracing::info!(
        "Loaded mapping from {} ({} entries, enabled={})",
        path.display(),
        document.mapping.len(),
        document.enabled
    );
    Ok(document)
}
