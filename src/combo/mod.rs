//! Key combos for injection
//!
//! ```text
//! "Ctrl+Alt+T" → parse_combo() → Chord → to_xdotool() → "ctrl+alt+t"
//! ```

mod parse;
mod types;

pub use parse::{parse_combo, ComboError};
pub use types::{Chord, Modifiers};
