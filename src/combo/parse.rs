//! Parsing of human-written combos like "Ctrl+Alt+T" into chords

use thiserror::Error;

use super::types::{Chord, Modifiers};

/// Errors that can occur when parsing a combo
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComboError {
    #[error("combo is empty")]
    Empty,
    #[error("multiple keys in combo {0:?}")]
    MultipleKeys(String),
}

/// Parse a combo string like "Ctrl+Alt+T" or "super-tab" into a Chord
///
/// Parts may be separated by `+` or `-`. Unknown key names are passed
/// through unchanged so any X11 keysym can be used.
pub fn parse_combo(combo: &str) -> Result<Chord, ComboError> {
    let mut mods = Modifiers::NONE;
    let mut key: Option<String> = None;

    let parts = combo
        .split(['+', '-'])
        .map(str::trim)
        .filter(|p| !p.is_empty());

    for part in parts {
        if let Some(m) = parse_modifier(part) {
            mods = mods | m;
            continue;
        }
        if key.is_some() {
            return Err(ComboError::MultipleKeys(combo.to_string()));
        }
        key = Some(keysym_for(part));
    }

    match key {
        Some(key) => Ok(Chord::new(mods, key)),
        None if !mods.is_empty() => Ok(Chord::modifiers_only(mods)),
        None => Err(ComboError::Empty),
    }
}

fn parse_modifier(part: &str) -> Option<Modifiers> {
    match part.to_ascii_uppercase().as_str() {
        "CTRL" | "CONTROL" => Some(Modifiers::CTRL),
        "ALT" => Some(Modifiers::ALT),
        "SHIFT" => Some(Modifiers::SHIFT),
        "SUPER" | "META" | "WIN" => Some(Modifiers::SUPER),
        _ => None,
    }
}

/// Map a key name to its X11 keysym
fn keysym_for(part: &str) -> String {
    let mut chars = part.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_alphanumeric() {
            return c.to_lowercase().to_string();
        }
    }

    let upper = part.to_ascii_uppercase();
    if let Some(n) = upper.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
        if (1..=24).contains(&n) {
            return format!("F{}", n);
        }
    }

    let named = match upper.as_str() {
        "TAB" => "Tab",
        "RETURN" | "ENTER" => "Return",
        "ESC" | "ESCAPE" => "Escape",
        "SPACE" => "space",
        "BACKSPACE" | "BKSP" => "BackSpace",
        "DELETE" | "DEL" => "Delete",
        "INSERT" | "INS" => "Insert",
        "HOME" => "Home",
        "END" => "End",
        "PAGEUP" | "PGUP" => "Prior",
        "PAGEDOWN" | "PGDN" => "Next",
        "LEFT" => "Left",
        "RIGHT" => "Right",
        "UP" => "Up",
        "DOWN" => "Down",
        "PRINTSCREEN" | "PRTSC" => "Print",
        "VOLUMEUP" => "XF86AudioRaiseVolume",
        "VOLUMEDOWN" => "XF86AudioLowerVolume",
        "MUTE" => "XF86AudioMute",
        "PLAY" => "XF86AudioPlay",
        "NEXT" => "XF86AudioNext",
        "PREV" => "XF86AudioPrev",
        _ => return part.to_string(),
    };
    named.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_key() {
        let chord = parse_combo("a").unwrap();
        assert_eq!(chord.key.as_deref(), Some("a"));
        assert!(chord.mods.is_empty());
    }

    #[test]
    fn test_parse_ctrl_alt_t() {
        let chord = parse_combo("Ctrl+Alt+T").unwrap();
        assert_eq!(chord.key.as_deref(), Some("t"));
        assert!(chord.mods.ctrl());
        assert!(chord.mods.alt());
        assert_eq!(chord.to_xdotool(), "ctrl+alt+t");
    }

    #[test]
    fn test_parse_dash_separator_and_whitespace() {
        let chord = parse_combo(" super - tab ").unwrap();
        assert_eq!(chord.to_xdotool(), "super+Tab");
    }

    #[test]
    fn test_modifier_aliases() {
        assert_eq!(parse_combo("control+x").unwrap().to_xdotool(), "ctrl+x");
        assert_eq!(parse_combo("Meta+L").unwrap().to_xdotool(), "super+l");
        assert_eq!(parse_combo("WIN+e").unwrap().to_xdotool(), "super+e");
    }

    #[test]
    fn test_modifier_only_chord() {
        let chord = parse_combo("Super").unwrap();
        assert_eq!(chord.key, None);
        assert_eq!(chord.to_xdotool(), "super");
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(parse_combo("Enter").unwrap().to_xdotool(), "Return");
        assert_eq!(parse_combo("PgDn").unwrap().to_xdotool(), "Next");
        assert_eq!(parse_combo("Shift+PrtSc").unwrap().to_xdotool(), "shift+Print");
        assert_eq!(
            parse_combo("VolumeUp").unwrap().to_xdotool(),
            "XF86AudioRaiseVolume"
        );
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(parse_combo("f5").unwrap().to_xdotool(), "F5");
        assert_eq!(parse_combo("Alt+F24").unwrap().to_xdotool(), "alt+F24");
        // Out of range passes through
        assert_eq!(parse_combo("F25").unwrap().to_xdotool(), "F25");
    }

    #[test]
    fn test_unknown_key_passes_through() {
        let chord = parse_combo("Ctrl+XF86Calculator").unwrap();
        assert_eq!(chord.to_xdotool(), "ctrl+XF86Calculator");
    }

    #[test]
    fn test_empty_combo() {
        assert_eq!(parse_combo(""), Err(ComboError::Empty));
        assert_eq!(parse_combo(" + - "), Err(ComboError::Empty));
    }

    #[test]
    fn test_multiple_keys_rejected() {
        assert!(matches!(
            parse_combo("Ctrl+A+B"),
            Err(ComboError::MultipleKeys(_))
        ));
    }
}
