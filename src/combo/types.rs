//! Core types for combos: Modifiers and Chord

use std::fmt;

/// Modifier keys as a bitfield for efficient storage and comparison
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const CTRL: Modifiers = Modifiers(0b0001);
    pub const ALT: Modifiers = Modifiers(0b0010);
    pub const SHIFT: Modifiers = Modifiers(0b0100);
    pub const SUPER: Modifiers = Modifiers(0b1000); // Meta / Win

    /// Fixed order in which modifiers are pressed and rendered
    const ORDER: [(Modifiers, &'static str, &'static str); 4] = [
        (Modifiers::CTRL, "ctrl", "Ctrl"),
        (Modifiers::ALT, "alt", "Alt"),
        (Modifiers::SHIFT, "shift", "Shift"),
        (Modifiers::SUPER, "super", "Super"),
    ];

    #[inline]
    pub const fn ctrl(self) -> bool {
        self.0 & Self::CTRL.0 != 0
    }

    #[inline]
    pub const fn alt(self) -> bool {
        self.0 & Self::ALT.0 != 0
    }

    #[inline]
    pub const fn shift(self) -> bool {
        self.0 & Self::SHIFT.0 != 0
    }

    #[inline]
    pub const fn super_key(self) -> bool {
        self.0 & Self::SUPER.0 != 0
    }

    /// Check if no modifiers are held
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Combine two modifier sets
    #[inline]
    pub const fn union(self, other: Modifiers) -> Modifiers {
        Modifiers(self.0 | other.0)
    }

    /// Check if this contains all modifiers in other
    #[inline]
    pub const fn contains(self, other: Modifiers) -> bool {
        (self.0 & other.0) == other.0
    }

    /// X11 keysym names of the held modifiers, in press order
    pub fn keysyms(self) -> impl Iterator<Item = &'static str> {
        Self::ORDER
            .into_iter()
            .filter(move |(m, _, _)| self.contains(*m))
            .map(|(_, sym, _)| sym)
    }

    fn labels(self) -> impl Iterator<Item = &'static str> {
        Self::ORDER
            .into_iter()
            .filter(move |(m, _, _)| self.contains(*m))
            .map(|(_, _, label)| label)
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.labels().collect();
        write!(f, "{}", parts.join("+"))
    }
}

/// A key chord: zero or more modifiers plus at most one key
///
/// A chord without a key taps its modifiers (e.g. "Super" opens the launcher).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Chord {
    pub mods: Modifiers,
    /// X11 keysym of the non-modifier key
    pub key: Option<String>,
}

impl Chord {
    pub fn new(mods: Modifiers, key: impl Into<String>) -> Self {
        Self {
            mods,
            key: Some(key.into()),
        }
    }

    pub fn modifiers_only(mods: Modifiers) -> Self {
        Self { mods, key: None }
    }

    /// Render as an xdotool key chord, e.g. `ctrl+alt+t`
    pub fn to_xdotool(&self) -> String {
        let mut parts: Vec<&str> = self.mods.keysyms().collect();
        if let Some(key) = &self.key {
            parts.push(key);
        }
        parts.join("+")
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.key, self.mods.is_empty()) {
            (Some(key), true) => write!(f, "{}", key),
            (Some(key), false) => write!(f, "{}+{}", self.mods, key),
            (None, _) => write!(f, "{}", self.mods),
        }
    }
}
