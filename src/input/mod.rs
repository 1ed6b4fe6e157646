//! Input side of the pipeline: device resolution and key event decoding
//!
//! # Architecture
//!
//! ```text
//! alias → resolve() → DeviceHandle (EventSource) → KeyDecoder → KeyEvent
//! ```
//!
//! Anything implementing [`EventSource`] can feed the decoder, which is how
//! tests replay recorded event streams without a real device.

mod decoder;
mod device;
mod replay;

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

pub use decoder::{DecodeError, EventSource, KeyDecoder, RawEvent, EV_KEY, EV_SYN};
pub use device::{
    key_name, list_devices, locate, locate_in, resolve, DeviceHandle, DeviceInfo, ResolveError,
    ALIAS_DIRS,
};
pub use replay::{ReplayEnd, ReplaySource};

/// A key code in the Linux input-event-codes numbering (e.g. 79 = KEY_KP1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyCode(pub u16);

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error for key code strings that are not a plain non-negative integer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key code {0:?}")]
pub struct InvalidKeyCode(pub String);

impl FromStr for KeyCode {
    type Err = InvalidKeyCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // u16::from_str accepts a leading '+', which a key code never has
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidKeyCode(s.to_string()));
        }
        s.parse::<u16>()
            .map(KeyCode)
            .map_err(|_| InvalidKeyCode(s.to_string()))
    }
}

/// Whether a key went down or came back up
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyPhase {
    Pressed,
    Released,
}

/// A decoded key occurrence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub phase: KeyPhase,
    pub timestamp: SystemTime,
}

impl KeyEvent {
    pub fn pressed(code: KeyCode, timestamp: SystemTime) -> Self {
        Self {
            code,
            phase: KeyPhase::Pressed,
            timestamp,
        }
    }

    pub fn released(code: KeyCode, timestamp: SystemTime) -> Self {
        Self {
            code,
            phase: KeyPhase::Released,
            timestamp,
        }
    }

    #[inline]
    pub fn is_pressed(&self) -> bool {
        self.phase == KeyPhase::Pressed
    }
}
