//! Reduces a raw evdev event stream to discrete key presses and releases

use std::collections::{HashSet, VecDeque};
use std::io;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use super::{KeyCode, KeyEvent};

/// evdev event type for synchronization markers
pub const EV_SYN: u16 = 0x00;
/// evdev event type for keys and buttons
pub const EV_KEY: u16 = 0x01;

const KEY_UP: i32 = 0;
const KEY_DOWN: i32 = 1;
const KEY_REPEAT: i32 = 2;

/// How long the blocking iterator waits per pull before trying again
const ITER_POLL: Duration = Duration::from_millis(250);

/// One undecoded input event, as read from the kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
    pub timestamp: SystemTime,
}

impl RawEvent {
    pub fn new(event_type: u16, code: u16, value: i32) -> Self {
        Self {
            event_type,
            code,
            value,
            timestamp: SystemTime::now(),
        }
    }

    pub fn key(code: u16, value: i32) -> Self {
        Self::new(EV_KEY, code, value)
    }

    pub fn sync() -> Self {
        Self::new(EV_SYN, 0, 0)
    }

    pub fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl From<evdev::InputEvent> for RawEvent {
    fn from(ev: evdev::InputEvent) -> Self {
        Self {
            event_type: ev.event_type().0,
            code: ev.code(),
            value: ev.value(),
            timestamp: ev.timestamp(),
        }
    }
}

/// A readable stream of raw input events
pub trait EventSource {
    /// Return the events that are ready, waiting at most `timeout` for some
    /// to arrive. An empty batch means nothing arrived in time; an error
    /// means the source is no longer readable.
    fn read_events(&mut self, timeout: Duration) -> io::Result<Vec<RawEvent>>;
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn read_events(&mut self, timeout: Duration) -> io::Result<Vec<RawEvent>> {
        (**self).read_events(timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("input source lost: {0}")]
    SourceLost(String),
}

/// Turns raw events into [`KeyEvent`]s
///
/// Non-key events are dropped. Auto-repeat is collapsed: a key surfaces one
/// `Pressed` when it goes down and one `Released` when it comes up, no matter
/// how many repeat or duplicate notifications the device sends in between.
///
/// The decoder owns its source. Once the source fails the decoder yields
/// [`DecodeError::SourceLost`] and is finished; build a new one for a new source.
pub struct KeyDecoder<S> {
    source: S,
    held: HashSet<KeyCode>,
    pending: VecDeque<KeyEvent>,
    finished: bool,
}

impl<S: EventSource> KeyDecoder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            held: HashSet::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Feed one raw event through the repeat filter
    pub fn feed(&mut self, raw: &RawEvent) -> Option<KeyEvent> {
        if raw.event_type != EV_KEY {
            return None;
        }
        let code = KeyCode(raw.code);
        match raw.value {
            KEY_DOWN if self.held.insert(code) => Some(KeyEvent::pressed(code, raw.timestamp)),
            KEY_UP if self.held.remove(&code) => Some(KeyEvent::released(code, raw.timestamp)),
            KEY_DOWN | KEY_UP | KEY_REPEAT => None,
            other => {
                tracing::trace!(code = raw.code, value = other, "Ignoring unknown key value");
                None
            }
        }
    }

    /// Pull the next key event, waiting at most about `timeout`
    ///
    /// `Ok(None)` means nothing worth reporting arrived; the caller can check
    /// for shutdown and call again.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, DecodeError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.finished {
            return Err(DecodeError::SourceLost("source already lost".to_string()));
        }

        match self.source.read_events(timeout) {
            Ok(batch) => {
                for raw in &batch {
                    if let Some(event) = self.feed(raw) {
                        self.pending.push_back(event);
                    }
                }
                Ok(self.pending.pop_front())
            }
            Err(e) => {
                self.finished = true;
                self.held.clear();
                Err(DecodeError::SourceLost(e.to_string()))
            }
        }
    }

    /// Whether the source has failed and no buffered events remain
    pub fn is_finished(&self) -> bool {
        self.finished && self.pending.is_empty()
    }

    /// Keys currently held down
    pub fn held(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.held.iter().copied()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

/// Blocking view of the decoder: yields key events until the source is lost
impl<S: EventSource> Iterator for KeyDecoder<S> {
    type Item = Result<KeyEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_finished() {
            return None;
        }
        loop {
            match self.next_event(ITER_POLL) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
