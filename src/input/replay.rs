//! Replays a recorded sequence of raw event batches
//!
//! Used for dry runs, benchmarks and tests where no device is attached.

use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::Duration;

use super::decoder::{EventSource, RawEvent};

/// What a replay source does once its batches are exhausted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayEnd {
    /// Report the source as unreadable, like an unplugged device
    Lost,
    /// Keep waiting out each timeout with no events, like an idle device
    Idle,
}

pub struct ReplaySource {
    batches: VecDeque<io::Result<Vec<RawEvent>>>,
    end: ReplayEnd,
}

impl ReplaySource {
    pub fn new(batches: Vec<io::Result<Vec<RawEvent>>>, end: ReplayEnd) -> Self {
        Self {
            batches: batches.into(),
            end,
        }
    }

    /// One batch per raw event
    pub fn from_events(events: impl IntoIterator<Item = RawEvent>, end: ReplayEnd) -> Self {
        Self::new(events.into_iter().map(|ev| Ok(vec![ev])).collect(), end)
    }

    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl EventSource for ReplaySource {
    fn read_events(&mut self, timeout: Duration) -> io::Result<Vec<RawEvent>> {
        if let Some(batch) = self.batches.pop_front() {
            return batch;
        }
        match self.end {
            ReplayEnd::Lost => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "replay exhausted",
            )),
            ReplayEnd::Idle => {
                thread::sleep(timeout);
                Ok(Vec::new())
            }
        }
    }
}
