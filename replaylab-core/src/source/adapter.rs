//! Buffered, named wrapper around one feed.

use super::{BatchFeed, FeedMode, Pull, SourceError};
use crate::domain::Timestamped;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// Lifecycle of an adapter inside the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterState {
    Live,
    /// The feed reported end-of-stream.
    Exhausted,
    /// A pull failed; the adapter contributes nothing further.
    Faulted(String),
}

/// One named source: a feed plus the unconsumed rows of its current batch.
pub struct SourceAdapter<R> {
    name: String,
    mode: FeedMode,
    feed: Box<dyn BatchFeed<R>>,
    buffer: VecDeque<R>,
    /// Rows consumed (emitted or dropped) from the current batch.
    cursor: usize,
    state: AdapterState,
    pulls: u64,
    stale_dropped: u64,
}

impl<R: Timestamped> SourceAdapter<R> {
    pub fn new(name: impl Into<String>, feed: impl BatchFeed<R> + 'static) -> Self {
        Self {
            name: name.into(),
            mode: feed.mode(),
            feed: Box::new(feed),
            buffer: VecDeque::new(),
            cursor: 0,
            state: AdapterState::Live,
            pulls: 0,
            stale_dropped: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> FeedMode {
        self.mode
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    pub fn is_retired(&self) -> bool {
        self.state != AdapterState::Live
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of `pull()` calls made on the underlying feed.
    pub fn pulls(&self) -> u64 {
        self.pulls
    }

    /// Rows discarded because they were not newer than the emitted frontier.
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Timestamp of the earliest buffered row, without pulling.
    pub fn front_timestamp(&self) -> Option<DateTime<Utc>> {
        self.buffer.front().map(Timestamped::timestamp)
    }

    /// Timestamp of the earliest not-yet-emitted row newer than `floor`.
    ///
    /// When the buffer is empty this pulls exactly once. Returns `Ok(None)` if
    /// the fresh batch held nothing usable or the feed ended, and `Err` if the
    /// pull faulted; in both terminal cases the adapter is retired.
    pub fn peek_min_timestamp(
        &mut self,
        floor: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>, SourceError> {
        if self.is_retired() {
            return Ok(None);
        }
        if self.buffer.is_empty() {
            self.pull_batch()?;
        }
        self.drop_stale(floor);
        Ok(self.front_timestamp())
    }

    /// Remove and return the contiguous run of rows stamped exactly `timestamp`.
    pub fn take_run(&mut self, timestamp: DateTime<Utc>) -> Vec<R> {
        let mut run = Vec::new();
        while self
            .buffer
            .front()
            .is_some_and(|row| row.timestamp() == timestamp)
        {
            if let Some(row) = self.buffer.pop_front() {
                run.push(row);
            }
        }
        self.cursor += run.len();
        run
    }

    fn pull_batch(&mut self) -> Result<(), SourceError> {
        self.pulls += 1;
        match self.feed.pull() {
            Ok(Pull::Batch(batch)) => {
                self.buffer = batch.into();
                self.cursor = 0;
                Ok(())
            }
            Ok(Pull::EndOfStream) => {
                self.state = AdapterState::Exhausted;
                Ok(())
            }
            Err(e) => {
                self.state = AdapterState::Faulted(e.to_string());
                Err(e)
            }
        }
    }

    fn drop_stale(&mut self, floor: Option<DateTime<Utc>>) {
        let Some(floor) = floor else { return };
        let mut dropped = 0;
        while self
            .buffer
            .front()
            .is_some_and(|row| row.timestamp() <= floor)
        {
            self.buffer.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            debug!(source = %self.name, dropped, %floor, "dropped stale rows");
            self.cursor += dropped;
            self.stale_dropped += dropped as u64;
        }
    }
}

impl<R> std::fmt::Debug for SourceAdapter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAdapter")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("buffered", &self.buffer.len())
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .field("pulls", &self.pulls)
            .finish()
    }
}
