//! Concrete feeds: finite synchronous sequences and blocking channels.

use super::{BatchFeed, FeedMode, Pull, SourceError};
use crate::domain::Batch;

/// Finite synchronous sequence of batches.
pub struct SyncFeed<R> {
    batches: Box<dyn Iterator<Item = Result<Batch<R>, SourceError>> + Send>,
    cursor: usize,
    exhausted: bool,
}

impl<R: 'static> SyncFeed<R> {
    pub fn new<I>(batches: I) -> Self
    where
        I: IntoIterator<Item = Batch<R>>,
        I::IntoIter: Send + 'static,
    {
        Self::fallible(batches.into_iter().map(Ok))
    }

    /// A sequence whose items may fail, e.g. lazily fetched history queries.
    pub fn fallible<I>(batches: I) -> Self
    where
        I: IntoIterator<Item = Result<Batch<R>, SourceError>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            batches: Box::new(batches.into_iter()),
            cursor: 0,
            exhausted: false,
        }
    }

    /// Number of batches handed out so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl<R> BatchFeed<R> for SyncFeed<R> {
    fn mode(&self) -> FeedMode {
        FeedMode::Sync
    }

    fn pull(&mut self) -> Result<Pull<R>, SourceError> {
        if self.exhausted {
            return Ok(Pull::EndOfStream);
        }
        match self.batches.next() {
            Some(Ok(batch)) => {
                self.cursor += 1;
                Ok(Pull::Batch(batch))
            }
            Some(Err(e)) => Err(e),
            None => {
                self.exhausted = true;
                Ok(Pull::EndOfStream)
            }
        }
    }
}

/// Message on an async feed channel.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage<R> {
    Batch(Batch<R>),
    /// Explicit termination marker.
    End,
    Fault(String),
}

/// Producer half of an async feed.
///
/// Dropping the sender without calling [`FeedSender::finish`] is reported to
/// the consumer as [`SourceError::Disconnected`].
pub struct FeedSender<R> {
    tx: flume::Sender<FeedMessage<R>>,
}

impl<R> FeedSender<R> {
    /// Blocks while the channel is full. Fails once the consumer is gone.
    pub fn send(&self, batch: Batch<R>) -> Result<(), SourceError> {
        self.tx
            .send(FeedMessage::Batch(batch))
            .map_err(|_| SourceError::Disconnected)
    }

    /// Send the end-of-stream marker.
    pub fn finish(self) -> Result<(), SourceError> {
        self.tx
            .send(FeedMessage::End)
            .map_err(|_| SourceError::Disconnected)
    }

    /// Report a producer-side fault; the consumer retires the source.
    pub fn fail(self, reason: impl Into<String>) -> Result<(), SourceError> {
        self.tx
            .send(FeedMessage::Fault(reason.into()))
            .map_err(|_| SourceError::Disconnected)
    }
}

/// Consumer half of an async feed. `pull` blocks the calling thread.
pub struct AsyncFeed<R> {
    rx: flume::Receiver<FeedMessage<R>>,
    finished: bool,
}

/// Single-slot async feed: the producer blocks until each batch is pulled.
pub fn async_feed<R>() -> (FeedSender<R>, AsyncFeed<R>) {
    async_feed_with_capacity(1)
}

/// Async feed with room for `capacity` queued messages.
pub fn async_feed_with_capacity<R>(capacity: usize) -> (FeedSender<R>, AsyncFeed<R>) {
    let (tx, rx) = flume::bounded(capacity);
    (
        FeedSender { tx },
        AsyncFeed {
            rx,
            finished: false,
        },
    )
}

impl<R: Send> BatchFeed<R> for AsyncFeed<R> {
    fn mode(&self) -> FeedMode {
        FeedMode::Async
    }

    fn pull(&mut self) -> Result<Pull<R>, SourceError> {
        if self.finished {
            return Ok(Pull::EndOfStream);
        }
        match self.rx.recv() {
            Ok(FeedMessage::Batch(batch)) => Ok(Pull::Batch(batch)),
            Ok(FeedMessage::End) => {
                self.finished = true;
                Ok(Pull::EndOfStream)
            }
            Ok(FeedMessage::Fault(reason)) => Err(SourceError::Fault(reason)),
            Err(flume::RecvError::Disconnected) => Err(SourceError::Disconnected),
        }
    }
}
