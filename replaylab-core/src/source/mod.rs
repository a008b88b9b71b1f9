//! Source adapters: a uniform pull contract over batch producers.
//!
//! A producer is either a finite synchronous sequence ([`SyncFeed`]) or a
//! blocking channel fed by another thread and terminated by an explicit
//! end-of-stream marker ([`AsyncFeed`]). [`SourceAdapter`] wraps either one,
//! buffers the current batch, and is what the merge scheduler advances.

pub mod adapter;
pub mod feed;

pub use adapter::{AdapterState, SourceAdapter};
pub use feed::{async_feed, async_feed_with_capacity, AsyncFeed, FeedMessage, FeedSender, SyncFeed};

use crate::domain::{Batch, Timestamped};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of one pull.
#[derive(Debug, Clone, PartialEq)]
pub enum Pull<R> {
    Batch(Batch<R>),
    EndOfStream,
}

/// How a feed delivers batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    /// Finite in-memory sequence. Pulls never block.
    Sync,
    /// Blocking channel fed by an external producer.
    Async,
}

/// Adapter-level faults. None of these is retried: the adapter is retired.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("source fault: {0}")]
    Fault(String),

    #[error("producer disconnected without sending end-of-stream")]
    Disconnected,

    #[error("history unavailable for '{ticker}': {reason}")]
    Unavailable { ticker: String, reason: String },
}

/// A producer of timestamped batches.
///
/// `pull` is non-reentrant: exactly one consumer drives a feed at a time.
pub trait BatchFeed<R>: Send {
    fn mode(&self) -> FeedMode;

    /// Next batch, or `EndOfStream` once the producer is done.
    fn pull(&mut self) -> Result<Pull<R>, SourceError>;
}

impl<R, F: BatchFeed<R> + ?Sized> BatchFeed<R> for Box<F> {
    fn mode(&self) -> FeedMode {
        (**self).mode()
    }

    fn pull(&mut self) -> Result<Pull<R>, SourceError> {
        (**self).pull()
    }
}

/// Split one batch into ordered chunks of roughly `size` rows.
///
/// A chunk never splits a run of equal timestamps, so a chunk may exceed
/// `size` when many rows share one timestamp. A `size` of zero yields the
/// whole batch as a single chunk.
pub fn minibatches<R: Timestamped>(batch: Batch<R>, size: usize) -> Vec<Batch<R>> {
    if size == 0 || batch.len() <= size {
        return if batch.is_empty() { Vec::new() } else { vec![batch] };
    }
    let mut chunks = Vec::with_capacity(batch.len().div_ceil(size));
    let mut current: Batch<R> = Vec::with_capacity(size);
    for row in batch {
        let boundary = current
            .last()
            .is_some_and(|prev| prev.timestamp() != row.timestamp());
        if current.len() >= size && boundary {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
        current.push(row);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
