use super::HistoryQuery;
use crate::domain::{Batch, MarketRecord, Timestamped};
use crate::source::{minibatches, BatchFeed, FeedMode, Pull, SourceError};
use std::collections::VecDeque;
use std::sync::Arc;

/// A backend that answers history queries: a vendor connection, a cache, or
/// preloaded data.
pub trait HistoryProvider: Send + Sync {
    /// Records for one query. Order follows the query's `ascend` flag.
    fn request(&self, query: &HistoryQuery) -> Result<Batch<MarketRecord>, SourceError>;
}

impl<P: HistoryProvider + ?Sized> HistoryProvider for Arc<P> {
    fn request(&self, query: &HistoryQuery) -> Result<Batch<MarketRecord>, SourceError> {
        (**self).request(query)
    }
}

/// Synchronous feed issuing one query per batch, in list order.
///
/// Each result is handed out ascending, whatever the query's `ascend` flag:
/// descending results are reversed, then stable-sorted by timestamp, so rows
/// sharing a timestamp keep the order the provider stores them in. Results are
/// split into minibatches when configured.
pub struct QueryFeed<P> {
    provider: P,
    queries: VecDeque<HistoryQuery>,
    minibatch: usize,
    ready: VecDeque<Batch<MarketRecord>>,
    issued: usize,
}

impl<P: HistoryProvider> QueryFeed<P> {
    pub fn new(provider: P, queries: impl IntoIterator<Item = HistoryQuery>) -> Self {
        Self {
            provider,
            queries: queries.into_iter().collect(),
            minibatch: 0,
            ready: VecDeque::new(),
            issued: 0,
        }
    }

    /// Split each query result into chunks of about `size` rows.
    pub fn with_minibatch(mut self, size: usize) -> Self {
        self.minibatch = size;
        self
    }

    /// Queries sent to the provider so far.
    pub fn issued(&self) -> usize {
        self.issued
    }
}

impl<P: HistoryProvider> BatchFeed<MarketRecord> for QueryFeed<P> {
    fn mode(&self) -> FeedMode {
        FeedMode::Sync
    }

    fn pull(&mut self) -> Result<Pull<MarketRecord>, SourceError> {
        if let Some(batch) = self.ready.pop_front() {
            return Ok(Pull::Batch(batch));
        }
        let Some(query) = self.queries.pop_front() else {
            return Ok(Pull::EndOfStream);
        };
        self.issued += 1;
        let mut rows = self.provider.request(&query)?;
        if !query.ascend() {
            rows.reverse();
        }
        rows.sort_by_key(Timestamped::timestamp);
        tracing::debug!(ticker = query.ticker(), rows = rows.len(), "history query answered");

        self.ready.extend(minibatches(rows, self.minibatch));
        // An empty result still counts as one (empty) batch.
        Ok(Pull::Batch(self.ready.pop_front().unwrap_or_default()))
    }
}
