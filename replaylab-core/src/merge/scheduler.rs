use super::{MergeError, MergeStats, Snapshot, SourceFault};
use crate::domain::Timestamped;
use crate::source::{AdapterState, BatchFeed, SourceAdapter};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Lazy, strictly time-ordered merge over a set of source adapters.
///
/// Each call to [`Iterator::next`] produces the snapshot at the smallest
/// timestamp any live source can still supply. The only blocking points are
/// pulls on async feeds. Once every adapter is retired the iterator ends.
///
/// The scheduler is single-use: build a new one to replay again.
pub struct MergeScheduler<R> {
    adapters: Vec<SourceAdapter<R>>,
    last_emitted: Option<DateTime<Utc>>,
    stats: MergeStats,
}

impl<R: Timestamped> MergeScheduler<R> {
    pub fn new(adapters: Vec<SourceAdapter<R>>) -> Result<Self, MergeError> {
        let mut seen = HashSet::new();
        for adapter in &adapters {
            if !seen.insert(adapter.name().to_string()) {
                return Err(MergeError::DuplicateSource(adapter.name().to_string()));
            }
        }
        Ok(Self {
            adapters,
            last_emitted: None,
            stats: MergeStats::default(),
        })
    }

    pub fn empty() -> Self {
        Self {
            adapters: Vec::new(),
            last_emitted: None,
            stats: MergeStats::default(),
        }
    }

    /// Register another source. Names must be unique.
    pub fn add_source(
        mut self,
        name: impl Into<String>,
        feed: impl BatchFeed<R> + 'static,
    ) -> Result<Self, MergeError> {
        self.push_source(SourceAdapter::new(name, feed))?;
        Ok(self)
    }

    pub fn push_source(&mut self, adapter: SourceAdapter<R>) -> Result<(), MergeError> {
        if self.adapters.iter().any(|a| a.name() == adapter.name()) {
            return Err(MergeError::DuplicateSource(adapter.name().to_string()));
        }
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.adapters.iter().map(SourceAdapter::name)
    }

    pub fn last_emitted(&self) -> Option<DateTime<Utc>> {
        self.last_emitted
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// Sources no longer contributing, with the reason they stopped.
    pub fn retired(&self) -> Vec<(&str, &AdapterState)> {
        self.adapters
            .iter()
            .filter(|a| a.is_retired())
            .map(|a| (a.name(), a.state()))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.adapters.iter().filter(|a| !a.is_retired()).count()
    }

    /// Produce the next snapshot, or `None` once every source is retired.
    pub fn next_snapshot(&mut self) -> Option<Snapshot<R>> {
        loop {
            let floor = self.last_emitted;
            let mut t_min: Option<DateTime<Utc>> = None;
            let mut waiting = false;

            for adapter in &mut self.adapters {
                if adapter.is_retired() {
                    continue;
                }
                let pulls_before = adapter.pulls();
                let dropped_before = adapter.stale_dropped();
                let peeked = adapter.peek_min_timestamp(floor);
                self.stats.pulls += adapter.pulls() - pulls_before;
                self.stats.stale_rows_dropped += adapter.stale_dropped() - dropped_before;

                match peeked {
                    Ok(Some(ts)) => {
                        t_min = Some(t_min.map_or(ts, |cur| cur.min(ts)));
                    }
                    // Empty or fully stale batch on a live source: its frontier
                    // is unknown until the next pull.
                    Ok(None) if !adapter.is_retired() => waiting = true,
                    Ok(None) => debug!(source = adapter.name(), "source exhausted"),
                    Err(e) => {
                        warn!(source = adapter.name(), error = %e, "source faulted, retiring");
                        self.stats.faults.push(SourceFault {
                            source: adapter.name().to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            if self.live_count() == 0 {
                return None;
            }
            if waiting {
                continue;
            }
            let Some(t_min) = t_min else { continue };

            let mut snapshot = Snapshot::new(t_min);
            for adapter in &mut self.adapters {
                if adapter.front_timestamp() == Some(t_min) {
                    let rows = adapter.take_run(t_min);
                    self.stats.rows_emitted += rows.len() as u64;
                    snapshot.insert(adapter.name(), rows);
                }
            }
            self.last_emitted = Some(t_min);
            self.stats.snapshots += 1;
            return Some(snapshot);
        }
    }
}

impl<R: Timestamped> Iterator for MergeScheduler<R> {
    type Item = Snapshot<R>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_snapshot()
    }
}

impl<R> std::fmt::Debug for MergeScheduler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeScheduler")
            .field("adapters", &self.adapters)
            .field("last_emitted", &self.last_emitted)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BarRecord;
    use crate::source::{async_feed, SourceError, SyncFeed};
    use chrono::TimeZone;
    use std::thread;

    fn ts(t: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(t, 0).unwrap()
    }

    fn bar(symbol: &str, t: i64) -> BarRecord {
        BarRecord {
            symbol: symbol.into(),
            timestamp: ts(t),
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            period_volume: 100.0,
            total_volume: 1_000.0,
            trade_count: 3,
        }
    }

    fn timestamps(snaps: &[Snapshot<BarRecord>]) -> Vec<i64> {
        snaps.iter().map(|s| s.timestamp.timestamp()).collect()
    }

    // ── Ordering ──

    #[test]
    fn interleaves_two_sync_sources() {
        let merged: Vec<_> = MergeScheduler::empty()
            .add_source("e1", SyncFeed::new(vec![vec![bar("A", 1), bar("A", 3), bar("A", 5)]]))
            .unwrap()
            .add_source("e2", SyncFeed::new(vec![vec![bar("B", 2), bar("B", 3), bar("B", 4)]]))
            .unwrap()
            .collect();

        assert_eq!(timestamps(&merged), vec![1, 2, 3, 4, 5]);
        assert_eq!(merged[2].sources().collect::<Vec<_>>(), vec!["e1", "e2"]);
        assert_eq!(merged[0].sources().collect::<Vec<_>>(), vec!["e1"]);
    }

    #[test]
    fn equal_timestamp_run_is_emitted_together() {
        let mut sched = MergeScheduler::empty()
            .add_source(
                "bars",
                SyncFeed::new(vec![vec![bar("A", 1), bar("B", 1), bar("A", 2)]]),
            )
            .unwrap();

        let first = sched.next().unwrap();
        assert_eq!(first.get("bars").map(<[_]>::len), Some(2));
        let second = sched.next().unwrap();
        assert_eq!(second.timestamp, ts(2));
        assert!(sched.next().is_none());
    }

    #[test]
    fn rows_across_batches_continue_in_order() {
        let merged: Vec<_> = MergeScheduler::empty()
            .add_source(
                "e1",
                SyncFeed::new(vec![vec![bar("A", 1), bar("A", 2)], vec![bar("A", 4)]]),
            )
            .unwrap()
            .add_source("e2", SyncFeed::new(vec![vec![bar("B", 3)]]))
            .unwrap()
            .collect();
        assert_eq!(timestamps(&merged), vec![1, 2, 3, 4]);
    }

    // ── Stale rows and empty batches ──

    #[test]
    fn stale_rows_at_batch_boundary_are_dropped() {
        let mut sched = MergeScheduler::empty()
            .add_source(
                "e1",
                SyncFeed::new(vec![
                    vec![bar("A", 1), bar("A", 2)],
                    vec![bar("A", 2), bar("A", 3)],
                ]),
            )
            .unwrap();
        let merged: Vec<_> = sched.by_ref().collect();

        assert_eq!(timestamps(&merged), vec![1, 2, 3]);
        assert_eq!(sched.stats().stale_rows_dropped, 1);
        assert_eq!(sched.stats().rows_emitted, 3);
    }

    #[test]
    fn empty_batches_never_produce_empty_snapshots() {
        let mut sched = MergeScheduler::empty()
            .add_source(
                "e1",
                SyncFeed::new(vec![vec![], vec![], vec![bar("A", 7)], vec![]]),
            )
            .unwrap();
        let merged: Vec<_> = sched.by_ref().collect();

        assert_eq!(timestamps(&merged), vec![7]);
        assert!(merged.iter().all(|s| !s.is_empty()));
        // Four batches plus the end-of-stream pull.
        assert_eq!(sched.stats().pulls, 5);
    }

    #[test]
    fn source_with_empty_batch_is_refilled_before_emitting() {
        let merged: Vec<_> = MergeScheduler::empty()
            .add_source("e1", SyncFeed::new(vec![vec![bar("A", 5)]]))
            .unwrap()
            .add_source("e2", SyncFeed::new(vec![vec![], vec![bar("B", 3)]]))
            .unwrap()
            .collect();
        assert_eq!(timestamps(&merged), vec![3, 5]);
    }

    // ── Construction and faults ──

    #[test]
    fn duplicate_source_names_are_rejected() {
        let err = MergeScheduler::<BarRecord>::empty()
            .add_source("e1", SyncFeed::new(Vec::<Vec<BarRecord>>::new()))
            .unwrap()
            .add_source("e1", SyncFeed::new(Vec::<Vec<BarRecord>>::new()))
            .unwrap_err();
        assert_eq!(err, MergeError::DuplicateSource("e1".into()));

        let adapters = vec![
            SourceAdapter::new("x", SyncFeed::<BarRecord>::new(Vec::new())),
            SourceAdapter::new("x", SyncFeed::<BarRecord>::new(Vec::new())),
        ];
        assert!(MergeScheduler::new(adapters).is_err());
    }

    #[test]
    fn faulted_source_is_retired_and_merge_continues() {
        let mut sched = MergeScheduler::empty()
            .add_source(
                "bad",
                SyncFeed::fallible(vec![
                    Ok(vec![bar("X", 1)]),
                    Err(SourceError::Fault("socket closed".into())),
                ]),
            )
            .unwrap()
            .add_source("good", SyncFeed::new(vec![vec![bar("A", 2), bar("A", 3)]]))
            .unwrap();
        let merged: Vec<_> = sched.by_ref().collect();

        assert_eq!(timestamps(&merged), vec![1, 2, 3]);
        assert_eq!(sched.stats().faults.len(), 1);
        assert_eq!(sched.stats().faults[0].source, "bad");
        let retired = sched.retired();
        assert_eq!(retired.len(), 2);
        assert!(retired
            .iter()
            .any(|(name, state)| *name == "bad" && matches!(state, AdapterState::Faulted(_))));
    }

    #[test]
    fn no_sources_ends_immediately() {
        let mut sched = MergeScheduler::<BarRecord>::empty();
        assert!(sched.next().is_none());
    }

    // ── Async ──

    #[test]
    fn async_and_sync_sources_interleave() {
        let (tx, feed) = async_feed();
        let producer = thread::spawn(move || {
            tx.send(vec![bar("B", 2)]).unwrap();
            tx.send(vec![bar("B", 3), bar("B", 4)]).unwrap();
            tx.finish().unwrap();
        });

        let merged: Vec<_> = MergeScheduler::empty()
            .add_source("e1", SyncFeed::new(vec![vec![bar("A", 1), bar("A", 3), bar("A", 5)]]))
            .unwrap()
            .add_source("e2", feed)
            .unwrap()
            .collect();
        producer.join().unwrap();

        assert_eq!(timestamps(&merged), vec![1, 2, 3, 4, 5]);
        assert_eq!(merged[2].len(), 2);
    }

    #[test]
    fn disconnected_producer_is_recorded_as_fault() {
        let (tx, feed) = async_feed();
        let producer = thread::spawn(move || {
            tx.send(vec![bar("B", 1)]).unwrap();
            // dropped without finish()
        });

        let mut sched = MergeScheduler::empty().add_source("e2", feed).unwrap();
        let merged: Vec<_> = sched.by_ref().collect();
        producer.join().unwrap();

        assert_eq!(timestamps(&merged), vec![1]);
        assert_eq!(sched.stats().faults.len(), 1);
    }
}
