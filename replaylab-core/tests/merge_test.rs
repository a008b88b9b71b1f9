//! Merge scheduler scenarios over synthetic in-memory sources.

use chrono::{DateTime, TimeZone, Utc};
use replaylab_core::domain::{BarRecord, MarketRecord, TickRecord};
use replaylab_core::merge::{replay_fingerprint, MergeScheduler, Snapshot};
use replaylab_core::source::{async_feed, minibatches, SourceError, SyncFeed};
use replaylab_core::synthetic::{merged_bars, SyntheticConfig};
use std::thread;

// ── Helpers ──────────────────────────────────────────────────────────

fn ts(t: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(t, 0).unwrap()
}

fn bar(symbol: &str, t: i64) -> BarRecord {
    BarRecord {
        symbol: symbol.into(),
        timestamp: ts(t),
        open: 10.0,
        high: 10.0,
        low: 10.0,
        close: 10.0,
        period_volume: 1.0,
        total_volume: 1.0,
        trade_count: 1,
    }
}

fn tick(symbol: &str, t: i64) -> TickRecord {
    TickRecord {
        symbol: symbol.into(),
        timestamp: ts(t),
        tick_id: None,
        last: 10.0,
        last_size: 1.0,
        bid: 9.9,
        bid_size: 10.0,
        ask: 10.1,
        ask_size: 10.0,
        most_recent_trade: 10.0,
        most_recent_trade_size: 1.0,
    }
}

fn times<R>(snaps: &[Snapshot<R>]) -> Vec<i64> {
    snaps.iter().map(|s| s.timestamp.timestamp()).collect()
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn two_sources_merge_with_shared_timestamp() {
    let e1 = vec![vec![bar("IBM", 1), bar("IBM", 3), bar("IBM", 5)]];
    let e2 = vec![vec![bar("AAPL", 2), bar("AAPL", 3), bar("AAPL", 4)]];

    let snaps: Vec<_> = MergeScheduler::empty()
        .add_source("e1", SyncFeed::new(e1))
        .unwrap()
        .add_source("e2", SyncFeed::new(e2))
        .unwrap()
        .collect();

    assert_eq!(times(&snaps), vec![1, 2, 3, 4, 5]);
    let at3 = &snaps[2];
    assert!(at3.contains("e1") && at3.contains("e2"));
    assert_eq!(at3.get("e1").unwrap()[0].symbol, "IBM");
    assert_eq!(at3.get("e2").unwrap()[0].symbol, "AAPL");
    for (i, snap) in snaps.iter().enumerate() {
        if i != 2 {
            assert_eq!(snap.len(), 1, "snapshot {i} should have one source");
        }
    }
}

#[test]
fn heterogeneous_bar_and_tick_sources() {
    let bars: Vec<MarketRecord> = (0..5).map(|t| bar("IBM", t * 2).into()).collect();
    let ticks: Vec<MarketRecord> = (0..10).map(|t| tick("IBM", t).into()).collect();

    let mut sched = MergeScheduler::empty()
        .add_source("bars", SyncFeed::new(minibatches(bars, 2)))
        .unwrap()
        .add_source("ticks", SyncFeed::new(minibatches(ticks, 3)))
        .unwrap();
    let snaps: Vec<_> = sched.by_ref().collect();

    assert_eq!(times(&snaps), (0..10).collect::<Vec<_>>());
    assert_eq!(sched.stats().rows_emitted, 15);
    assert_eq!(sched.stats().stale_rows_dropped, 0);
    assert!(snaps
        .iter()
        .filter(|s| s.timestamp.timestamp() % 2 == 0)
        .all(|s| s.len() == 2));
}

#[test]
fn faulting_source_does_not_stop_the_merge() {
    let good = SyncFeed::new(vec![vec![bar("A", 1), bar("A", 2)], vec![bar("A", 3)]]);
    let bad = SyncFeed::fallible(vec![
        Ok(vec![bar("B", 1)]),
        Err(SourceError::Fault("vendor dropped the connection".into())),
    ]);

    let mut sched = MergeScheduler::empty()
        .add_source("good", good)
        .unwrap()
        .add_source("bad", bad)
        .unwrap();
    let snaps: Vec<_> = sched.by_ref().collect();

    assert_eq!(times(&snaps), vec![1, 2, 3]);
    assert_eq!(snaps[0].len(), 2);
    assert_eq!(sched.stats().faults.len(), 1);
    assert!(sched.stats().faults[0].reason.contains("vendor dropped"));
    assert_eq!(sched.live_count(), 0);
}

#[test]
fn blocking_producers_feed_the_merge() {
    let config = {
        let mut c = SyntheticConfig::new(7, ts(0));
        c.bars = 200;
        c
    };
    let all = merged_bars(&config, &["IBM", "AAPL", "MSFT"]);

    let (tx, feed) = async_feed();
    let rows = all.clone();
    let producer = thread::spawn(move || {
        for chunk in minibatches(rows, 16) {
            tx.send(chunk).unwrap();
        }
        tx.finish().unwrap();
    });

    let snaps: Vec<_> = MergeScheduler::empty()
        .add_source("live", feed)
        .unwrap()
        .collect();
    producer.join().unwrap();

    assert_eq!(snaps.len(), 200);
    assert!(snaps.iter().all(|s| s.row_count() == 3));

    let replayed: Vec<_> = MergeScheduler::empty()
        .add_source("live", SyncFeed::new(vec![all]))
        .unwrap()
        .collect();
    assert_eq!(replay_fingerprint(&snaps), replay_fingerprint(&replayed));
}

#[test]
fn scheduler_is_lazy() {
    // A feed yielding a row per batch forever: only what is asked for is pulled.
    let endless = SyncFeed::new((0..).map(|t| vec![bar("A", t)]));
    let mut sched = MergeScheduler::empty().add_source("e", endless).unwrap();

    let first: Vec<_> = sched.by_ref().take(3).collect();
    assert_eq!(times(&first), vec![0, 1, 2]);
    assert_eq!(sched.stats().pulls, 3);
}
