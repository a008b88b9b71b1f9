//! History queries replayed through the merge scheduler.

use chrono::{DateTime, TimeZone, Utc};
use replaylab_core::bus::{Event, EventBus};
use replaylab_core::domain::{BarRecord, MarketRecord, Order, OrderSide, TickRecord};
use replaylab_core::history::{
    Bars, BarsForDays, DailyForDates, HistoryProvider, HistoryQuery, InMemoryHistory, IntervalType,
    QueryFeed, Ticks, TicksForDays,
};
use replaylab_core::matching::MatchingEngine;
use replaylab_core::merge::MergeScheduler;
use replaylab_core::portfolio::PortfolioTracker;
use replaylab_core::source::{BatchFeed, Pull};
use std::sync::Arc;

fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
}

fn bar(symbol: &str, ts: DateTime<Utc>, volume: f64, close: f64) -> BarRecord {
    BarRecord {
        symbol: symbol.into(),
        timestamp: ts,
        open: close,
        high: close,
        low: close,
        close,
        period_volume: volume,
        total_volume: volume,
        trade_count: 1,
    }
}

fn quote(symbol: &str, ts: DateTime<Utc>) -> TickRecord {
    TickRecord {
        symbol: symbol.into(),
        timestamp: ts,
        tick_id: None,
        last: 10.0,
        last_size: 1.0,
        bid: 9.95,
        bid_size: 20.0,
        ask: 10.05,
        ask_size: 20.0,
        most_recent_trade: 10.0,
        most_recent_trade_size: 1.0,
    }
}

fn history() -> Arc<InMemoryHistory> {
    let mut h = InMemoryHistory::new();
    for d in 4..=6 {
        h.insert_bars(60, (0..5).map(|m| bar("IBM", at(d, 15, m), 10.0, 100.0 + m as f64)));
        h.insert_bars(60, (0..5).map(|m| bar("AAPL", at(d, 15, m), 10.0, 50.0)));
        h.insert_ticks((0..5).map(|m| quote("IBM", at(d, 15, m))));
        h.insert_daily([bar("IBM", at(d, 21, 0), 1_000.0, 101.0)]);
    }
    Arc::new(h)
}

#[test]
fn query_feed_yields_one_ascending_batch_per_query() {
    let queries = vec![
        HistoryQuery::Bars(Bars {
            ticker: "IBM".into(),
            interval_len: 60,
            interval_type: IntervalType::Seconds,
            max_bars: 3,
            ascend: false,
            timeout_secs: None,
        }),
        HistoryQuery::DailyForDates(DailyForDates {
            ticker: "IBM".into(),
            bgn_dt: at(5, 0, 0).date_naive(),
            end_dt: at(6, 0, 0).date_naive(),
            ascend: false,
            max_days: None,
            timeout_secs: None,
        }),
    ];
    let mut feed = QueryFeed::new(history(), queries);

    let Pull::Batch(first) = feed.pull().unwrap() else {
        panic!("expected a batch");
    };
    let stamps: Vec<_> = first.iter().map(|r| match r {
        MarketRecord::Bar(b) => b.timestamp,
        MarketRecord::Tick(t) => t.timestamp,
    }).collect();
    assert_eq!(stamps, vec![at(6, 15, 2), at(6, 15, 3), at(6, 15, 4)]);

    let Pull::Batch(second) = feed.pull().unwrap() else {
        panic!("expected a batch");
    };
    assert_eq!(second.len(), 2);
    assert_eq!(feed.pull().unwrap(), Pull::EndOfStream);
    assert_eq!(feed.issued(), 2);
}

#[test]
fn descending_results_keep_stored_order_within_a_timestamp() {
    let mut h = InMemoryHistory::new();
    h.insert_ticks((1..=3).map(|id| TickRecord {
        tick_id: Some(id),
        ..quote("IBM", at(4, 15, 0))
    }));
    h.insert_ticks([quote("IBM", at(4, 15, 1))]);

    let query = |ascend| {
        HistoryQuery::Ticks(Ticks {
            ticker: "IBM".into(),
            max_ticks: 10,
            ascend,
            timeout_secs: None,
        })
    };
    let mut feed = QueryFeed::new(Arc::new(h), [query(false), query(true)]);
    for _ in 0..2 {
        let Pull::Batch(batch) = feed.pull().unwrap() else {
            panic!("expected a batch");
        };
        let ids: Vec<_> = batch
            .iter()
            .map(|r| match r {
                MarketRecord::Tick(t) => t.tick_id,
                MarketRecord::Bar(_) => panic!("expected ticks"),
            })
            .collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3), None]);
    }
}

#[test]
fn failed_query_retires_the_source() {
    let queries = vec![HistoryQuery::Bars(Bars {
        ticker: "MSFT".into(),
        interval_len: 60,
        interval_type: IntervalType::Seconds,
        max_bars: 10,
        ascend: true,
        timeout_secs: None,
    })];
    let mut sched = MergeScheduler::empty()
        .add_source("msft", QueryFeed::new(history(), queries))
        .unwrap();
    assert!(sched.next().is_none());
    assert_eq!(sched.stats().faults.len(), 1);
    assert_eq!(sched.stats().faults[0].source, "msft");
}

#[test]
fn bars_and_ticks_for_days_replay_into_portfolio() {
    let provider = history();
    assert!(provider
        .request(&HistoryQuery::BarsForDays(BarsForDays {
            ticker: "IBM".into(),
            interval_len: 60,
            interval_type: IntervalType::Ticks,
            num_days: 1,
            bgn_flt: None,
            end_flt: None,
            ascend: true,
            max_bars: None,
            timeout_secs: None,
        }))
        .is_err());

    let bar_queries = ["IBM", "AAPL"].map(|ticker| {
        HistoryQuery::BarsForDays(BarsForDays {
            ticker: ticker.into(),
            interval_len: 60,
            interval_type: IntervalType::Seconds,
            num_days: 1,
            bgn_flt: None,
            end_flt: None,
            ascend: true,
            max_bars: None,
            timeout_secs: None,
        })
    });
    let tick_queries = [HistoryQuery::TicksForDays(TicksForDays {
        ticker: "IBM".into(),
        num_days: 1,
        bgn_flt: None,
        end_flt: None,
        ascend: true,
        max_ticks: None,
        timeout_secs: None,
    })];

    let bus = EventBus::new();
    let portfolio = PortfolioTracker::new(100_000.0).attach(&bus);
    let _engine = MatchingEngine::new().attach(&bus);
    bus.publish(Event::OrderRequest(
        Order::new("IBM", OrderSide::Buy, 25.0).unwrap(),
    ));

    let mut sched = MergeScheduler::empty()
        .add_source("bars", QueryFeed::new(Arc::clone(&provider), bar_queries))
        .unwrap()
        .add_source("ticks", QueryFeed::new(provider, tick_queries))
        .unwrap();

    let mut count = 0;
    for snapshot in sched.by_ref() {
        bus.publish(Event::Snapshot(snapshot));
        count += 1;
    }

    assert_eq!(count, 5);
    // The AAPL query covers the same minutes as the IBM one that preceded it
    // on the same source, so its rows arrive stale.
    assert_eq!(sched.stats().stale_rows_dropped, 5);
    assert_eq!(portfolio.quantity("IBM"), 25.0);
    // Marked at the last tick's bid on the final snapshot.
    assert_eq!(portfolio.value("IBM", false), Some(9.95));
}

#[test]
fn portfolio_rehydrates_from_snapshot_and_resubscribes() {
    let bus = EventBus::new();
    let original = PortfolioTracker::new(10_000.0).attach(&bus);
    let _engine = MatchingEngine::new().attach(&bus);
    bus.publish(Event::OrderRequest(
        Order::new("IBM", OrderSide::Buy, 10.0).unwrap(),
    ));
    bus.publish(Event::Bar(bar("IBM", at(4, 15, 0), 100.0, 100.0)));
    let saved = serde_json::to_string(&original.snapshot()).unwrap();

    let fresh_bus = EventBus::new();
    let restored = PortfolioTracker::from_snapshot(serde_json::from_str(&saved).unwrap(), &fresh_bus);
    assert_eq!(restored.uid(), original.uid());
    assert_eq!(restored.quantity("IBM"), 10.0);

    fresh_bus.publish(Event::Bar(bar("IBM", at(4, 15, 1), 1.0, 120.0)));
    assert_eq!(restored.value("IBM", true), Some(1_200.0));
    // The original tracker is on another bus and never saw the update.
    assert_eq!(original.value("IBM", false), Some(100.0));
}
