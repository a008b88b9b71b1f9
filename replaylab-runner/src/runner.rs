//! Replay orchestration: load sources, merge them, and drive the engine and
//! portfolio through the event bus.
//!
//! One replay wires up:
//! - a [`SourceAdapter`] per configured source (async sources get a producer thread)
//! - a [`PortfolioTracker`] and a [`MatchingEngine`] guarded by it, both on one bus
//! - the configured orders, published as `order_request` events when the clock
//!   reaches their `submit_at`, after the portfolio has marked that snapshot's
//!   prices so buys are checked at them
//!
//! Every snapshot goes into the replay fingerprint and then onto the bus.

use crate::config::{ConfigError, ReplayConfig, SourceConfig};
use crate::loader::{load_batch, LoadError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use replaylab_core::bus::{Event, EventBus};
use replaylab_core::domain::{Batch, MarketRecord, Order, OrderError, OrderUid};
use replaylab_core::matching::{MatchingEngine, SubmissionGuard};
use replaylab_core::merge::{
    FingerprintBuilder, MergeError, MergeScheduler, MergeStats, ReplayFingerprint,
};
use replaylab_core::portfolio::PortfolioTracker;
use replaylab_core::source::{async_feed, minibatches, FeedMode, SourceAdapter, SyncFeed};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Load(#[from] LoadError),
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),
    #[error("order error: {0}")]
    Order(#[from] OrderError),
    #[error("failed to spawn producer for '{source_name}': {reason}")]
    Spawn { source_name: String, reason: String },
}

/// An order the engine refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub uid: OrderUid,
    pub reason: String,
}

/// Outcome of one replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub snapshots: u64,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub fingerprint: ReplayFingerprint,
    pub stats: MergeStats,
    /// Orders in the order they were fulfilled.
    pub fulfilled: Vec<Order>,
    pub rejected: Vec<Rejection>,
    /// Admitted but not completely filled when the data ran out.
    pub pending: Vec<Order>,
    /// Orders whose `submit_at` lies after the last snapshot.
    pub unsubmitted: usize,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub positions: BTreeMap<String, f64>,
    pub total_value: f64,
}

/// Run a replay on a private bus.
pub fn run_replay(config: &ReplayConfig) -> Result<ReplayReport, RunError> {
    run_replay_on(config, &EventBus::new())
}

/// Run a replay on `bus`. Subscribers added before the call observe every
/// event of the replay.
pub fn run_replay_on(config: &ReplayConfig, bus: &EventBus) -> Result<ReplayReport, RunError> {
    config.validate()?;

    // Load everything before spawning producers, so a bad file leaves no
    // threads behind.
    let mut loaded = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        loaded.push((source, load_batch(&source.path, source.kind)?));
    }
    let mut orders = scheduled_orders(config)?;

    let fulfilled = Arc::new(Mutex::new(Vec::new()));
    let rejected = Arc::new(Mutex::new(Vec::new()));
    {
        let fulfilled = Arc::clone(&fulfilled);
        let rejected = Arc::clone(&rejected);
        bus.subscribe(move |event| match event {
            Event::OrderFulfilled(order) => fulfilled.lock().push(order.clone()),
            Event::OrderRejected { uid, reason } => rejected.lock().push(Rejection {
                uid: *uid,
                reason: reason.clone(),
            }),
            // Filled by the engine but refused by the portfolio.
            Event::PortfolioRejected { uid, reason } => {
                fulfilled.lock().retain(|o: &Order| o.uid() != *uid);
                rejected.lock().push(Rejection {
                    uid: *uid,
                    reason: reason.clone(),
                });
            }
            _ => {}
        });
    }

    // The portfolio subscribes first so its prices are current when the
    // engine's guard consults it.
    let portfolio = PortfolioTracker::new(config.initial_capital).attach(bus);
    let guard: Arc<dyn SubmissionGuard> = portfolio.clone();
    let engine = MatchingEngine::new().with_guard(guard).attach(bus);

    let mut scheduler = MergeScheduler::empty();
    let mut producers = Vec::new();
    for (source, rows) in loaded {
        let batches = minibatches(rows, source.minibatch);
        let adapter = match source.mode {
            FeedMode::Sync => SourceAdapter::new(&source.name, SyncFeed::new(batches)),
            FeedMode::Async => {
                let (adapter, handle) = spawn_producer(source, batches)?;
                producers.push(handle);
                adapter
            }
        };
        scheduler.push_source(adapter)?;
    }

    info!(
        sources = config.sources.len(),
        orders = orders.len(),
        capital = config.initial_capital,
        "replay started"
    );

    let mut fingerprint = FingerprintBuilder::new();
    let mut faults_published = 0;
    let mut first_timestamp = None;
    let mut last_timestamp = None;

    while let Some(snapshot) = scheduler.next_snapshot() {
        faults_published = publish_faults(&scheduler, faults_published, bus);
        if first_timestamp.is_none() {
            first_timestamp = Some(snapshot.timestamp);
        }
        last_timestamp = Some(snapshot.timestamp);

        let due = |at: &Option<DateTime<Utc>>| at.map_or(true, |at| at <= snapshot.timestamp);
        if orders.front().is_some_and(|(at, _)| due(at)) {
            portfolio.mark(&snapshot);
        }
        while orders.front().is_some_and(|(at, _)| due(at)) {
            if let Some((_, order)) = orders.pop_front() {
                debug!(uid = %order.uid(), symbol = order.symbol(), at = %snapshot.timestamp, "submitting order");
                bus.publish(Event::OrderRequest(order));
            }
        }

        fingerprint.push(&snapshot);
        bus.publish(Event::Snapshot(snapshot));
    }
    publish_faults(&scheduler, faults_published, bus);

    let stats = scheduler.stats().clone();
    drop(scheduler);
    for handle in producers {
        if handle.join().is_err() {
            warn!("producer thread panicked");
        }
    }

    let final_state = portfolio.snapshot();
    let report = ReplayReport {
        snapshots: stats.snapshots,
        first_timestamp,
        last_timestamp,
        fingerprint: fingerprint.finish(),
        fulfilled: fulfilled.lock().clone(),
        rejected: rejected.lock().clone(),
        pending: engine.pending(),
        unsubmitted: orders.len(),
        initial_capital: final_state.initial_capital,
        final_capital: final_state.capital(),
        positions: final_state.quantities(),
        total_value: final_state.total_value(),
        stats,
    };

    info!(
        snapshots = report.snapshots,
        fulfilled = report.fulfilled.len(),
        rejected = report.rejected.len(),
        faults = report.stats.faults.len(),
        fingerprint = %report.fingerprint,
        "replay finished"
    );
    Ok(report)
}

/// Config orders with deterministic uids, immediate ones first, then by
/// `submit_at`. Ties keep config order.
fn scheduled_orders(
    config: &ReplayConfig,
) -> Result<VecDeque<(Option<DateTime<Utc>>, Order)>, OrderError> {
    let mut orders = config
        .orders
        .iter()
        .enumerate()
        .map(|(i, o)| {
            let uid = OrderUid::from_u128(i as u128 + 1);
            Order::with_uid(uid, &o.symbol, o.side, o.quantity).map(|order| (o.submit_at, order))
        })
        .collect::<Result<Vec<_>, _>>()?;
    orders.sort_by_key(|(at, _)| *at);
    Ok(orders.into())
}

fn spawn_producer(
    source: &SourceConfig,
    batches: Vec<Batch<MarketRecord>>,
) -> Result<(SourceAdapter<MarketRecord>, JoinHandle<()>), RunError> {
    let (tx, feed) = async_feed();
    let name = source.name.clone();
    let handle = thread::Builder::new()
        .name(format!("feed-{name}"))
        .spawn(move || {
            for batch in batches {
                if tx.send(batch).is_err() {
                    debug!(source = %name, "consumer gone, producer stopping");
                    return;
                }
            }
            if tx.finish().is_err() {
                debug!(source = %name, "consumer gone before end-of-stream");
            }
        })
        .map_err(|e| RunError::Spawn {
            source_name: source.name.clone(),
            reason: e.to_string(),
        })?;
    Ok((SourceAdapter::new(&source.name, feed), handle))
}

/// Publish faults recorded since the last call; returns the new count.
fn publish_faults(
    scheduler: &MergeScheduler<MarketRecord>,
    already: usize,
    bus: &EventBus,
) -> usize {
    let faults = &scheduler.stats().faults;
    for fault in &faults[already..] {
        bus.publish(Event::SourceFault(fault.clone()));
    }
    faults.len()
}
