//! Matching engine: pending orders filled incrementally against market records.
//!
//! Every fill and every change to the pending set happens under one lock,
//! and the submission guard is consulted while it is held.
//! Fulfilled orders leave the set inside that critical section and are
//! announced on the bus only after the lock is released, so a subscriber may
//! submit follow-up orders from its handler.

use super::fill_rule::{bar_liquidity, tick_liquidity, Liquidity};
use super::{OrderViolation, SubmissionGuard};
use crate::bus::{Event, EventBus};
use crate::domain::{BarRecord, MarketRecord, Order, OrderSide, OrderUid, TickRecord};
use crate::merge::Snapshot;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub struct MatchingEngine {
    pending: Mutex<Vec<Order>>,
    guard: Option<Arc<dyn SubmissionGuard>>,
    bus: Option<EventBus>,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            guard: None,
            bus: None,
        }
    }

    /// Consult `guard` before admitting each submission.
    pub fn with_guard(mut self, guard: Arc<dyn SubmissionGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Subscribe to `order_request`, `bar`, `level_1_tick` and `snapshot`
    /// events, and publish `order_fulfilled` / `order_rejected` on `bus`.
    ///
    /// The subscription holds a weak reference; dropping the returned `Arc`
    /// turns the handler into a no-op.
    pub fn attach(mut self, bus: &EventBus) -> Arc<Self> {
        self.bus = Some(bus.clone());
        let engine = Arc::new(self);
        let weak: Weak<Self> = Arc::downgrade(&engine);
        bus.subscribe(move |event| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_event(event);
            }
        });
        engine
    }

    // ── Submission ──

    /// Add an order to the pending set.
    pub fn submit(&self, order: Order) -> Result<(), OrderViolation> {
        if order.is_fulfilled() {
            return Err(OrderViolation::AlreadyFulfilled(order.uid()));
        }
        let mut pending = self.pending.lock();
        if pending.iter().any(|o| o.uid() == order.uid()) {
            return Err(OrderViolation::DuplicateOrder(order.uid()));
        }
        // Under the pending lock, so concurrent submitters see each other's orders.
        if let Some(guard) = &self.guard {
            guard.check(&order, &pending)?;
        }
        debug!(
            uid = %order.uid(),
            symbol = order.symbol(),
            side = ?order.side(),
            quantity = order.requested_quantity(),
            "order accepted"
        );
        pending.push(order);
        Ok(())
    }

    /// Remove an unfulfilled order. Returns it with whatever was filled so far.
    pub fn withdraw(&self, uid: OrderUid) -> Option<Order> {
        let mut pending = self.pending.lock();
        let index = pending.iter().position(|o| o.uid() == uid)?;
        Some(pending.remove(index))
    }

    /// Copy of the pending set, in submission order.
    pub fn pending(&self) -> Vec<Order> {
        self.pending.lock().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // ── Market data ──

    /// Apply one level-1 record. Returns the orders it fulfilled.
    pub fn on_tick(&self, tick: &TickRecord) -> Vec<Order> {
        let fulfilled = {
            let mut pending = self.pending.lock();
            let mut fulfilled = Vec::new();
            apply_tick(&mut pending, tick, &mut fulfilled);
            fulfilled
        };
        self.announce(&fulfilled);
        fulfilled
    }

    /// Apply a batch of bars. Only the last bar of each symbol is matched.
    pub fn on_bars(&self, bars: &[BarRecord]) -> Vec<Order> {
        let fulfilled = {
            let mut pending = self.pending.lock();
            let mut fulfilled = Vec::new();
            for bar in last_per_symbol(bars.iter()) {
                apply_bar(&mut pending, bar, &mut fulfilled);
            }
            fulfilled
        };
        self.announce(&fulfilled);
        fulfilled
    }

    pub fn on_record(&self, record: &MarketRecord) -> Vec<Order> {
        match record {
            MarketRecord::Bar(bar) => self.on_bars(std::slice::from_ref(bar)),
            MarketRecord::Tick(tick) => self.on_tick(tick),
        }
    }

    /// Apply every row of a replayed snapshot in one critical section.
    ///
    /// Ticks are matched in row order; for bars only the last bar of each
    /// symbol in the snapshot is matched.
    pub fn on_snapshot(&self, snapshot: &Snapshot<MarketRecord>) -> Vec<Order> {
        let bars = last_per_symbol(snapshot.rows().filter_map(|row| match row {
            MarketRecord::Bar(bar) => Some(bar),
            MarketRecord::Tick(_) => None,
        }));

        let fulfilled = {
            let mut pending = self.pending.lock();
            let mut fulfilled = Vec::new();
            for row in snapshot.rows() {
                match row {
                    MarketRecord::Tick(tick) => apply_tick(&mut pending, tick, &mut fulfilled),
                    MarketRecord::Bar(bar) => {
                        if bars.iter().any(|last| std::ptr::eq(*last, bar)) {
                            apply_bar(&mut pending, bar, &mut fulfilled);
                        }
                    }
                }
            }
            fulfilled
        };
        self.announce(&fulfilled);
        fulfilled
    }

    fn announce(&self, fulfilled: &[Order]) {
        for order in fulfilled {
            info!(
                uid = %order.uid(),
                symbol = order.symbol(),
                side = ?order.side(),
                quantity = order.filled_quantity(),
                avg_price = order.weighted_avg_price(),
                "order fulfilled"
            );
            if let Some(bus) = &self.bus {
                bus.publish(Event::OrderFulfilled(order.clone()));
            }
        }
    }

    fn handle_event(&self, event: &Event) {
        match event {
            Event::OrderRequest(order) => {
                let uid = order.uid();
                if let Err(violation) = self.submit(order.clone()) {
                    warn!(%uid, reason = %violation, "order request rejected");
                    if let Some(bus) = &self.bus {
                        bus.publish(Event::OrderRejected {
                            uid,
                            reason: violation.to_string(),
                        });
                    }
                }
            }
            Event::Bar(bar) => {
                self.on_bars(std::slice::from_ref(bar));
            }
            Event::Level1Tick(tick) => {
                self.on_tick(tick);
            }
            Event::Snapshot(snapshot) => {
                self.on_snapshot(snapshot);
            }
            _ => {}
        }
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("pending", &self.pending_count())
            .field("guarded", &self.guard.is_some())
            .field("attached", &self.bus.is_some())
            .finish()
    }
}

/// Last bar for each symbol, in order of each symbol's final appearance.
fn last_per_symbol<'a>(bars: impl Iterator<Item = &'a BarRecord>) -> Vec<&'a BarRecord> {
    let mut last: HashMap<&str, usize> = HashMap::new();
    let bars: Vec<&BarRecord> = bars.collect();
    for (i, bar) in bars.iter().enumerate() {
        last.insert(bar.symbol.as_str(), i);
    }
    bars.iter()
        .enumerate()
        .filter(|(i, bar)| last.get(bar.symbol.as_str()) == Some(i))
        .map(|(_, bar)| *bar)
        .collect()
}

fn apply_tick(pending: &mut Vec<Order>, tick: &TickRecord, fulfilled: &mut Vec<Order>) {
    apply(pending, &tick.symbol, tick.timestamp, fulfilled, |side| {
        tick_liquidity(side, tick)
    });
}

fn apply_bar(pending: &mut Vec<Order>, bar: &BarRecord, fulfilled: &mut Vec<Order>) {
    apply(pending, &bar.symbol, bar.timestamp, fulfilled, |_| bar_liquidity(bar));
}

/// Offer one record's liquidity to every pending order on `symbol`.
///
/// Orders are evaluated independently: each sees the full offered size.
fn apply<F>(
    pending: &mut Vec<Order>,
    symbol: &str,
    timestamp: DateTime<Utc>,
    fulfilled: &mut Vec<Order>,
    liquidity: F,
) where
    F: Fn(OrderSide) -> Liquidity,
{
    let mut i = 0;
    while i < pending.len() {
        let order = &mut pending[i];
        if order.symbol() == symbol {
            let offer = liquidity(order.side());
            if let Err(e) = order.add_fill(offer.quantity, offer.price, timestamp) {
                // Fulfilled orders never stay pending; reaching this is a bug.
                warn!(uid = %order.uid(), error = %e, "fill rejected");
            }
        }
        if pending[i].is_fulfilled() {
            fulfilled.push(pending.remove(i));
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(t: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(t, 0).unwrap()
    }

    fn bar(symbol: &str, t: i64, volume: f64, close: f64) -> BarRecord {
        BarRecord {
            symbol: symbol.into(),
            timestamp: ts(t),
            open: close,
            high: close,
            low: close,
            close,
            period_volume: volume,
            total_volume: volume,
            trade_count: 1,
        }
    }

    fn quote(symbol: &str, t: i64, ask_size: f64) -> TickRecord {
        TickRecord {
            symbol: symbol.into(),
            timestamp: ts(t),
            tick_id: None,
            last: 10.0,
            last_size: 1.0,
            bid: 9.9,
            bid_size: 50.0,
            ask: 10.1,
            ask_size,
            most_recent_trade: 10.0,
            most_recent_trade_size: 2.0,
        }
    }

    #[test]
    fn bar_fills_partially_then_fulfils() {
        let engine = MatchingEngine::new();
        engine
            .submit(Order::new("IBM", OrderSide::Buy, 100.0).unwrap())
            .unwrap();

        assert!(engine.on_bars(&[bar("IBM", 1, 40.0, 10.0)]).is_empty());
        let pending = engine.pending();
        assert_eq!(pending[0].filled_quantity(), 40.0);
        assert!(pending[0].fulfill_time().is_none());

        let done = engine.on_bars(&[bar("IBM", 2, 70.0, 12.0)]);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].filled_quantity(), 100.0);
        assert_eq!(done[0].fulfill_time(), Some(ts(2)));
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn other_symbols_are_ignored() {
        let engine = MatchingEngine::new();
        engine
            .submit(Order::new("IBM", OrderSide::Buy, 10.0).unwrap())
            .unwrap();
        assert!(engine.on_tick(&quote("AAPL", 1, 100.0)).is_empty());
        assert_eq!(engine.pending()[0].filled_quantity(), 0.0);
    }

    #[test]
    fn each_order_sees_full_size() {
        let engine = MatchingEngine::new();
        engine
            .submit(Order::new("IBM", OrderSide::Buy, 30.0).unwrap())
            .unwrap();
        engine
            .submit(Order::new("IBM", OrderSide::Buy, 30.0).unwrap())
            .unwrap();

        let done = engine.on_tick(&quote("IBM", 1, 30.0));
        assert_eq!(done.len(), 2);
        assert!(done
            .iter()
            .all(|o| (o.weighted_avg_price() - 10.1).abs() < 1e-12));
    }

    #[test]
    fn last_bar_per_symbol_is_used() {
        let engine = MatchingEngine::new();
        engine
            .submit(Order::new("IBM", OrderSide::Buy, 100.0).unwrap())
            .unwrap();
        engine.on_bars(&[
            bar("IBM", 1, 60.0, 10.0),
            bar("AAPL", 1, 10.0, 5.0),
            bar("IBM", 1, 30.0, 11.0),
        ]);
        let pending = engine.pending();
        assert_eq!(pending[0].filled_quantity(), 30.0);
        assert_eq!(pending[0].weighted_avg_price(), 11.0);
    }

    #[test]
    fn duplicate_and_fulfilled_submissions_fail() {
        let engine = MatchingEngine::new();
        let order = Order::new("IBM", OrderSide::Sell, 5.0).unwrap();
        engine.submit(order.clone()).unwrap();
        assert_eq!(
            engine.submit(order.clone()).unwrap_err(),
            OrderViolation::DuplicateOrder(order.uid())
        );

        let done = engine.on_tick(&quote("IBM", 1, 0.0));
        assert_eq!(done.len(), 1);
        assert_eq!(
            engine.submit(done[0].clone()).unwrap_err(),
            OrderViolation::AlreadyFulfilled(order.uid())
        );
    }

    #[test]
    fn withdraw_removes_unfilled_order() {
        let engine = MatchingEngine::new();
        let order = Order::new("IBM", OrderSide::Buy, 100.0).unwrap();
        let uid = order.uid();
        engine.submit(order).unwrap();
        engine.on_tick(&quote("IBM", 1, 25.0));

        let withdrawn = engine.withdraw(uid).unwrap();
        assert_eq!(withdrawn.filled_quantity(), 25.0);
        assert_eq!(engine.pending_count(), 0);
        assert!(engine.withdraw(uid).is_none());
    }

    struct RejectSells;

    impl SubmissionGuard for RejectSells {
        fn check(&self, order: &Order, _pending: &[Order]) -> Result<(), OrderViolation> {
            match order.side() {
                OrderSide::Sell => Err(OrderViolation::InsufficientPosition {
                    symbol: order.symbol().to_string(),
                    requested: order.requested_quantity(),
                    held: 0.0,
                }),
                OrderSide::Buy => Ok(()),
            }
        }
    }

    #[test]
    fn guard_is_consulted() {
        let engine = MatchingEngine::new().with_guard(Arc::new(RejectSells));
        assert!(engine
            .submit(Order::new("IBM", OrderSide::Buy, 1.0).unwrap())
            .is_ok());
        assert!(matches!(
            engine.submit(Order::new("IBM", OrderSide::Sell, 1.0).unwrap()),
            Err(OrderViolation::InsufficientPosition { .. })
        ));
        assert_eq!(engine.pending_count(), 1);
    }

    #[test]
    fn snapshot_applies_ticks_and_last_bars() {
        let engine = MatchingEngine::new();
        engine
            .submit(Order::new("IBM", OrderSide::Buy, 100.0).unwrap())
            .unwrap();
        let mut snapshot = Snapshot::new(ts(1));
        snapshot.insert(
            "bars",
            vec![
                MarketRecord::Bar(bar("IBM", 1, 50.0, 10.0)),
                MarketRecord::Bar(bar("IBM", 1, 20.0, 10.0)),
            ],
        );
        snapshot.insert("ticks", vec![MarketRecord::Tick(quote("IBM", 1, 30.0))]);

        engine.on_snapshot(&snapshot);
        assert_eq!(engine.pending()[0].filled_quantity(), 50.0);
    }
}
