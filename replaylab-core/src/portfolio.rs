//! Portfolio tracker: capital, positions and valuations built from fulfilled orders.
//!
//! State lives behind one mutex. The bus handle is not part of the state:
//! [`PortfolioSnapshot`] is the plain data form used for persistence and for
//! `portfolio_update` events, and [`PortfolioTracker::from_snapshot`] rebuilds
//! a tracker with a fresh lock and subscription.

use crate::bus::{Event, EventBus};
use crate::domain::{BarRecord, MarketRecord, Order, OrderSide, OrderUid, PortfolioId, TickRecord};
use crate::matching::{OrderViolation, SubmissionGuard};
use crate::merge::Snapshot;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PortfolioError {
    #[error("order {0} has no fulfill time")]
    NotFulfilled(OrderUid),

    #[error("order {0} is already recorded")]
    DuplicateOrder(OrderUid),

    #[error("sell of {requested} {symbol} exceeds held quantity {held}")]
    InsufficientPosition {
        symbol: String,
        requested: f64,
        held: f64,
    },

    #[error("buy cost {required:.2} exceeds available capital {available:.2}")]
    InsufficientCapital { required: f64, available: f64 },
}

/// Serializable portfolio state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub uid: PortfolioId,
    pub initial_capital: f64,
    /// Fulfilled orders in the order they were recorded.
    pub orders: Vec<Order>,
    /// Latest observed price per held symbol.
    pub values: BTreeMap<String, f64>,
    /// Latest observed price per symbol, held or not. Prices buys at submission.
    #[serde(default)]
    pub marks: BTreeMap<String, f64>,
}

impl PortfolioSnapshot {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            uid: PortfolioId::new(),
            initial_capital,
            orders: Vec::new(),
            values: BTreeMap::new(),
            marks: BTreeMap::new(),
        }
    }

    /// Initial capital minus buy costs plus sell proceeds.
    pub fn capital(&self) -> f64 {
        self.orders
            .iter()
            .fold(self.initial_capital, |capital, o| match o.side() {
                OrderSide::Buy => capital - o.cost(),
                OrderSide::Sell => capital + o.cost(),
            })
    }

    pub fn quantity(&self, symbol: &str) -> f64 {
        self.orders
            .iter()
            .filter(|o| o.symbol() == symbol)
            .map(|o| match o.side() {
                OrderSide::Buy => o.filled_quantity(),
                OrderSide::Sell => -o.filled_quantity(),
            })
            .sum()
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.orders.iter().map(|o| o.symbol().to_string()).collect()
    }

    pub fn quantities(&self) -> BTreeMap<String, f64> {
        self.symbols()
            .into_iter()
            .map(|s| {
                let q = self.quantity(&s);
                (s, q)
            })
            .collect()
    }

    /// Latest price for `symbol`, optionally times the held quantity.
    ///
    /// Without an observed price this falls back to the last fill price of the
    /// most recently fulfilled order on the symbol. The fallback has no
    /// staleness bound.
    pub fn value(&self, symbol: &str, multiply_by_quantity: bool) -> Option<f64> {
        let price = match self.values.get(symbol) {
            Some(price) => *price,
            None => {
                let price = self
                    .orders
                    .iter()
                    .filter(|o| o.symbol() == symbol)
                    .max_by_key(|o| o.fulfill_time())
                    .and_then(Order::last_fill_price)?;
                debug!(symbol, price, "no current quote, using last traded price");
                price
            }
        };
        Some(if multiply_by_quantity {
            price * self.quantity(symbol)
        } else {
            price
        })
    }

    pub fn values(&self, multiply_by_quantity: bool) -> BTreeMap<String, f64> {
        self.symbols()
            .into_iter()
            .filter_map(|s| {
                let v = self.value(&s, multiply_by_quantity)?;
                Some((s, v))
            })
            .collect()
    }

    /// Capital plus the market value of every position.
    pub fn total_value(&self) -> f64 {
        self.capital() + self.values(true).values().sum::<f64>()
    }

    fn validate(&self, order: &Order) -> Result<(), PortfolioError> {
        if order.fulfill_time().is_none() {
            return Err(PortfolioError::NotFulfilled(order.uid()));
        }
        if self.orders.iter().any(|o| o.uid() == order.uid()) {
            return Err(PortfolioError::DuplicateOrder(order.uid()));
        }
        match order.side() {
            OrderSide::Sell => {
                let held = self.quantity(order.symbol());
                if held < order.filled_quantity() {
                    return Err(PortfolioError::InsufficientPosition {
                        symbol: order.symbol().to_string(),
                        requested: order.filled_quantity(),
                        held,
                    });
                }
            }
            OrderSide::Buy => {
                let available = self.capital();
                if available < order.cost() {
                    return Err(PortfolioError::InsufficientCapital {
                        required: order.cost(),
                        available,
                    });
                }
            }
        }
        Ok(())
    }

    fn holds(&self, symbol: &str) -> bool {
        self.orders.iter().any(|o| o.symbol() == symbol)
    }

    /// Price a buy would be checked at: the latest mark, else the valuation.
    fn buy_price(&self, symbol: &str) -> Option<f64> {
        self.marks
            .get(symbol)
            .copied()
            .or_else(|| self.value(symbol, false))
    }
}

pub struct PortfolioTracker {
    state: Mutex<PortfolioSnapshot>,
    bus: Option<EventBus>,
}

impl PortfolioTracker {
    pub fn new(initial_capital: f64) -> Self {
        Self::restore(PortfolioSnapshot::new(initial_capital))
    }

    /// Detached tracker over previously saved state.
    pub fn restore(snapshot: PortfolioSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            bus: None,
        }
    }

    /// Rebuild from saved state and subscribe to `bus`.
    pub fn from_snapshot(snapshot: PortfolioSnapshot, bus: &EventBus) -> Arc<Self> {
        Self::restore(snapshot).attach(bus)
    }

    /// Subscribe to `order_fulfilled`, `bar`, `level_1_tick` and `snapshot`.
    pub fn attach(mut self, bus: &EventBus) -> Arc<Self> {
        self.bus = Some(bus.clone());
        let tracker = Arc::new(self);
        let weak: Weak<Self> = Arc::downgrade(&tracker);
        bus.subscribe(move |event| {
            if let Some(tracker) = weak.upgrade() {
                tracker.handle_event(event);
            }
        });
        tracker
    }

    pub fn uid(&self) -> PortfolioId {
        self.state.lock().uid
    }

    pub fn initial_capital(&self) -> f64 {
        self.state.lock().initial_capital
    }

    /// Record a fulfilled order.
    pub fn add_order(&self, order: Order) -> Result<(), PortfolioError> {
        let symbol = order.symbol().to_string();
        let snapshot = {
            let mut state = self.state.lock();
            state.validate(&order)?;
            state.orders.push(order);
            state.clone()
        };
        debug!(%symbol, capital = snapshot.capital(), "order recorded");
        if let Some(bus) = &self.bus {
            bus.publish(Event::WatchTicks { symbol });
            bus.publish(Event::PortfolioUpdate(snapshot));
        }
        Ok(())
    }

    pub fn capital(&self) -> f64 {
        self.state.lock().capital()
    }

    pub fn quantity(&self, symbol: &str) -> f64 {
        self.state.lock().quantity(symbol)
    }

    pub fn quantities(&self) -> BTreeMap<String, f64> {
        self.state.lock().quantities()
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.state.lock().symbols()
    }

    pub fn value(&self, symbol: &str, multiply_by_quantity: bool) -> Option<f64> {
        self.state.lock().value(symbol, multiply_by_quantity)
    }

    pub fn values(&self, multiply_by_quantity: bool) -> BTreeMap<String, f64> {
        self.state.lock().values(multiply_by_quantity)
    }

    pub fn total_value(&self) -> f64 {
        self.state.lock().total_value()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.clone()
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        self.state.lock().clone()
    }

    // ── Price updates ──

    /// Mark a held symbol at the tick's bid.
    pub fn on_tick(&self, tick: &TickRecord) {
        self.update_prices([(tick.symbol.as_str(), tick.bid)]);
    }

    /// Mark a held symbol at the bar's close.
    pub fn on_bar(&self, bar: &BarRecord) {
        self.update_prices([(bar.symbol.as_str(), bar.close)]);
    }

    pub fn on_snapshot(&self, snapshot: &Snapshot<MarketRecord>) {
        self.update_prices(snapshot_prices(snapshot));
    }

    /// Record the snapshot's prices as marks without touching valuations or
    /// publishing. Lets the guard price orders submitted ahead of `snapshot`.
    pub fn mark(&self, snapshot: &Snapshot<MarketRecord>) {
        let mut state = self.state.lock();
        for (symbol, price) in snapshot_prices(snapshot) {
            if price.is_finite() {
                state.marks.insert(symbol.to_string(), price);
            }
        }
    }

    /// Apply prices for held symbols; publishes one value update if any applied.
    fn update_prices<'a>(&self, prices: impl IntoIterator<Item = (&'a str, f64)>) {
        let updated = {
            let mut state = self.state.lock();
            let mut changed = false;
            for (symbol, price) in prices {
                if !price.is_finite() {
                    continue;
                }
                state.marks.insert(symbol.to_string(), price);
                if state.holds(symbol) {
                    state.values.insert(symbol.to_string(), price);
                    changed = true;
                }
            }
            changed.then(|| state.clone())
        };
        if let (Some(snapshot), Some(bus)) = (updated, &self.bus) {
            bus.publish(Event::PortfolioValueUpdate(snapshot));
        }
    }

    fn handle_event(&self, event: &Event) {
        match event {
            Event::OrderFulfilled(order) => {
                if let Err(e) = self.add_order(order.clone()) {
                    warn!(uid = %order.uid(), error = %e, "fulfilled order not recorded");
                    if let Some(bus) = &self.bus {
                        bus.publish(Event::PortfolioRejected {
                            uid: order.uid(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Event::Level1Tick(tick) => self.on_tick(tick),
            Event::Bar(bar) => self.on_bar(bar),
            Event::Snapshot(snapshot) => self.on_snapshot(snapshot),
            _ => {}
        }
    }
}

/// Pre-trade check against positions and capital net of `pending`.
///
/// A sell must fit in the position left after pending sells on the symbol. A
/// buy priced at the latest mark must fit in the capital left after pending
/// buys, each priced the same way. Buys on symbols with no known price fail.
impl SubmissionGuard for PortfolioTracker {
    fn check(&self, order: &Order, pending: &[Order]) -> Result<(), OrderViolation> {
        let state = self.state.lock();
        let symbol = order.symbol();
        let requested = order.remaining_quantity();
        match order.side() {
            OrderSide::Sell => {
                let committed: f64 = pending
                    .iter()
                    .filter(|o| o.side() == OrderSide::Sell && o.symbol() == symbol)
                    .map(Order::remaining_quantity)
                    .sum();
                let held = state.quantity(symbol) - committed;
                if held < requested {
                    return Err(OrderViolation::InsufficientPosition {
                        symbol: symbol.to_string(),
                        requested,
                        held,
                    });
                }
            }
            OrderSide::Buy => {
                let price = state
                    .buy_price(symbol)
                    .ok_or_else(|| OrderViolation::UnpricedBuy(symbol.to_string()))?;
                let committed: f64 = pending
                    .iter()
                    .filter(|o| o.side() == OrderSide::Buy)
                    .map(|o| o.remaining_quantity() * state.buy_price(o.symbol()).unwrap_or(0.0))
                    .sum();
                let required = price * requested;
                let available = state.capital() - committed;
                if required > available {
                    return Err(OrderViolation::InsufficientCapital {
                        required,
                        available,
                    });
                }
            }
        }
        Ok(())
    }
}

fn snapshot_prices(snapshot: &Snapshot<MarketRecord>) -> impl Iterator<Item = (&str, f64)> + '_ {
    snapshot.rows().map(|row| match row {
        MarketRecord::Bar(bar) => (bar.symbol.as_str(), bar.close),
        MarketRecord::Tick(tick) => (tick.symbol.as_str(), tick.bid),
    })
}

impl std::fmt::Debug for PortfolioTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PortfolioTracker")
            .field("uid", &state.uid)
            .field("capital", &state.capital())
            .field("orders", &state.orders.len())
            .finish()
    }
}
