//! Fill rules: the (quantity, price) a record makes available to one side.

use crate::domain::{BarRecord, OrderSide, TickRecord};

/// Size and price available to an order from one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Liquidity {
    pub quantity: f64,
    pub price: f64,
}

impl Liquidity {
    pub fn new(quantity: f64, price: f64) -> Self {
        Self { quantity, price }
    }
}

/// Buys lift the ask, sells hit the bid.
///
/// A trade print offers its traded size at the touch. A quote offers the
/// displayed size at the touch; an empty touch falls back to the most recent
/// trade.
pub fn tick_liquidity(side: OrderSide, tick: &TickRecord) -> Liquidity {
    let (touch, touch_size) = match side {
        OrderSide::Buy => (tick.ask, tick.ask_size),
        OrderSide::Sell => (tick.bid, tick.bid_size),
    };
    if tick.is_trade() {
        Liquidity::new(tick.last_size, touch)
    } else if touch_size > 0.0 {
        Liquidity::new(touch_size, touch)
    } else {
        Liquidity::new(tick.most_recent_trade_size, tick.most_recent_trade)
    }
}

/// Bars fill either side at the close, up to the bar's own volume.
pub fn bar_liquidity(bar: &BarRecord) -> Liquidity {
    Liquidity::new(bar.period_volume, bar.close)
}
