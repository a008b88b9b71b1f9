//! Market records: the rows carried by batches and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Anything with an event timestamp. The merge scheduler orders rows by it.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// An ordered run of rows from one source, sorted by timestamp ascending.
///
/// A batch may hold rows for several symbols. The scheduler does not re-sort it.
pub type Batch<R> = Vec<R>;

/// Interval bar for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume traded within this bar. This is the fillable quantity.
    pub period_volume: f64,
    /// Cumulative session volume at the end of the bar.
    pub total_volume: f64,
    pub trade_count: u64,
}

impl BarRecord {
    /// Basic OHLC sanity check: high >= low, high >= open/close, low <= open/close.
    pub fn is_sane(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.period_volume >= 0.0
    }
}

/// Level-1 update for a single symbol.
///
/// A record carrying `tick_id` is a trade print (`last`/`last_size` describe the
/// trade). Without it the record is a quote update, where `most_recent_trade*`
/// carry the last known trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub tick_id: Option<u64>,
    pub last: f64,
    pub last_size: f64,
    pub bid: f64,
    pub bid_size: f64,
    pub ask: f64,
    pub ask_size: f64,
    pub most_recent_trade: f64,
    pub most_recent_trade_size: f64,
}

impl TickRecord {
    pub fn is_trade(&self) -> bool {
        self.tick_id.is_some()
    }
}

/// Row type for heterogeneous replays mixing bar and tick sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketRecord {
    Bar(BarRecord),
    Tick(TickRecord),
}

impl MarketRecord {
    pub fn symbol(&self) -> &str {
        match self {
            MarketRecord::Bar(bar) => &bar.symbol,
            MarketRecord::Tick(tick) => &tick.symbol,
        }
    }
}

impl From<BarRecord> for MarketRecord {
    fn from(bar: BarRecord) -> Self {
        MarketRecord::Bar(bar)
    }
}

impl From<TickRecord> for MarketRecord {
    fn from(tick: TickRecord) -> Self {
        MarketRecord::Tick(tick)
    }
}

impl Timestamped for BarRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for TickRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for MarketRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MarketRecord::Bar(bar) => bar.timestamp,
            MarketRecord::Tick(tick) => tick.timestamp,
        }
    }
}
