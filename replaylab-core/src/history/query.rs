//! Request shapes, one plain struct per variant.
//!
//! Optional limits default to `None` and `ascend` defaults to `false`
//! (newest first), matching what history backends return unless asked
//! otherwise.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Bar interval unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalType {
    /// `interval_len` is a number of seconds.
    #[default]
    Seconds,
    /// `interval_len` is a traded volume.
    Volume,
    /// `interval_len` is a number of trades.
    Ticks,
}

/// The most recent `max_ticks` ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticks {
    pub ticker: String,
    pub max_ticks: usize,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Ticks over the last `num_days` days, optionally within a time-of-day window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicksForDays {
    pub ticker: String,
    pub num_days: u32,
    #[serde(default)]
    pub bgn_flt: Option<NaiveTime>,
    #[serde(default)]
    pub end_flt: Option<NaiveTime>,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub max_ticks: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicksInPeriod {
    pub ticker: String,
    pub bgn_prd: DateTime<Utc>,
    pub end_prd: DateTime<Utc>,
    #[serde(default)]
    pub bgn_flt: Option<NaiveTime>,
    #[serde(default)]
    pub end_flt: Option<NaiveTime>,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub max_ticks: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// The most recent `max_bars` interval bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bars {
    pub ticker: String,
    pub interval_len: u64,
    #[serde(default)]
    pub interval_type: IntervalType,
    pub max_bars: usize,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarsForDays {
    pub ticker: String,
    pub interval_len: u64,
    #[serde(default)]
    pub interval_type: IntervalType,
    pub num_days: u32,
    #[serde(default)]
    pub bgn_flt: Option<NaiveTime>,
    #[serde(default)]
    pub end_flt: Option<NaiveTime>,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub max_bars: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarsInPeriod {
    pub ticker: String,
    pub interval_len: u64,
    #[serde(default)]
    pub interval_type: IntervalType,
    pub bgn_prd: DateTime<Utc>,
    pub end_prd: DateTime<Utc>,
    #[serde(default)]
    pub bgn_flt: Option<NaiveTime>,
    #[serde(default)]
    pub end_flt: Option<NaiveTime>,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub max_bars: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// The most recent `num_days` daily bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Daily {
    pub ticker: String,
    pub num_days: u32,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Daily bars between two dates, inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForDates {
    pub ticker: String,
    pub bgn_dt: NaiveDate,
    pub end_dt: NaiveDate,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub max_days: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weekly {
    pub ticker: String,
    pub num_weeks: u32,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monthly {
    pub ticker: String,
    pub num_months: u32,
    #[serde(default)]
    pub ascend: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// What kind of records a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryShape {
    Ticks,
    /// Intraday interval bars.
    Bars,
    /// Daily, weekly or monthly bars.
    Daily,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum HistoryQuery {
    Ticks(Ticks),
    TicksForDays(TicksForDays),
    TicksInPeriod(TicksInPeriod),
    Bars(Bars),
    BarsForDays(BarsForDays),
    BarsInPeriod(BarsInPeriod),
    Daily(Daily),
    DailyForDates(DailyForDates),
    Weekly(Weekly),
    Monthly(Monthly),
}

impl HistoryQuery {
    pub fn ticker(&self) -> &str {
        match self {
            HistoryQuery::Ticks(q) => &q.ticker,
            HistoryQuery::TicksForDays(q) => &q.ticker,
            HistoryQuery::TicksInPeriod(q) => &q.ticker,
            HistoryQuery::Bars(q) => &q.ticker,
            HistoryQuery::BarsForDays(q) => &q.ticker,
            HistoryQuery::BarsInPeriod(q) => &q.ticker,
            HistoryQuery::Daily(q) => &q.ticker,
            HistoryQuery::DailyForDates(q) => &q.ticker,
            HistoryQuery::Weekly(q) => &q.ticker,
            HistoryQuery::Monthly(q) => &q.ticker,
        }
    }

    pub fn shape(&self) -> QueryShape {
        match self {
            HistoryQuery::Ticks(_) | HistoryQuery::TicksForDays(_) | HistoryQuery::TicksInPeriod(_) => {
                QueryShape::Ticks
            }
            HistoryQuery::Bars(_) | HistoryQuery::BarsForDays(_) | HistoryQuery::BarsInPeriod(_) => {
                QueryShape::Bars
            }
            HistoryQuery::Daily(_)
            | HistoryQuery::DailyForDates(_)
            | HistoryQuery::Weekly(_)
            | HistoryQuery::Monthly(_) => QueryShape::Daily,
        }
    }

    pub fn ascend(&self) -> bool {
        match self {
            HistoryQuery::Ticks(q) => q.ascend,
            HistoryQuery::TicksForDays(q) => q.ascend,
            HistoryQuery::TicksInPeriod(q) => q.ascend,
            HistoryQuery::Bars(q) => q.ascend,
            HistoryQuery::BarsForDays(q) => q.ascend,
            HistoryQuery::BarsInPeriod(q) => q.ascend,
            HistoryQuery::Daily(q) => q.ascend,
            HistoryQuery::DailyForDates(q) => q.ascend,
            HistoryQuery::Weekly(q) => q.ascend,
            HistoryQuery::Monthly(q) => q.ascend,
        }
    }

    /// Per-request timeout, if the caller set one.
    pub fn timeout_secs(&self) -> Option<u64> {
        match self {
            HistoryQuery::Ticks(q) => q.timeout_secs,
            HistoryQuery::TicksForDays(q) => q.timeout_secs,
            HistoryQuery::TicksInPeriod(q) => q.timeout_secs,
            HistoryQuery::Bars(q) => q.timeout_secs,
            HistoryQuery::BarsForDays(q) => q.timeout_secs,
            HistoryQuery::BarsInPeriod(q) => q.timeout_secs,
            HistoryQuery::Daily(q) => q.timeout_secs,
            HistoryQuery::DailyForDates(q) => q.timeout_secs,
            HistoryQuery::Weekly(q) => q.timeout_secs,
            HistoryQuery::Monthly(q) => q.timeout_secs,
        }
    }
}
