//! Provider over preloaded records.

use super::query::{HistoryQuery, IntervalType};
use super::HistoryProvider;
use crate::domain::{Batch, BarRecord, MarketRecord, Timestamped, TickRecord};
use crate::source::SourceError;
use chrono::{Datelike, NaiveDate, NaiveTime};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory history: ticks, intraday bars per interval, and daily bars.
///
/// Weekly and monthly requests are answered by aggregating the daily bars.
/// "Last N days" requests count back from the latest date stored for the
/// ticker, not from the wall clock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistory {
    ticks: BTreeMap<String, Vec<TickRecord>>,
    bars: BTreeMap<(String, u64), Vec<BarRecord>>,
    daily: BTreeMap<String, Vec<BarRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_ticks(&mut self, ticks: impl IntoIterator<Item = TickRecord>) {
        for tick in ticks {
            self.ticks.entry(tick.symbol.clone()).or_default().push(tick);
        }
        for rows in self.ticks.values_mut() {
            rows.sort_by_key(|t| t.timestamp);
        }
    }

    /// Intraday bars of `interval_secs` seconds each.
    pub fn insert_bars(&mut self, interval_secs: u64, bars: impl IntoIterator<Item = BarRecord>) {
        for bar in bars {
            self.bars
                .entry((bar.symbol.clone(), interval_secs))
                .or_default()
                .push(bar);
        }
        for rows in self.bars.values_mut() {
            rows.sort_by_key(|b| b.timestamp);
        }
    }

    pub fn insert_daily(&mut self, bars: impl IntoIterator<Item = BarRecord>) {
        for bar in bars {
            self.daily.entry(bar.symbol.clone()).or_default().push(bar);
        }
        for rows in self.daily.values_mut() {
            rows.sort_by_key(|b| b.timestamp);
        }
    }

    fn ticks_for(&self, ticker: &str) -> Result<&[TickRecord], SourceError> {
        self.ticks
            .get(ticker)
            .map(Vec::as_slice)
            .ok_or_else(|| unavailable(ticker, "no ticks stored"))
    }

    fn bars_for(
        &self,
        ticker: &str,
        interval_len: u64,
        interval_type: IntervalType,
    ) -> Result<&[BarRecord], SourceError> {
        if interval_type != IntervalType::Seconds {
            return Err(unavailable(ticker, "only time-based bar intervals are stored"));
        }
        self.bars
            .get(&(ticker.to_string(), interval_len))
            .map(Vec::as_slice)
            .ok_or_else(|| unavailable(ticker, &format!("no {interval_len}s bars stored")))
    }

    fn daily_for(&self, ticker: &str) -> Result<&[BarRecord], SourceError> {
        self.daily
            .get(ticker)
            .map(Vec::as_slice)
            .ok_or_else(|| unavailable(ticker, "no daily bars stored"))
    }
}

impl HistoryProvider for InMemoryHistory {
    fn request(&self, query: &HistoryQuery) -> Result<Batch<MarketRecord>, SourceError> {
        let rows: Vec<MarketRecord> = match query {
            HistoryQuery::Ticks(q) => {
                let ticks = self.ticks_for(&q.ticker)?.to_vec();
                finish(ticks, Some(q.max_ticks), q.ascend)
            }
            HistoryQuery::TicksForDays(q) => {
                let ticks = last_days(self.ticks_for(&q.ticker)?, q.num_days);
                let ticks = within_hours(ticks, q.bgn_flt, q.end_flt);
                finish(ticks, q.max_ticks, q.ascend)
            }
            HistoryQuery::TicksInPeriod(q) => {
                let ticks: Vec<_> = self
                    .ticks_for(&q.ticker)?
                    .iter()
                    .filter(|t| t.timestamp >= q.bgn_prd && t.timestamp <= q.end_prd)
                    .cloned()
                    .collect();
                let ticks = within_hours(ticks, q.bgn_flt, q.end_flt);
                finish(ticks, q.max_ticks, q.ascend)
            }
            HistoryQuery::Bars(q) => {
                let bars = self
                    .bars_for(&q.ticker, q.interval_len, q.interval_type)?
                    .to_vec();
                finish(bars, Some(q.max_bars), q.ascend)
            }
            HistoryQuery::BarsForDays(q) => {
                let bars = last_days(
                    self.bars_for(&q.ticker, q.interval_len, q.interval_type)?,
                    q.num_days,
                );
                let bars = within_hours(bars, q.bgn_flt, q.end_flt);
                finish(bars, q.max_bars, q.ascend)
            }
            HistoryQuery::BarsInPeriod(q) => {
                let bars: Vec<_> = self
                    .bars_for(&q.ticker, q.interval_len, q.interval_type)?
                    .iter()
                    .filter(|b| b.timestamp >= q.bgn_prd && b.timestamp <= q.end_prd)
                    .cloned()
                    .collect();
                let bars = within_hours(bars, q.bgn_flt, q.end_flt);
                finish(bars, q.max_bars, q.ascend)
            }
            HistoryQuery::Daily(q) => {
                let bars = self.daily_for(&q.ticker)?.to_vec();
                finish(bars, Some(q.num_days as usize), q.ascend)
            }
            HistoryQuery::DailyForDates(q) => {
                let bars: Vec<_> = self
                    .daily_for(&q.ticker)?
                    .iter()
                    .filter(|b| {
                        let day = b.timestamp.date_naive();
                        day >= q.bgn_dt && day <= q.end_dt
                    })
                    .cloned()
                    .collect();
                finish(bars, q.max_days, q.ascend)
            }
            HistoryQuery::Weekly(q) => {
                let daily = self.daily_for(&q.ticker)?;
                let weeks = aggregate(daily, |d| {
                    let week = d.iso_week();
                    (week.year(), week.week())
                });
                finish(weeks, Some(q.num_weeks as usize), q.ascend)
            }
            HistoryQuery::Monthly(q) => {
                let daily = self.daily_for(&q.ticker)?;
                let months = aggregate(daily, |d| (d.year(), d.month()));
                finish(months, Some(q.num_months as usize), q.ascend)
            }
        };
        Ok(rows)
    }
}

fn unavailable(ticker: &str, reason: &str) -> SourceError {
    SourceError::Unavailable {
        ticker: ticker.to_string(),
        reason: reason.to_string(),
    }
}

/// Keep the newest `max` rows, then order as requested.
fn finish<R>(mut rows: Vec<R>, max: Option<usize>, ascend: bool) -> Vec<MarketRecord>
where
    R: Into<MarketRecord>,
{
    if let Some(max) = max {
        if rows.len() > max {
            rows.drain(..rows.len() - max);
        }
    }
    if !ascend {
        rows.reverse();
    }
    rows.into_iter().map(Into::into).collect()
}

/// Rows on the latest `num_days` distinct dates present.
fn last_days<R: Timestamped + Clone>(rows: &[R], num_days: u32) -> Vec<R> {
    let dates: BTreeSet<NaiveDate> = rows.iter().map(|r| r.timestamp().date_naive()).collect();
    let Some(first) = dates.iter().rev().take(num_days as usize).last().copied() else {
        return Vec::new();
    };
    rows.iter()
        .filter(|r| r.timestamp().date_naive() >= first)
        .cloned()
        .collect()
}

/// Rows whose time of day lies within `[bgn, end]`; an absent bound is open.
fn within_hours<R: Timestamped>(
    rows: Vec<R>,
    bgn: Option<NaiveTime>,
    end: Option<NaiveTime>,
) -> Vec<R> {
    rows.into_iter()
        .filter(|r| {
            let time = r.timestamp().time();
            bgn.map_or(true, |b| time >= b) && end.map_or(true, |e| time <= e)
        })
        .collect()
}

/// Roll daily bars into one bar per period key, stamped at the period's last day.
fn aggregate<K, F>(daily: &[BarRecord], key: F) -> Vec<BarRecord>
where
    K: PartialEq,
    F: Fn(NaiveDate) -> K,
{
    let mut out: Vec<BarRecord> = Vec::new();
    let mut current: Option<K> = None;
    for bar in daily {
        let k = key(bar.timestamp.date_naive());
        match out.last_mut() {
            Some(agg) if current.as_ref() == Some(&k) => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.period_volume += bar.period_volume;
                agg.total_volume = bar.total_volume;
                agg.trade_count += bar.trade_count;
                agg.timestamp = bar.timestamp;
            }
            _ => {
                out.push(bar.clone());
                current = Some(k);
            }
        }
    }
    out
}
