//! Historical data requests.
//!
//! [`HistoryQuery`] names every request shape a history backend understands.
//! [`HistoryProvider`] is the narrow seam a vendor adapter or cache implements;
//! [`QueryFeed`] turns a provider and a query list into a synchronous feed.

pub mod memory;
pub mod provider;
pub mod query;

pub use memory::InMemoryHistory;
pub use provider::{HistoryProvider, QueryFeed};
pub use query::{
    Bars, BarsForDays, BarsInPeriod, Daily, DailyForDates, HistoryQuery, IntervalType, Monthly,
    QueryShape, Ticks, TicksForDays, TicksInPeriod, Weekly,
};
