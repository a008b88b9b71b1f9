//! Domain types for replaylab

pub mod fill;
pub mod ids;
pub mod order;
pub mod record;

pub use fill::Fill;
pub use ids::{OrderUid, PortfolioId};
pub use order::{Order, OrderError, OrderSide, OrderStatus};
pub use record::{Batch, BarRecord, MarketRecord, TickRecord, Timestamped};
