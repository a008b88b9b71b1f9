//! Order matching against replayed or live market records.
//!
//! - [`fill_rule`]: which size and price a record offers to a given side.
//! - [`MatchingEngine`]: the pending set, fill application and fulfilment.
//! - [`SubmissionGuard`]: an optional pre-trade check consulted by `submit`.

pub mod engine;
pub mod fill_rule;

pub use engine::MatchingEngine;
pub use fill_rule::{bar_liquidity, tick_liquidity, Liquidity};

use crate::domain::{Order, OrderError, OrderUid};
use thiserror::Error;

/// Why a submission was refused. Always returned to the submitter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrderViolation {
    #[error("order {0} is already pending")]
    DuplicateOrder(OrderUid),

    #[error("order {0} is already fulfilled")]
    AlreadyFulfilled(OrderUid),

    /// `held` is the position net of pending sells on the symbol.
    #[error("sell of {requested} {symbol} exceeds held quantity {held}")]
    InsufficientPosition {
        symbol: String,
        requested: f64,
        held: f64,
    },

    /// `available` is capital net of the cost committed to pending buys.
    #[error("buy cost {required:.2} exceeds available capital {available:.2}")]
    InsufficientCapital { required: f64, available: f64 },

    #[error("no price known for {0}, buy cost cannot be checked")]
    UnpricedBuy(String),

    #[error("invalid order quantity {0}")]
    InvalidQuantity(f64),
}

impl From<OrderError> for OrderViolation {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::InvalidQuantity(q) => OrderViolation::InvalidQuantity(q),
            OrderError::AlreadyFulfilled(uid) => OrderViolation::AlreadyFulfilled(uid),
        }
    }
}

/// Pre-trade check run before an order joins the pending set.
///
/// Called with the engine's pending lock held; `pending` is the set the order
/// would join. Implementations must not call back into the engine.
pub trait SubmissionGuard: Send + Sync {
    fn check(&self, order: &Order, pending: &[Order]) -> Result<(), OrderViolation>;
}
