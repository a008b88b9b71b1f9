//! Orders and their incremental-fill state.

use super::fill::Fill;
use super::ids::OrderUid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order lifecycle. `Fulfilled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Fulfilled,
}

#[derive(Debug, Error, PartialEq)]
pub enum OrderError {
    #[error("order quantity must be positive and finite, got {0}")]
    InvalidQuantity(f64),

    #[error("order {0} is already fulfilled")]
    AlreadyFulfilled(OrderUid),
}

/// A unit of trading intent.
///
/// Created pending with nothing filled. Fills are append-only and only the
/// matching engine applies them. Once `filled_quantity == requested_quantity`
/// the order carries a `fulfill_time` and rejects any further fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    uid: OrderUid,
    symbol: String,
    side: OrderSide,
    requested_quantity: f64,
    filled_quantity: f64,
    weighted_avg_price: f64,
    fulfill_time: Option<DateTime<Utc>>,
    fills: Vec<Fill>,
}

impl Order {
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
    ) -> Result<Self, OrderError> {
        Self::with_uid(OrderUid::new(), symbol, side, quantity)
    }

    pub fn with_uid(
        uid: OrderUid,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
    ) -> Result<Self, OrderError> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(OrderError::InvalidQuantity(quantity));
        }
        Ok(Self {
            uid,
            symbol: symbol.into(),
            side,
            requested_quantity: quantity,
            filled_quantity: 0.0,
            weighted_avg_price: 0.0,
            fulfill_time: None,
            fills: Vec::new(),
        })
    }

    pub fn uid(&self) -> OrderUid {
        self.uid
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn requested_quantity(&self) -> f64 {
        self.requested_quantity
    }

    pub fn filled_quantity(&self) -> f64 {
        self.filled_quantity
    }

    pub fn remaining_quantity(&self) -> f64 {
        self.requested_quantity - self.filled_quantity
    }

    /// Quantity-weighted average of all fill prices so far (0.0 before any fill).
    pub fn weighted_avg_price(&self) -> f64 {
        self.weighted_avg_price
    }

    pub fn fulfill_time(&self) -> Option<DateTime<Utc>> {
        self.fulfill_time
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn status(&self) -> OrderStatus {
        if self.fulfill_time.is_some() {
            OrderStatus::Fulfilled
        } else {
            OrderStatus::Pending
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        self.fulfill_time.is_some()
    }

    /// Total traded value: filled quantity times average price.
    pub fn cost(&self) -> f64 {
        self.filled_quantity * self.weighted_avg_price
    }

    /// Price of the most recent fill, if any.
    pub fn last_fill_price(&self) -> Option<f64> {
        self.fills.last().map(|f| f.price)
    }

    /// Apply up to `quantity` at `price`, capped at the remaining quantity.
    ///
    /// Returns the quantity actually applied. Non-positive or NaN quantities and
    /// non-finite prices apply nothing. When the fill completes the order,
    /// `fulfill_time` is set to `timestamp`.
    pub(crate) fn add_fill(
        &mut self,
        quantity: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<f64, OrderError> {
        if self.is_fulfilled() {
            return Err(OrderError::AlreadyFulfilled(self.uid));
        }
        if quantity.is_nan() || quantity <= 0.0 || !price.is_finite() {
            return Ok(0.0);
        }

        let remaining = self.remaining_quantity();
        let (applied, new_filled) = if quantity >= remaining {
            // Snap to the requested quantity so float error can never overshoot it.
            (remaining, self.requested_quantity)
        } else {
            (quantity, self.filled_quantity + quantity)
        };

        self.weighted_avg_price =
            (self.weighted_avg_price * self.filled_quantity + price * applied) / new_filled;
        self.filled_quantity = new_filled;
        self.fills.push(Fill {
            timestamp,
            quantity: applied,
            price,
        });

        if self.filled_quantity == self.requested_quantity {
            self.fulfill_time = Some(timestamp);
        }
        Ok(applied)
    }
}
