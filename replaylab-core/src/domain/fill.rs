use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One incremental application of quantity and price toward an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub timestamp: DateTime<Utc>,
    pub quantity: f64,
    pub price: f64,
}
