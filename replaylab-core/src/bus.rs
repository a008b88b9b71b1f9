//! In-process publish/subscribe bus.
//!
//! Handlers run synchronously on the publishing thread, in subscription order.
//! The handler list is copied before dispatch, so a handler may publish,
//! subscribe or unsubscribe without deadlocking.

use crate::domain::{BarRecord, MarketRecord, Order, OrderUid, TickRecord};
use crate::merge::{Snapshot, SourceFault};
use crate::portfolio::PortfolioSnapshot;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Every message that travels on the bus, serialized as `{"type", "data"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    OrderRequest(Order),
    OrderFulfilled(Order),
    OrderRejected { uid: OrderUid, reason: String },
    /// The engine fulfilled `uid` but the portfolio refused to record it.
    PortfolioRejected { uid: OrderUid, reason: String },
    Bar(BarRecord),
    #[serde(rename = "level_1_tick")]
    Level1Tick(TickRecord),
    Snapshot(Snapshot<MarketRecord>),
    /// Ask data providers to stream level-1 updates for `symbol`.
    WatchTicks { symbol: String },
    PortfolioUpdate(PortfolioSnapshot),
    PortfolioValueUpdate(PortfolioSnapshot),
    SourceFault(SourceFault),
}

impl Event {
    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::OrderRequest(_) => "order_request",
            Event::OrderFulfilled(_) => "order_fulfilled",
            Event::OrderRejected { .. } => "order_rejected",
            Event::PortfolioRejected { .. } => "portfolio_rejected",
            Event::Bar(_) => "bar",
            Event::Level1Tick(_) => "level_1_tick",
            Event::Snapshot(_) => "snapshot",
            Event::WatchTicks { .. } => "watch_ticks",
            Event::PortfolioUpdate(_) => "portfolio_update",
            Event::PortfolioValueUpdate(_) => "portfolio_value_update",
            Event::SourceFault(_) => "source_fault",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Inner {
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

/// Cloneable handle; all clones share one subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    pub fn publish(&self, event: Event) {
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kind = event.kind(), subscribers = handlers.len(), "publish");
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Total events published through any clone of this handle.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published_count())
            .finish()
    }
}
