//! Derived, disposable read views.
//!
//! Each view is rebuilt from scratch from the document store and published
//! wholesale into a [`ViewSlot`]; readers only ever see complete values. The
//! dispatcher's generation number travels with every rebuild, and a slot
//! refuses anything older than what it already holds.

pub mod counts;
pub mod low_stock;
pub mod orders;
pub mod pending;

use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use stockflow_core::ProductId;
use stockflow_events::Collection;
use stockflow_purchasing::PendingQuantityIndex;

use crate::dispatcher::{ChangeFeedDispatcher, SyncHealth};
use crate::error::EngineError;
use crate::store::DocumentStore;

pub use counts::{DashboardCounts, DashboardCountsView};
pub use low_stock::{LowStockRow, LowStockView};
pub use orders::{OrderListView, OrderRow};
pub use pending::PendingIndexView;

pub const PENDING_INDEX: &str = "pending_index";
pub const LOW_STOCK_ALERTS: &str = "low_stock_alerts";
pub const DASHBOARD_COUNTS: &str = "dashboard_counts";
pub const ORDER_LIST: &str = "order_list";

#[derive(Debug)]
struct Published<T> {
    generation: u64,
    value: Arc<T>,
}

/// Latest published value of one view.
#[derive(Debug)]
pub struct ViewSlot<T> {
    inner: RwLock<Published<T>>,
}

impl<T> ViewSlot<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: RwLock::new(Published {
                generation: 0,
                value: Arc::new(initial),
            }),
        }
    }

    /// Replace the value if `generation` is newer than the current one.
    /// Returns whether the value was published.
    pub fn publish(&self, generation: u64, value: T) -> bool {
        let mut slot = match self.inner.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if generation <= slot.generation {
            return false;
        }
        *slot = Published {
            generation,
            value: Arc::new(value),
        };
        true
    }

    pub fn current(&self) -> Arc<T> {
        match self.inner.read() {
            Ok(slot) => slot.value.clone(),
            Err(poisoned) => poisoned.into_inner().value.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        match self.inner.read() {
            Ok(slot) => slot.generation,
            Err(poisoned) => poisoned.into_inner().generation,
        }
    }
}

impl<T: Default> Default for ViewSlot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Every view the engine maintains.
#[derive(Debug, Default)]
pub struct EngineViews {
    pub pending: ViewSlot<PendingQuantityIndex>,
    pub orders: ViewSlot<Vec<OrderRow>>,
    pub low_stock: ViewSlot<Vec<LowStockRow>>,
    pub counts: ViewSlot<DashboardCounts>,
}

impl EngineViews {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Wire the standard views into `dispatcher`.
pub fn register_views<S>(
    dispatcher: &mut ChangeFeedDispatcher<S>,
    store: Arc<S>,
    views: Arc<EngineViews>,
) where
    S: DocumentStore + 'static,
{
    dispatcher
        .register(
            PENDING_INDEX,
            [Collection::Orders],
            Arc::new(PendingIndexView::new(store.clone(), views.clone())),
        )
        .register(
            LOW_STOCK_ALERTS,
            [Collection::Orders, Collection::Inventory],
            Arc::new(LowStockView::new(store.clone(), views.clone())),
        )
        .register(
            DASHBOARD_COUNTS,
            [Collection::Orders, Collection::Inventory],
            Arc::new(DashboardCountsView::new(store.clone(), views.clone())),
        )
        .register(
            ORDER_LIST,
            [Collection::Orders],
            Arc::new(OrderListView::new(store, views)),
        );
}

/// Read-only access to the published views.
#[derive(Debug, Clone)]
pub struct ProjectionReader {
    views: Arc<EngineViews>,
    health: watch::Receiver<SyncHealth>,
}

impl ProjectionReader {
    pub fn new(views: Arc<EngineViews>, health: watch::Receiver<SyncHealth>) -> Self {
        Self { views, health }
    }

    pub fn orders(&self) -> Arc<Vec<OrderRow>> {
        self.views.orders.current()
    }

    pub fn low_stock(&self) -> Arc<Vec<LowStockRow>> {
        self.views.low_stock.current()
    }

    pub fn counts(&self) -> Arc<DashboardCounts> {
        self.views.counts.current()
    }

    pub fn pending_index(&self) -> Arc<PendingQuantityIndex> {
        self.views.pending.current()
    }

    pub fn pending_qty(&self, product_id: &ProductId) -> i64 {
        self.views.pending.current().pending_qty(product_id)
    }

    pub fn sync_health(&self) -> SyncHealth {
        self.health.borrow().clone()
    }

    /// `Some(SyncDegraded)` while views are being polled instead of fed live.
    pub fn sync_warning(&self) -> Option<EngineError> {
        self.health.borrow().warning()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn older_generations_are_refused() {
        let slot = ViewSlot::new(0u32);
        assert!(slot.publish(2, 20));
        assert!(!slot.publish(1, 10));
        assert!(!slot.publish(2, 21));
        assert_eq!(*slot.current(), 20);
        assert_eq!(slot.generation(), 2);
    }

    #[test]
    fn readers_keep_their_snapshot_across_publishes() {
        let slot = ViewSlot::new(vec![1]);
        let before = slot.current();
        slot.publish(1, vec![1, 2]);
        assert_eq!(*before, vec![1]);
        assert_eq!(*slot.current(), vec![1, 2]);
    }
}
