use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use stockflow_inventory::{InventoryItem, evaluate};
use stockflow_purchasing::{Order, OrderStatus, recompute};

use crate::dispatcher::{ViewHandler, ViewTrigger};
use crate::error::EngineError;
use crate::store::DocumentStore;
use crate::views::EngineViews;

/// Dashboard summary numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub total_orders: usize,
    /// Orders still in `pending`.
    pub pending_orders: usize,
    /// Orders that still expect stock (any non-terminal status).
    pub open_orders: usize,
    pub by_status: BTreeMap<OrderStatus, usize>,
    pub inventory_items: usize,
    pub low_stock_items: usize,
    pub out_of_stock_items: usize,
    pub computed_at: Option<DateTime<Utc>>,
}

impl DashboardCounts {
    pub fn compute(orders: &[Order], items: &[InventoryItem]) -> Self {
        let mut by_status = BTreeMap::new();
        for order in orders {
            *by_status.entry(order.status).or_insert(0) += 1;
        }

        let pending = recompute(orders);
        let (mut low, mut out) = (0, 0);
        for item in items {
            let assessment = evaluate(item, pending.pending_qty(&item.id));
            low += usize::from(assessment.low);
            out += usize::from(assessment.out_of_stock);
        }

        Self {
            total_orders: orders.len(),
            pending_orders: by_status.get(&OrderStatus::Pending).copied().unwrap_or(0),
            open_orders: orders.iter().filter(|o| o.status.is_open()).count(),
            by_status,
            inventory_items: items.len(),
            low_stock_items: low,
            out_of_stock_items: out,
            computed_at: Some(Utc::now()),
        }
    }
}

pub struct DashboardCountsView<S> {
    store: Arc<S>,
    views: Arc<EngineViews>,
}

impl<S> DashboardCountsView<S> {
    pub fn new(store: Arc<S>, views: Arc<EngineViews>) -> Self {
        Self { store, views }
    }
}

#[async_trait]
impl<S: DocumentStore> ViewHandler for DashboardCountsView<S> {
    async fn refresh(&self, trigger: ViewTrigger) -> Result<(), EngineError> {
        let orders = self.store.list_orders().await?;
        let items = self.store.list_items().await?;
        self.views
            .counts
            .publish(trigger.generation, DashboardCounts::compute(&orders, &items));
        Ok(())
    }
}
