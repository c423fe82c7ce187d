use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use stockflow_core::ProductId;
use stockflow_inventory::{InventoryItem, evaluate};
use stockflow_purchasing::{PendingQuantityIndex, recompute};

use crate::dispatcher::{ViewHandler, ViewTrigger};
use crate::error::EngineError;
use crate::store::DocumentStore;
use crate::views::EngineViews;

/// One item on the low / out-of-stock alert list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockRow {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: i64,
    pub min_quantity: i64,
    pub pending_quantity: i64,
    pub out_of_stock: bool,
    pub low: bool,
    pub suggested_reorder: i64,
    pub supplier: String,
    pub location: String,
}

/// Alert rows for every item that is out of stock or low after counting
/// in-flight orders; out-of-stock first, then by name.
pub fn low_stock_rows(items: &[InventoryItem], pending: &PendingQuantityIndex) -> Vec<LowStockRow> {
    let mut rows: Vec<LowStockRow> = items
        .iter()
        .filter_map(|item| {
            let assessment = evaluate(item, pending.pending_qty(&item.id));
            assessment.needs_attention().then(|| LowStockRow {
                product_id: item.id,
                name: item.name.clone(),
                quantity: item.quantity,
                min_quantity: item.min_quantity,
                pending_quantity: assessment.pending_quantity,
                out_of_stock: assessment.out_of_stock,
                low: assessment.low,
                suggested_reorder: assessment.suggested_reorder,
                supplier: item.supplier.clone(),
                location: item.location.clone(),
            })
        })
        .collect();

    rows.sort_by(|a, b| {
        b.out_of_stock
            .cmp(&a.out_of_stock)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    rows
}

pub struct LowStockView<S> {
    store: Arc<S>,
    views: Arc<EngineViews>,
}

impl<S> LowStockView<S> {
    pub fn new(store: Arc<S>, views: Arc<EngineViews>) -> Self {
        Self { store, views }
    }
}

#[async_trait]
impl<S: DocumentStore> ViewHandler for LowStockView<S> {
    async fn refresh(&self, trigger: ViewTrigger) -> Result<(), EngineError> {
        // Index and items come from the same pass so they agree with each other.
        let orders = self.store.list_orders().await?;
        let items = self.store.list_items().await?;
        let rows = low_stock_rows(&items, &recompute(&orders));
        let alerts = rows.len();
        if self.views.low_stock.publish(trigger.generation, rows) {
            debug!(generation = trigger.generation, alerts, "low stock alerts published");
        }
        Ok(())
    }
}
