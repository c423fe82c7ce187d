use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use stockflow_purchasing::Order;

use crate::dispatcher::{ViewHandler, ViewTrigger};
use crate::error::EngineError;
use crate::store::DocumentStore;
use crate::views::EngineViews;

/// Order as listed on screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRow {
    #[serde(flatten)]
    pub order: Order,
    pub status_label: &'static str,
}

impl From<Order> for OrderRow {
    fn from(order: Order) -> Self {
        let status_label = order.status.label();
        Self {
            order,
            status_label,
        }
    }
}

/// Newest-first list of every order.
pub struct OrderListView<S> {
    store: Arc<S>,
    views: Arc<EngineViews>,
}

impl<S> OrderListView<S> {
    pub fn new(store: Arc<S>, views: Arc<EngineViews>) -> Self {
        Self { store, views }
    }
}

#[async_trait]
impl<S: DocumentStore> ViewHandler for OrderListView<S> {
    async fn refresh(&self, trigger: ViewTrigger) -> Result<(), EngineError> {
        let mut orders = self.store.list_orders().await?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let rows = orders.into_iter().map(OrderRow::from).collect();
        self.views.orders.publish(trigger.generation, rows);
        Ok(())
    }
}
