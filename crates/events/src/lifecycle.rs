use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{OrderId, ProductId};

use crate::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    OrderCreated,
    OrderStatusChanged,
    InventoryReconciled,
    OrderDeleted,
}

/// Structured event handed to the activity-logging collaborator.
///
/// Every event carries the order and product it concerns plus a human-readable
/// detail string; nothing else is promised to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        kind: LifecycleEventKind,
        order_id: OrderId,
        product_id: ProductId,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            order_id,
            product_id,
            detail: detail.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn order_created(
        order_id: OrderId,
        product_id: ProductId,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(LifecycleEventKind::OrderCreated, order_id, product_id, detail)
    }

    pub fn status_changed(
        order_id: OrderId,
        product_id: ProductId,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(LifecycleEventKind::OrderStatusChanged, order_id, product_id, detail)
    }

    pub fn inventory_reconciled(
        order_id: OrderId,
        product_id: ProductId,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(LifecycleEventKind::InventoryReconciled, order_id, product_id, detail)
    }

    pub fn order_deleted(
        order_id: OrderId,
        product_id: ProductId,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(LifecycleEventKind::OrderDeleted, order_id, product_id, detail)
    }
}

impl Event for LifecycleEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            LifecycleEventKind::OrderCreated => "order_created",
            LifecycleEventKind::OrderStatusChanged => "order_status_changed",
            LifecycleEventKind::InventoryReconciled => "inventory_reconciled",
            LifecycleEventKind::OrderDeleted => "order_deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
