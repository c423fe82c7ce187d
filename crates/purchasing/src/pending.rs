//! In-flight (ordered but not yet received) quantity per product.
//!
//! The index is always rebuilt from the full order set and handed out as a new
//! value; nothing updates an existing index in place.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use stockflow_core::ProductId;

use crate::Order;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuantityIndex {
    by_product: HashMap<ProductId, i64>,
    computed_at: DateTime<Utc>,
}

impl PendingQuantityIndex {
    pub fn empty() -> Self {
        Self {
            by_product: HashMap::new(),
            computed_at: Utc::now(),
        }
    }

    /// Outstanding quantity for a product; 0 when nothing is in flight.
    pub fn pending_qty(&self, product_id: &ProductId) -> i64 {
        self.by_product.get(product_id).copied().unwrap_or(0)
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    pub fn len(&self) -> usize {
        self.by_product.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_product.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProductId, &i64)> {
        self.by_product.iter()
    }
}

impl Default for PendingQuantityIndex {
    fn default() -> Self {
        Self::empty()
    }
}

/// Full scan over `orders`, summing `quantity_remaining` of every open order.
pub fn recompute<'a>(orders: impl IntoIterator<Item = &'a Order>) -> PendingQuantityIndex {
    let mut by_product: HashMap<ProductId, i64> = HashMap::new();
    for order in orders {
        if !order.status.is_open() || order.quantity_remaining <= 0 {
            continue;
        }
        let total = by_product.entry(order.product_id).or_insert(0);
        *total = total.saturating_add(order.quantity_remaining);
    }

    PendingQuantityIndex {
        by_product,
        computed_at: Utc::now(),
    }
}

pub fn pending_qty(index: &PendingQuantityIndex, product_id: &ProductId) -> i64 {
    index.pending_qty(product_id)
}
