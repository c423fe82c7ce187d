//! Low-stock evaluation (pure functions of an item and its pending quantity).
//!
//! Items with `min_quantity == 0` are never flagged low, whatever their stock
//! level. They can still be out of stock.

use serde::{Deserialize, Serialize};

use crate::InventoryItem;

/// Stock position of one item once in-flight orders are taken into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAssessment {
    pub out_of_stock: bool,
    pub low: bool,
    pub pending_quantity: i64,
    pub suggested_reorder: i64,
}

impl StockAssessment {
    /// Whether the item belongs on the low/out-of-stock alert list.
    pub fn needs_attention(&self) -> bool {
        self.low || self.out_of_stock
    }
}

pub fn is_out_of_stock(item: &InventoryItem) -> bool {
    item.quantity == 0
}

pub fn is_low(item: &InventoryItem, pending_qty: i64) -> bool {
    item.min_quantity > 0
        && item.quantity <= item.min_quantity
        && item.quantity.saturating_add(pending_qty) <= item.min_quantity
}

/// `max(1, min_quantity - (quantity + pending))`.
pub fn suggested_reorder_quantity(item: &InventoryItem, pending_qty: i64) -> i64 {
    let projected = item.quantity.saturating_add(pending_qty);
    item.min_quantity.saturating_sub(projected).max(1)
}

pub fn evaluate(item: &InventoryItem, pending_qty: i64) -> StockAssessment {
    StockAssessment {
        out_of_stock: is_out_of_stock(item),
        low: is_low(item, pending_qty),
        pending_quantity: pending_qty,
        suggested_reorder: suggested_reorder_quantity(item, pending_qty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockflow_core::ProductId;

    fn item(quantity: i64, min_quantity: i64) -> InventoryItem {
        InventoryItem::new(ProductId::new(), "Bolt")
            .with_quantity(quantity)
            .with_min_quantity(min_quantity)
    }

    #[test]
    fn pending_order_covering_the_gap_is_not_low() {
        let it = item(2, 5);
        assert!(!is_low(&it, 5));
        assert!(!is_out_of_stock(&it));
    }

    #[test]
    fn empty_item_without_pending_is_low_and_out() {
        let it = item(0, 5);
        assert!(is_low(&it, 0));
        assert!(is_out_of_stock(&it));
        assert_eq!(suggested_reorder_quantity(&it, 0), 5);
    }

    #[test]
    fn zero_threshold_is_never_low() {
        let it = item(0, 0);
        let a = evaluate(&it, 0);
        assert!(!a.low);
        assert!(a.out_of_stock);
        assert!(a.needs_attention());
        assert_eq!(a.suggested_reorder, 1);
    }

    #[test]
    fn stock_above_threshold_is_not_low_even_without_pending() {
        assert!(!is_low(&item(6, 5), 0));
    }

    #[test]
    fn at_threshold_counts_as_low() {
        assert!(is_low(&item(5, 5), 0));
    }

    #[test]
    fn partial_pending_still_low_and_suggests_the_remaining_gap() {
        let it = item(1, 10);
        assert!(is_low(&it, 4));
        assert_eq!(suggested_reorder_quantity(&it, 4), 5);
    }

    proptest! {
        #[test]
        fn suggestion_is_always_at_least_one(
            quantity in 0i64..10_000,
            min_quantity in 0i64..10_000,
            pending in 0i64..10_000,
        ) {
            let it = item(quantity, min_quantity);
            prop_assert!(suggested_reorder_quantity(&it, pending) >= 1);
        }

        #[test]
        fn low_implies_threshold_not_covered(
            quantity in 0i64..10_000,
            min_quantity in 0i64..10_000,
            pending in 0i64..10_000,
        ) {
            let it = item(quantity, min_quantity);
            if is_low(&it, pending) {
                prop_assert!(min_quantity > 0);
                prop_assert!(quantity + pending <= min_quantity);
                prop_assert_eq!(
                    suggested_reorder_quantity(&it, pending),
                    (min_quantity - quantity - pending).max(1)
                );
            }
        }
    }
}
