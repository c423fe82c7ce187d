use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, ProductId};

/// Inventory item document, keyed by product.
///
/// Created and edited (name, location, thresholds, supplier) by the product
/// collaborator. The engine only changes `quantity`, `cost` and
/// `last_cost_update`, and only through [`InventoryItem::receive`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: ProductId,
    pub name: String,
    pub quantity: i64,
    pub min_quantity: i64,
    #[serde(default)]
    pub reorder_quantity: i64,
    pub cost: Decimal,
    #[serde(default)]
    pub supplier: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub last_cost_update: Option<DateTime<Utc>>,
}

impl InventoryItem {
    /// Minimal item with zero stock and no threshold.
    pub fn new(id: ProductId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            quantity: 0,
            min_quantity: 0,
            reorder_quantity: 0,
            cost: Decimal::ZERO,
            supplier: String::new(),
            location: String::new(),
            last_cost_update: None,
        }
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_min_quantity(mut self, min_quantity: i64) -> Self {
        self.min_quantity = min_quantity;
        self
    }

    pub fn with_cost(mut self, cost: Decimal) -> Self {
        self.cost = cost;
        self
    }

    /// Check the document-level invariants.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("item name cannot be empty"));
        }
        if self.quantity < 0 {
            return Err(DomainError::invariant("item quantity cannot be negative"));
        }
        if self.min_quantity < 0 {
            return Err(DomainError::validation("min quantity cannot be negative"));
        }
        if self.reorder_quantity < 0 {
            return Err(DomainError::validation("reorder quantity cannot be negative"));
        }
        if self.cost < Decimal::ZERO {
            return Err(DomainError::validation("item cost cannot be negative"));
        }
        Ok(())
    }

    /// Apply a receipt of `received` units bought at `unit_cost`.
    ///
    /// Returns the updated document; `self` is left untouched so a failed
    /// commit has nothing to roll back. A zero unit cost keeps the current
    /// cost (free replacement stock must not wipe the known price).
    pub fn receive(
        &self,
        received: i64,
        unit_cost: Decimal,
        at: DateTime<Utc>,
    ) -> DomainResult<InventoryItem> {
        if received <= 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }

        let quantity = self
            .quantity
            .checked_add(received)
            .ok_or_else(|| DomainError::validation("received quantity overflows stock level"))?;

        let mut next = self.clone();
        next.quantity = quantity;
        if unit_cost > Decimal::ZERO {
            next.cost = unit_cost;
            next.last_cost_update = Some(at);
        }
        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn item() -> InventoryItem {
        InventoryItem::new(ProductId::new(), "Widget")
            .with_quantity(5)
            .with_min_quantity(3)
            .with_cost(Decimal::new(250, 2))
    }

    #[test]
    fn receive_adds_quantity_and_updates_cost() {
        let at = Utc::now();
        let next = item().receive(4, Decimal::new(300, 2), at).unwrap();

        assert_eq!(next.quantity, 9);
        assert_eq!(next.cost, Decimal::new(300, 2));
        assert_eq!(next.last_cost_update, Some(at));
    }

    #[test]
    fn receive_refuses_to_produce_an_invalid_document() {
        let corrupt = item().with_quantity(-10);
        let err = corrupt.receive(2, Decimal::ONE, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn receive_at_zero_cost_keeps_previous_cost() {
        let original = item();
        let next = original.receive(1, Decimal::ZERO, Utc::now()).unwrap();

        assert_eq!(next.quantity, 6);
        assert_eq!(next.cost, original.cost);
        assert_eq!(next.last_cost_update, None);
    }

    #[test]
    fn receive_rejects_non_positive_quantities() {
        assert!(matches!(
            item().receive(0, Decimal::ONE, Utc::now()),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            item().receive(-2, Decimal::ONE, Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn receive_rejects_overflow() {
        let full = item().with_quantity(i64::MAX);
        assert!(full.receive(1, Decimal::ONE, Utc::now()).is_err());
    }

    #[test]
    fn validate_rejects_negative_stock() {
        let bad = item().with_quantity(-1);
        assert!(matches!(bad.validate(), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(item()).unwrap();
        assert!(json.get("minQuantity").is_some());
        assert!(json.get("lastCostUpdate").is_some());
    }
}
