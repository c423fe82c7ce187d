use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, OrderId, ProductId};

/// Purchase order status lifecycle.
///
/// `Received` and `Fulfilled` are both terminal successes; `Fulfilled` means the
/// order was closed without expecting anything further. `Cancelled` is the
/// terminal failure. `Backordered` and `PartiallyReceived` are distinct states:
/// a backordered order has received nothing, a partially received one has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Ordered,
    Backordered,
    PartiallyReceived,
    Received,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Ordered,
        OrderStatus::Backordered,
        OrderStatus::PartiallyReceived,
        OrderStatus::Received,
        OrderStatus::Fulfilled,
        OrderStatus::Cancelled,
    ];

    /// Statuses reachable from `self`.
    pub fn allowed_targets(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Ordered, Backordered, Cancelled],
            Ordered => &[PartiallyReceived, Received, Fulfilled, Backordered, Cancelled],
            Backordered => &[PartiallyReceived, Received, Fulfilled, Cancelled],
            PartiallyReceived => &[PartiallyReceived, Received, Fulfilled, Cancelled],
            Received | Fulfilled | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Received | OrderStatus::Fulfilled | OrderStatus::Cancelled
        )
    }

    /// Statuses whose remaining quantity counts as in flight.
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// Statuses that move stock into inventory.
    pub fn is_receipt(self) -> bool {
        matches!(
            self,
            OrderStatus::PartiallyReceived | OrderStatus::Received | OrderStatus::Fulfilled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ordered => "ordered",
            OrderStatus::Backordered => "backordered",
            OrderStatus::PartiallyReceived => "partially_received",
            OrderStatus::Received => "received",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Human-readable label for order lists.
    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Ordered => "Ordered",
            OrderStatus::Backordered => "Backordered",
            OrderStatus::PartiallyReceived => "Partially Received",
            OrderStatus::Received => "Received",
            OrderStatus::Fulfilled => "Fulfilled",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalizes the status vocabulary found in stored documents and callers.
///
/// Case, surrounding whitespace, spaces and hyphens are ignored. Legacy
/// aliases map onto the canonical enum; `backordered` and
/// `partially_received` never alias each other.
impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let status = match normalized.as_str() {
            "pending" | "new" | "open" | "draft" => OrderStatus::Pending,
            "ordered" | "placed" | "submitted" | "sent" => OrderStatus::Ordered,
            "backordered" | "back_ordered" | "backorder" => OrderStatus::Backordered,
            "partially_received" | "partial" | "partially_delivered" => {
                OrderStatus::PartiallyReceived
            }
            "received" | "complete" | "completed" | "delivered" => OrderStatus::Received,
            "fulfilled" | "closed" => OrderStatus::Fulfilled,
            "cancelled" | "canceled" => OrderStatus::Cancelled,
            _ => {
                return Err(DomainError::validation(format!(
                    "unknown order status '{s}'"
                )));
            }
        };
        Ok(status)
    }
}

/// Input for a new order, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub cost: Decimal,
    /// Overrides `quantity * cost` when the supplier quotes a different total.
    #[serde(default)]
    pub total_cost: Option<Decimal>,
    pub supplier: String,
}

impl OrderDraft {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: i64,
        cost: Decimal,
        supplier: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            cost,
            total_cost: None,
            supplier: supplier.into(),
        }
    }

    pub fn with_total_cost(mut self, total_cost: Decimal) -> Self {
        self.total_cost = Some(total_cost);
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if self.cost < Decimal::ZERO {
            return Err(DomainError::validation("cost cannot be negative"));
        }
        if let Some(total) = self.total_cost {
            if total < Decimal::ZERO {
                return Err(DomainError::validation("total cost cannot be negative"));
            }
        }
        Ok(())
    }

    /// Materialize the draft as a `pending` order with nothing received.
    pub fn into_order(self, id: OrderId, at: DateTime<Utc>) -> DomainResult<Order> {
        self.validate()?;
        let total_cost = self
            .total_cost
            .unwrap_or_else(|| self.cost * Decimal::from(self.quantity));

        Ok(Order {
            id,
            product_id: self.product_id,
            product_name: self.product_name,
            quantity: self.quantity,
            cost: self.cost,
            total_cost,
            supplier: self.supplier,
            status: OrderStatus::Pending,
            quantity_received: 0,
            quantity_remaining: self.quantity,
            cancelled_quantity: 0,
            created_at: at,
            last_updated: at,
        })
    }
}

/// Purchase order document.
///
/// Invariants (checked by [`Order::check_invariants`]):
/// - `quantity_received + quantity_remaining == quantity`
/// - terminal status ⇒ `quantity_remaining == 0`
///
/// Cancelling shrinks `quantity` to what was actually received and keeps the
/// abandoned amount in `cancelled_quantity`. A cancelled order that received
/// nothing therefore has `quantity == 0`; `total_cost` keeps the value of the
/// original order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub cost: Decimal,
    pub total_cost: Decimal,
    pub supplier: String,
    pub status: OrderStatus,
    pub quantity_received: i64,
    pub quantity_remaining: i64,
    #[serde(default)]
    pub cancelled_quantity: i64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Order {
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.quantity_received < 0 || self.quantity_remaining < 0 {
            return Err(DomainError::invariant("order quantities cannot be negative"));
        }
        if self.quantity_received + self.quantity_remaining != self.quantity {
            return Err(DomainError::invariant(format!(
                "received ({}) + remaining ({}) != quantity ({})",
                self.quantity_received, self.quantity_remaining, self.quantity
            )));
        }
        if self.status.is_terminal() && self.quantity_remaining != 0 {
            return Err(DomainError::invariant(format!(
                "{} order still has {} remaining",
                self.status, self.quantity_remaining
            )));
        }
        Ok(())
    }

    fn ensure_transition(&self, to: OrderStatus) -> DomainResult<()> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(format!(
                "order {} cannot move from {} to {}",
                self.id, self.status, to
            )))
        }
    }

    /// Apply a status change that does not move stock (`ordered`,
    /// `backordered`, `cancelled`).
    pub fn transition(&self, to: OrderStatus, at: DateTime<Utc>) -> DomainResult<Order> {
        self.ensure_transition(to)?;
        if to.is_receipt() {
            return Err(DomainError::invariant(format!(
                "{to} must be applied through a receipt"
            )));
        }

        let mut next = self.clone();
        next.status = to;
        next.last_updated = at;

        if to == OrderStatus::Cancelled {
            next.cancelled_quantity = self.quantity_remaining;
            next.quantity = self.quantity_received;
            next.quantity_remaining = 0;
        }

        next.check_invariants()?;
        Ok(next)
    }

    /// Apply a receipt of `received` units.
    ///
    /// The resulting status is `partially_received` while anything remains,
    /// otherwise `close_as` (`received` or `fulfilled`). Terminal orders are
    /// rejected with an invalid-transition error before the quantity is
    /// looked at, so replaying a receipt can never double count.
    pub fn apply_receipt(
        &self,
        received: i64,
        close_as: OrderStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<Order> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "order {} is already {}",
                self.id, self.status
            )));
        }
        if !matches!(close_as, OrderStatus::Received | OrderStatus::Fulfilled) {
            return Err(DomainError::validation(format!(
                "{close_as} is not a closing status"
            )));
        }
        if received <= 0 || received > self.quantity_remaining {
            return Err(DomainError::validation(format!(
                "received quantity must be within 1..={} (got {received})",
                self.quantity_remaining
            )));
        }

        let remaining = self.quantity_remaining - received;
        let status = if remaining > 0 {
            OrderStatus::PartiallyReceived
        } else {
            close_as
        };
        self.ensure_transition(status)?;

        let mut next = self.clone();
        next.quantity_received += received;
        next.quantity_remaining = remaining;
        next.status = status;
        next.last_updated = at;

        next.check_invariants()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn draft(quantity: i64) -> OrderDraft {
        OrderDraft::new(ProductId::new(), "Widget", quantity, Decimal::new(250, 2), "Acme")
    }

    fn order(quantity: i64, status: OrderStatus) -> Order {
        let mut o = draft(quantity).into_order(OrderId::new(), Utc::now()).unwrap();
        o.status = status;
        o
    }

    #[test]
    fn new_order_is_pending_with_everything_remaining() {
        let o = draft(10).into_order(OrderId::new(), Utc::now()).unwrap();
        assert_eq!(o.status, OrderStatus::Pending);
        assert_eq!(o.quantity_received, 0);
        assert_eq!(o.quantity_remaining, 10);
        assert_eq!(o.total_cost, Decimal::new(2500, 2));
        o.check_invariants().unwrap();
    }

    #[test]
    fn supplied_total_cost_wins() {
        let o = draft(10)
            .with_total_cost(Decimal::new(20, 0))
            .into_order(OrderId::new(), Utc::now())
            .unwrap();
        assert_eq!(o.total_cost, Decimal::new(20, 0));
    }

    #[test]
    fn draft_validation_rejects_bad_input() {
        assert!(matches!(draft(0).validate(), Err(DomainError::Validation(_))));
        assert!(matches!(draft(-3).validate(), Err(DomainError::Validation(_))));

        let mut negative_cost = draft(1);
        negative_cost.cost = Decimal::new(-1, 0);
        assert!(matches!(negative_cost.validate(), Err(DomainError::Validation(_))));

        let free = OrderDraft::new(ProductId::new(), "Sample", 1, Decimal::ZERO, "Acme");
        free.validate().unwrap();
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Ordered));
        assert!(Pending.can_transition_to(Backordered));
        assert!(!Pending.can_transition_to(Received));
        assert!(Ordered.can_transition_to(Fulfilled));
        assert!(!Backordered.can_transition_to(Ordered));
        assert!(PartiallyReceived.can_transition_to(PartiallyReceived));
        for terminal in [Received, Fulfilled, Cancelled] {
            assert!(terminal.allowed_targets().is_empty());
        }
    }

    #[test]
    fn partial_receipt_keeps_order_open() {
        let o = order(10, OrderStatus::Ordered);
        let next = o.apply_receipt(4, OrderStatus::Received, Utc::now()).unwrap();

        assert_eq!(next.status, OrderStatus::PartiallyReceived);
        assert_eq!(next.quantity_received, 4);
        assert_eq!(next.quantity_remaining, 6);
    }

    #[test]
    fn receiving_the_rest_closes_with_requested_status() {
        let o = order(10, OrderStatus::Ordered)
            .apply_receipt(4, OrderStatus::Received, Utc::now())
            .unwrap();
        let closed = o.apply_receipt(6, OrderStatus::Fulfilled, Utc::now()).unwrap();

        assert_eq!(closed.status, OrderStatus::Fulfilled);
        assert_eq!(closed.quantity_remaining, 0);
        closed.check_invariants().unwrap();
    }

    #[test]
    fn receipt_on_terminal_order_is_an_invalid_transition() {
        let o = order(3, OrderStatus::Ordered)
            .apply_receipt(3, OrderStatus::Received, Utc::now())
            .unwrap();
        let err = o.apply_receipt(1, OrderStatus::Received, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn receipt_on_pending_order_is_an_invalid_transition() {
        let o = order(3, OrderStatus::Pending);
        let err = o.apply_receipt(1, OrderStatus::Received, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn receipt_quantity_must_fit_remaining() {
        let o = order(3, OrderStatus::Ordered);
        assert!(matches!(
            o.apply_receipt(4, OrderStatus::Received, Utc::now()),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            o.apply_receipt(0, OrderStatus::Received, Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn cancel_truncates_quantity_to_received() {
        let o = order(10, OrderStatus::Ordered)
            .apply_receipt(4, OrderStatus::Received, Utc::now())
            .unwrap();
        let cancelled = o.transition(OrderStatus::Cancelled, Utc::now()).unwrap();

        assert_eq!(cancelled.quantity, 4);
        assert_eq!(cancelled.quantity_received, 4);
        assert_eq!(cancelled.quantity_remaining, 0);
        assert_eq!(cancelled.cancelled_quantity, 6);
        cancelled.check_invariants().unwrap();
    }

    #[test]
    fn cancelling_before_any_receipt_leaves_zero_quantity_and_original_cost() {
        let o = order(10, OrderStatus::Ordered);
        let cancelled = o.transition(OrderStatus::Cancelled, Utc::now()).unwrap();

        assert_eq!(cancelled.quantity, 0);
        assert_eq!(cancelled.cancelled_quantity, 10);
        assert_eq!(cancelled.total_cost, o.total_cost);
        cancelled.check_invariants().unwrap();
    }

    #[test]
    fn transition_refuses_receipt_statuses() {
        let o = order(10, OrderStatus::Ordered);
        assert!(matches!(
            o.transition(OrderStatus::Received, Utc::now()),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn status_vocabulary_is_normalized() {
        assert_eq!(
            "Partially Received".parse::<OrderStatus>().unwrap(),
            OrderStatus::PartiallyReceived
        );
        assert_eq!("partial".parse::<OrderStatus>().unwrap(), OrderStatus::PartiallyReceived);
        assert_eq!("back-ordered".parse::<OrderStatus>().unwrap(), OrderStatus::Backordered);
        assert_eq!(" CANCELED ".parse::<OrderStatus>().unwrap(), OrderStatus::Cancelled);
        assert_eq!("closed".parse::<OrderStatus>().unwrap(), OrderStatus::Fulfilled);
        assert!("shipped-ish".parse::<OrderStatus>().is_err());

        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_value(OrderStatus::PartiallyReceived).unwrap();
        assert_eq!(json, serde_json::json!("partially_received"));
    }

    proptest! {
        #[test]
        fn receipts_preserve_quantity_invariants(
            quantity in 1i64..500,
            receipts in proptest::collection::vec(1i64..200, 0..20),
        ) {
            let mut o = order(quantity, OrderStatus::Ordered);
            for qty in receipts {
                match o.apply_receipt(qty, OrderStatus::Received, Utc::now()) {
                    Ok(next) => o = next,
                    Err(_) => {}
                }
                prop_assert_eq!(o.quantity_received + o.quantity_remaining, o.quantity);
                if o.status.is_terminal() {
                    prop_assert_eq!(o.quantity_remaining, 0);
                }
            }
        }
    }
}
