//! Applies goods receipts to orders and inventory as one atomic unit.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use stockflow_core::OrderId;
use stockflow_events::{ActivityLog, LifecycleEvent, record_best_effort};
use stockflow_inventory::InventoryItem;
use stockflow_purchasing::{Order, OrderStatus};

use crate::error::EngineError;
use crate::retry::{RetryPolicy, retry_transaction};
use crate::store::{DocumentStore, Transaction};

/// Committed result of a receipt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptOutcome {
    pub order: Order,
    pub item: InventoryItem,
    pub received: i64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Moves received stock from an order into its inventory item.
///
/// Each attempt re-reads both documents, derives the new versions from what
/// it read and commits them together with compare-and-set on both. A
/// concurrent writer makes the commit fail as a whole, so the retry sees the
/// other writer's result and no receipt is lost or applied twice.
pub struct InventoryReconciler<S> {
    store: Arc<S>,
    retry: RetryPolicy,
    activity: Arc<dyn ActivityLog>,
}

impl<S> Clone for InventoryReconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            retry: self.retry.clone(),
            activity: self.activity.clone(),
        }
    }
}

impl<S: DocumentStore> InventoryReconciler<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy, activity: Arc<dyn ActivityLog>) -> Self {
        Self {
            store,
            retry,
            activity,
        }
    }

    /// Receive `received_qty` units against `order`.
    ///
    /// `close_as` is the status the order takes once nothing remains
    /// (`received` or `fulfilled`); while units remain it becomes
    /// `partially_received`. On any error neither document has changed.
    #[instrument(skip(self, order), fields(order_id = %order.id, product_id = %order.product_id))]
    pub async fn on_receipt(
        &self,
        order: &Order,
        received_qty: i64,
        close_as: OrderStatus,
    ) -> Result<ReceiptOutcome, EngineError> {
        if order.status.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "order {} is already {}",
                order.id, order.status
            )));
        }
        if received_qty <= 0 || received_qty > order.quantity_remaining {
            return Err(EngineError::validation(format!(
                "received quantity must be within 1..={} (got {received_qty})",
                order.quantity_remaining
            )));
        }

        let order_id = order.id;
        let outcome = retry_transaction(&self.retry, "reconcile_receipt", move |attempt| {
            self.attempt_receipt(order_id, received_qty, close_as, attempt)
        })
        .await?;

        info!(
            received = outcome.received,
            stock = outcome.item.quantity,
            remaining = outcome.order.quantity_remaining,
            status = %outcome.order.status,
            attempts = outcome.attempts,
            "inventory reconciled"
        );
        record_best_effort(
            self.activity.as_ref(),
            &LifecycleEvent::inventory_reconciled(
                outcome.order.id,
                outcome.order.product_id,
                format!(
                    "Received {} x {}; stock now {}",
                    outcome.received, outcome.item.name, outcome.item.quantity
                ),
            ),
        );

        Ok(outcome)
    }

    async fn attempt_receipt(
        &self,
        order_id: OrderId,
        received_qty: i64,
        close_as: OrderStatus,
        attempt: u32,
    ) -> Result<ReceiptOutcome, EngineError> {
        let current = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("order {order_id}")))?;

        let now = Utc::now();
        // Re-validated against the fresh document: a concurrent receipt may
        // have closed the order or shrunk the remainder.
        let next_order = current.doc.apply_receipt(received_qty, close_as, now)?;

        let item = self
            .store
            .get_item(current.doc.product_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("inventory item {}", current.doc.product_id))
            })?;
        let next_item = item.doc.receive(received_qty, current.doc.cost, now)?;

        self.store
            .commit(
                Transaction::new()
                    .put_order(next_order.clone(), current.expected())
                    .put_item(next_item.clone(), item.expected()),
            )
            .await?;

        Ok(ReceiptOutcome {
            order: next_order,
            item: next_item,
            received: received_qty,
            attempts: attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rust_decimal::Decimal;
    use stockflow_core::{ExpectedVersion, ProductId};
    use stockflow_events::{InMemoryActivityLog, LifecycleEventKind};
    use stockflow_purchasing::OrderDraft;

    use crate::store::InMemoryDocumentStore;

    struct Fixture {
        store: Arc<InMemoryDocumentStore>,
        log: Arc<InMemoryActivityLog>,
        reconciler: InventoryReconciler<InMemoryDocumentStore>,
        order: Order,
    }

    async fn fixture(stock: i64, ordered: i64, status: OrderStatus) -> Fixture {
        let store = Arc::new(InMemoryDocumentStore::new());
        let log = Arc::new(InMemoryActivityLog::new());
        let product = ProductId::new();
        store
            .seed_item(
                InventoryItem::new(product, "Hinge")
                    .with_quantity(stock)
                    .with_cost(Decimal::new(150, 2)),
            )
            .unwrap();

        let mut order = OrderDraft::new(product, "Hinge", ordered, Decimal::new(175, 2), "Acme")
            .into_order(store.allocate_order_id(), Utc::now())
            .unwrap();
        order.status = status;
        store
            .commit(Transaction::new().put_order(order.clone(), ExpectedVersion::Absent))
            .await
            .unwrap();

        let reconciler = InventoryReconciler::new(
            store.clone(),
            RetryPolicy::fixed(3, Duration::from_millis(10)),
            log.clone(),
        );
        Fixture {
            store,
            log,
            reconciler,
            order,
        }
    }

    #[tokio::test]
    async fn full_receipt_closes_the_order_and_adds_stock() {
        let f = fixture(2, 10, OrderStatus::Ordered).await;

        let outcome = f
            .reconciler
            .on_receipt(&f.order, 10, OrderStatus::Received)
            .await
            .unwrap();

        assert_eq!(outcome.order.status, OrderStatus::Received);
        assert_eq!(outcome.order.quantity_remaining, 0);
        assert_eq!(outcome.item.quantity, 12);
        assert_eq!(outcome.item.cost, Decimal::new(175, 2));
        assert!(outcome.item.last_cost_update.is_some());

        let events = f.log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, LifecycleEventKind::InventoryReconciled);
    }

    #[tokio::test]
    async fn over_receipt_is_rejected_without_writes() {
        let f = fixture(2, 10, OrderStatus::Ordered).await;
        let before = f.store.commit_attempts();

        let err = f
            .reconciler
            .on_receipt(&f.order, 11, OrderStatus::Received)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(f.store.commit_attempts(), before);
    }

    #[tokio::test]
    async fn stale_snapshot_of_a_closed_order_is_refused() {
        let f = fixture(0, 5, OrderStatus::Ordered).await;
        f.reconciler
            .on_receipt(&f.order, 5, OrderStatus::Received)
            .await
            .unwrap();

        // Same (now stale) snapshot replayed.
        let err = f
            .reconciler
            .on_receipt(&f.order, 5, OrderStatus::Received)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidTransition(_)));
        let item = f.store.get_item(f.order.product_id).await.unwrap().unwrap();
        assert_eq!(item.doc.quantity, 5);
    }

    #[tokio::test]
    async fn transient_conflict_is_retried() {
        let f = fixture(0, 4, OrderStatus::Backordered).await;
        f.store.fail_next_commits(2);

        let outcome = f
            .reconciler
            .on_receipt(&f.order, 4, OrderStatus::Fulfilled)
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.order.status, OrderStatus::Fulfilled);
        assert_eq!(outcome.item.quantity, 4);
    }
}
