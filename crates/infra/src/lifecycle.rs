//! Order creation, status changes and deletion.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use stockflow_core::{ExpectedVersion, OrderId};
use stockflow_events::{ActivityLog, LifecycleEvent, record_best_effort};
use stockflow_purchasing::{Order, OrderDraft, OrderStatus};

use crate::error::EngineError;
use crate::reconciler::InventoryReconciler;
use crate::retry::{RetryPolicy, retry_transaction};
use crate::store::{DocumentStore, Transaction};

/// Entry point for everything that changes an order.
///
/// Receipt statuses (`partially_received`, `received`, `fulfilled`) are
/// delegated to the [`InventoryReconciler`] so the order and its inventory
/// item move together; every other transition is a single compare-and-set
/// write of the order document.
pub struct OrderLifecycleManager<S> {
    store: Arc<S>,
    reconciler: InventoryReconciler<S>,
    retry: RetryPolicy,
    activity: Arc<dyn ActivityLog>,
}

impl<S: DocumentStore> OrderLifecycleManager<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy, activity: Arc<dyn ActivityLog>) -> Self {
        let reconciler = InventoryReconciler::new(store.clone(), retry.clone(), activity.clone());
        Self {
            store,
            reconciler,
            retry,
            activity,
        }
    }

    pub fn reconciler(&self) -> &InventoryReconciler<S> {
        &self.reconciler
    }

    /// Create a `pending` order for an existing product.
    #[instrument(skip(self, draft), fields(product_id = %draft.product_id))]
    pub async fn create_order(&self, draft: OrderDraft) -> Result<Order, EngineError> {
        draft.validate()?;

        if self.store.resolve_item(draft.product_id).await?.is_none() {
            return Err(EngineError::validation(format!(
                "unknown product {}",
                draft.product_id
            )));
        }

        let order = draft.into_order(self.store.allocate_order_id(), Utc::now())?;
        let created = order.clone();
        retry_transaction(&self.retry, "create_order", move |_| {
            let tx = Transaction::new().put_order(order.clone(), ExpectedVersion::Absent);
            async move {
                self.store.commit(tx).await?;
                Ok::<_, EngineError>(())
            }
        })
        .await?;

        info!(order_id = %created.id, quantity = created.quantity, "order created");
        record_best_effort(
            self.activity.as_ref(),
            &LifecycleEvent::order_created(
                created.id,
                created.product_id,
                format!(
                    "Ordered {} x {} from {}",
                    created.quantity, created.product_name, created.supplier
                ),
            ),
        );
        Ok(created)
    }

    /// Move an order to `new_status`.
    ///
    /// For receipt statuses `received_qty` is the number of units received in
    /// this call; `None` means "everything still outstanding" for `received`
    /// and `fulfilled`, and is a validation error for `partially_received`.
    /// A receipt covering the whole remainder closes the order (a
    /// `partially_received` request then lands on `received`).
    #[instrument(skip(self), fields(order_id = %order_id, to = %new_status))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        received_qty: Option<i64>,
    ) -> Result<Order, EngineError> {
        let current = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("order {order_id}")))?
            .into_doc();

        if !current.status.can_transition_to(new_status) {
            return Err(EngineError::InvalidTransition(format!(
                "cannot move order {order_id} from {} to {new_status}",
                current.status
            )));
        }

        let updated = if new_status.is_receipt() {
            let qty = match (new_status, received_qty) {
                (_, Some(qty)) => qty,
                (OrderStatus::PartiallyReceived, None) => {
                    return Err(EngineError::validation(
                        "partially_received requires a received quantity",
                    ));
                }
                (_, None) => current.quantity_remaining,
            };
            let close_as = match new_status {
                OrderStatus::PartiallyReceived => OrderStatus::Received,
                other => other,
            };
            self.reconciler
                .on_receipt(&current, qty, close_as)
                .await?
                .order
        } else {
            retry_transaction(&self.retry, "update_status", move |_| {
                self.attempt_transition(order_id, new_status)
            })
            .await?
        };

        info!(from = %current.status, status = %updated.status, "order status changed");
        record_best_effort(
            self.activity.as_ref(),
            &LifecycleEvent::status_changed(
                updated.id,
                updated.product_id,
                format!("{} -> {}", current.status.label(), updated.status.label()),
            ),
        );
        Ok(updated)
    }

    async fn attempt_transition(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<Order, EngineError> {
        let current = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("order {order_id}")))?;

        let next = current.doc.transition(new_status, Utc::now())?;
        self.store
            .commit(Transaction::new().put_order(next.clone(), current.expected()))
            .await?;
        Ok(next)
    }

    /// Remove an order. Stock already received stays in inventory.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<Order, EngineError> {
        let deleted = retry_transaction(&self.retry, "delete_order", move |_| async move {
            let current = self
                .store
                .get_order(order_id)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("order {order_id}")))?;
            self.store
                .commit(Transaction::new().delete_order(order_id, current.expected()))
                .await?;
            Ok::<_, EngineError>(current.into_doc())
        })
        .await?;

        info!(status = %deleted.status, "order deleted");
        record_best_effort(
            self.activity.as_ref(),
            &LifecycleEvent::order_deleted(
                deleted.id,
                deleted.product_id,
                format!("Deleted {} order for {}", deleted.status.label(), deleted.product_name),
            ),
        );
        Ok(deleted)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, EngineError> {
        self.store
            .get_order(order_id)
            .await?
            .map(|v| v.into_doc())
            .ok_or_else(|| EngineError::not_found(format!("order {order_id}")))
    }

    /// All orders, newest first.
    pub async fn list_orders(&self) -> Result<Vec<Order>, EngineError> {
        let mut orders = self.store.list_orders().await?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rust_decimal::Decimal;
    use stockflow_core::ProductId;
    use stockflow_events::{InMemoryActivityLog, LifecycleEventKind};
    use stockflow_inventory::InventoryItem;

    use std::time::Duration;

    use crate::cache::CacheLayer;
    use crate::error::ErrorKind;
    use crate::store::InMemoryDocumentStore;

    fn manager() -> (
        Arc<InMemoryDocumentStore>,
        Arc<InMemoryActivityLog>,
        OrderLifecycleManager<InMemoryDocumentStore>,
        ProductId,
    ) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let log = Arc::new(InMemoryActivityLog::new());
        let product = ProductId::new();
        store
            .seed_item(InventoryItem::new(product, "Gasket").with_quantity(1))
            .unwrap();
        let manager =
            OrderLifecycleManager::new(store.clone(), RetryPolicy::default(), log.clone());
        (store, log, manager, product)
    }

    fn draft(product: ProductId, qty: i64) -> OrderDraft {
        OrderDraft::new(product, "Gasket", qty, Decimal::new(300, 2), "Seals Ltd")
    }

    #[tokio::test]
    async fn created_orders_start_pending_with_everything_outstanding() {
        let (_, log, manager, product) = manager();

        let order = manager.create_order(draft(product, 8)).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.quantity_remaining, 8);
        assert_eq!(order.quantity_received, 0);
        assert_eq!(order.total_cost, Decimal::new(2400, 2));
        assert_eq!(manager.get_order(order.id).await.unwrap(), order);
        assert_eq!(log.events()[0].kind, LifecycleEventKind::OrderCreated);
    }

    #[tokio::test]
    async fn creating_for_an_unknown_product_is_a_validation_error() {
        let (_, _, manager, _) = manager();
        let err = manager
            .create_order(draft(ProductId::new(), 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn a_product_deleted_behind_the_cache_cannot_be_ordered() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let product = ProductId::new();
        store
            .seed_item(InventoryItem::new(product, "Gasket"))
            .unwrap();
        let cached = Arc::new(CacheLayer::new(store.clone(), Duration::from_secs(60)));
        let manager = OrderLifecycleManager::new(
            cached.clone(),
            RetryPolicy::default(),
            Arc::new(InMemoryActivityLog::new()),
        );
        assert!(cached.get_item(product).await.unwrap().is_some());

        store
            .commit(Transaction::new().delete_item(product, ExpectedVersion::Any))
            .await
            .unwrap();

        let err = manager.create_order(draft(product, 2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(store.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_positive_quantities_are_rejected() {
        let (_, _, manager, product) = manager();
        let err = manager.create_order(draft(product, 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn plain_transitions_follow_the_table() {
        let (_, _, manager, product) = manager();
        let order = manager.create_order(draft(product, 3)).await.unwrap();

        let ordered = manager
            .update_status(order.id, OrderStatus::Ordered, None)
            .await
            .unwrap();
        assert_eq!(ordered.status, OrderStatus::Ordered);

        let err = manager
            .update_status(order.id, OrderStatus::Pending, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn receiving_without_a_quantity_takes_the_remainder() {
        let (store, _, manager, product) = manager();
        let order = manager.create_order(draft(product, 3)).await.unwrap();
        manager
            .update_status(order.id, OrderStatus::Ordered, None)
            .await
            .unwrap();

        let received = manager
            .update_status(order.id, OrderStatus::Received, None)
            .await
            .unwrap();

        assert_eq!(received.status, OrderStatus::Received);
        let item = store.get_item(product).await.unwrap().unwrap();
        assert_eq!(item.doc.quantity, 4);
    }

    #[tokio::test]
    async fn partial_receipt_needs_a_quantity() {
        let (_, _, manager, product) = manager();
        let order = manager.create_order(draft(product, 3)).await.unwrap();
        manager
            .update_status(order.id, OrderStatus::Ordered, None)
            .await
            .unwrap();

        let err = manager
            .update_status(order.id, OrderStatus::PartiallyReceived, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn partial_receipt_of_everything_closes_as_received() {
        let (_, _, manager, product) = manager();
        let order = manager.create_order(draft(product, 3)).await.unwrap();
        manager
            .update_status(order.id, OrderStatus::Ordered, None)
            .await
            .unwrap();

        let closed = manager
            .update_status(order.id, OrderStatus::PartiallyReceived, Some(3))
            .await
            .unwrap();
        assert_eq!(closed.status, OrderStatus::Received);
    }

    #[tokio::test]
    async fn cancelling_keeps_the_quantity_invariant() {
        let (_, _, manager, product) = manager();
        let order = manager.create_order(draft(product, 10)).await.unwrap();
        manager
            .update_status(order.id, OrderStatus::Ordered, None)
            .await
            .unwrap();
        manager
            .update_status(order.id, OrderStatus::PartiallyReceived, Some(4))
            .await
            .unwrap();

        let cancelled = manager
            .update_status(order.id, OrderStatus::Cancelled, None)
            .await
            .unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.quantity_received, 4);
        assert_eq!(cancelled.quantity_remaining, 0);
        assert_eq!(cancelled.cancelled_quantity, 6);
        cancelled.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn unknown_orders_are_not_found() {
        let (_, _, manager, _) = manager();
        let err = manager
            .update_status(OrderId::new(), OrderStatus::Ordered, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn deleting_removes_the_order_and_logs_it() {
        let (_, log, manager, product) = manager();
        let order = manager.create_order(draft(product, 2)).await.unwrap();

        manager.delete_order(order.id).await.unwrap();

        assert_eq!(
            manager.get_order(order.id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            log.events().last().map(|e| e.kind),
            Some(LifecycleEventKind::OrderDeleted)
        );
        assert!(manager.list_orders().await.unwrap().is_empty());
    }
}
