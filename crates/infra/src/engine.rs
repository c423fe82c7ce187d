//! Wiring of store, cache, lifecycle manager and views.

use std::sync::Arc;

use tracing::info;

use stockflow_core::OrderId;
use stockflow_events::ActivityLog;
use stockflow_purchasing::{Order, OrderDraft, OrderStatus};

use crate::cache::CacheLayer;
use crate::config::EngineConfig;
use crate::dispatcher::{ChangeFeedDispatcher, DispatcherHandle};
use crate::error::EngineError;
use crate::lifecycle::OrderLifecycleManager;
use crate::reconciler::InventoryReconciler;
use crate::store::DocumentStore;
use crate::views::{EngineViews, ProjectionReader, register_views};

/// A running engine.
///
/// All reads and writes go through a TTL [`CacheLayer`] in front of the
/// supplied store. Views are kept current by a background dispatcher task,
/// so `start` must be called from within a tokio runtime.
pub struct StockflowEngine<S: DocumentStore + 'static> {
    store: Arc<CacheLayer<S>>,
    orders: OrderLifecycleManager<CacheLayer<S>>,
    views: Arc<EngineViews>,
    dispatcher: DispatcherHandle,
    config: EngineConfig,
}

impl<S: DocumentStore + 'static> StockflowEngine<S> {
    pub fn start(store: S, config: EngineConfig, activity: Arc<dyn ActivityLog>) -> Self {
        let store = Arc::new(CacheLayer::new(store, config.cache_ttl));
        let orders =
            OrderLifecycleManager::new(store.clone(), config.reconcile_retry.clone(), activity);

        let views = Arc::new(EngineViews::new());
        let mut dispatcher = ChangeFeedDispatcher::new(store.clone(), config.dispatcher.clone());
        register_views(&mut dispatcher, store.clone(), views.clone());
        let dispatcher = dispatcher.start();

        info!(
            cache_ttl_ms = config.cache_ttl.as_millis() as u64,
            reconcile_attempts = config.reconcile_retry.max_attempts,
            "stockflow engine started"
        );

        Self {
            store,
            orders,
            views,
            dispatcher,
            config,
        }
    }

    pub fn orders(&self) -> &OrderLifecycleManager<CacheLayer<S>> {
        &self.orders
    }

    pub fn reconciler(&self) -> &InventoryReconciler<CacheLayer<S>> {
        self.orders.reconciler()
    }

    pub fn store(&self) -> &Arc<CacheLayer<S>> {
        &self.store
    }

    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn projections(&self) -> ProjectionReader {
        ProjectionReader::new(self.views.clone(), self.dispatcher.health())
    }

    /// `Some(SyncDegraded)` while the change feed is down.
    pub fn sync_warning(&self) -> Option<EngineError> {
        self.dispatcher.health().borrow().warning()
    }

    pub async fn create_order(&self, draft: OrderDraft) -> Result<Order, EngineError> {
        self.orders.create_order(draft).await
    }

    pub async fn update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        received_qty: Option<i64>,
    ) -> Result<Order, EngineError> {
        self.orders
            .update_status(order_id, new_status, received_qty)
            .await
    }

    pub async fn delete_order(&self, order_id: OrderId) -> Result<Order, EngineError> {
        self.orders.delete_order(order_id).await
    }

    /// Stop the dispatcher and wait for it to finish.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
        info!("stockflow engine stopped");
    }
}
