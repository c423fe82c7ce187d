use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use stockflow_purchasing::recompute;

use crate::dispatcher::{ViewHandler, ViewTrigger};
use crate::error::EngineError;
use crate::store::DocumentStore;
use crate::views::EngineViews;

/// Rebuilds the in-flight quantity index from every order.
pub struct PendingIndexView<S> {
    store: Arc<S>,
    views: Arc<EngineViews>,
}

impl<S> PendingIndexView<S> {
    pub fn new(store: Arc<S>, views: Arc<EngineViews>) -> Self {
        Self { store, views }
    }
}

#[async_trait]
impl<S: DocumentStore> ViewHandler for PendingIndexView<S> {
    async fn refresh(&self, trigger: ViewTrigger) -> Result<(), EngineError> {
        let orders = self.store.list_orders().await?;
        let index = recompute(&orders);
        let products = index.len();
        if self.views.pending.publish(trigger.generation, index) {
            debug!(generation = trigger.generation, products, "pending index published");
        }
        Ok(())
    }
}
