//! Order lifecycle and inventory reconciliation engine.
//!
//! Orders move through a fixed status machine; receipts update the order and
//! its inventory item in a single optimistic transaction; derived views
//! (pending quantities, low-stock alerts, dashboard counts, order list) are
//! rebuilt from the store's change feed behind per-view throttles.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod views;

pub use cache::{CacheLayer, CacheStats};
pub use config::{DispatcherConfig, EngineConfig};
pub use dispatcher::{
    ChangeFeedDispatcher, DispatcherHandle, SyncHealth, TriggerReason, ViewHandler,
    ViewRegistration, ViewTrigger,
};
pub use engine::StockflowEngine;
pub use error::{EngineError, ErrorKind};
pub use lifecycle::OrderLifecycleManager;
pub use reconciler::{InventoryReconciler, ReceiptOutcome};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{DocumentStore, InMemoryDocumentStore, StoreError, Transaction};
pub use views::{DashboardCounts, EngineViews, LowStockRow, OrderRow, ProjectionReader};
