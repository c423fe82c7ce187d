use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use stockflow_core::{ExpectedVersion, OrderId, ProductId, Versioned};
use stockflow_events::{ChangeBatch, Collection};
use stockflow_inventory::InventoryItem;
use stockflow_purchasing::Order;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Compare-and-set failed: the document changed since it was read.
    #[error("version conflict: {0}")]
    Conflict(String),

    /// A write expected a document that no longer exists.
    #[error("document missing: {0}")]
    Missing(String),

    /// A write expected a document to be absent but it exists.
    #[error("document already exists: {0}")]
    Duplicate(String),

    /// Transient backend failure (connection, poisoned lock, outage).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Conflicts, vanished documents and outages are worth another attempt:
    /// the next attempt re-reads and either succeeds or fails for a
    /// permanent reason.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_) | StoreError::Missing(_) | StoreError::Unavailable(_)
        )
    }
}

/// One compare-and-set write inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxWrite {
    PutOrder {
        order: Order,
        expected: ExpectedVersion,
    },
    DeleteOrder {
        id: OrderId,
        expected: ExpectedVersion,
    },
    PutItem {
        item: InventoryItem,
        expected: ExpectedVersion,
    },
    DeleteItem {
        id: ProductId,
        expected: ExpectedVersion,
    },
}

impl TxWrite {
    pub fn collection(&self) -> Collection {
        match self {
            TxWrite::PutOrder { .. } | TxWrite::DeleteOrder { .. } => Collection::Orders,
            TxWrite::PutItem { .. } | TxWrite::DeleteItem { .. } => Collection::Inventory,
        }
    }

    pub fn document_id(&self) -> Uuid {
        match self {
            TxWrite::PutOrder { order, .. } => *order.id.as_uuid(),
            TxWrite::DeleteOrder { id, .. } => *id.as_uuid(),
            TxWrite::PutItem { item, .. } => *item.id.as_uuid(),
            TxWrite::DeleteItem { id, .. } => *id.as_uuid(),
        }
    }

    pub fn expected(&self) -> ExpectedVersion {
        match self {
            TxWrite::PutOrder { expected, .. }
            | TxWrite::DeleteOrder { expected, .. }
            | TxWrite::PutItem { expected, .. }
            | TxWrite::DeleteItem { expected, .. } => *expected,
        }
    }
}

/// An all-or-nothing batch of writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    writes: Vec<TxWrite>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_order(mut self, order: Order, expected: ExpectedVersion) -> Self {
        self.writes.push(TxWrite::PutOrder { order, expected });
        self
    }

    pub fn delete_order(mut self, id: OrderId, expected: ExpectedVersion) -> Self {
        self.writes.push(TxWrite::DeleteOrder { id, expected });
        self
    }

    pub fn put_item(mut self, item: InventoryItem, expected: ExpectedVersion) -> Self {
        self.writes.push(TxWrite::PutItem { item, expected });
        self
    }

    pub fn delete_item(mut self, id: ProductId, expected: ExpectedVersion) -> Self {
        self.writes.push(TxWrite::DeleteItem { id, expected });
        self
    }

    pub fn writes(&self) -> &[TxWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<TxWrite> {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn touches(&self, collection: Collection) -> bool {
        self.writes.iter().any(|w| w.collection() == collection)
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Store-wide commit sequence assigned to this transaction.
    pub sequence: u64,
    /// New version per written document (0 for deletions).
    pub versions: Vec<(Uuid, u64)>,
}

impl CommitReceipt {
    pub fn version_of(&self, document_id: Uuid) -> Option<u64> {
        self.versions
            .iter()
            .find(|(id, _)| *id == document_id)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The subscriber fell behind and `n` batches were dropped.
    #[error("change feed lagged by {0} batch(es)")]
    Lagged(u64),

    /// The feed ended; the subscriber must resubscribe.
    #[error("change feed closed")]
    Closed,
}

/// Live subscription to one collection's change feed.
#[derive(Debug)]
pub struct ChangeSubscription {
    collection: Collection,
    receiver: broadcast::Receiver<ChangeBatch>,
}

impl ChangeSubscription {
    pub fn new(collection: Collection, receiver: broadcast::Receiver<ChangeBatch>) -> Self {
        Self {
            collection,
            receiver,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub async fn next(&mut self) -> Result<ChangeBatch, FeedError> {
        match self.receiver.recv().await {
            Ok(batch) => Ok(batch),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(FeedError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(FeedError::Closed),
        }
    }
}

/// Versioned document storage for orders and inventory items.
///
/// Reads return the document together with the version a later write must
/// present. `commit` is atomic across collections: either every write in the
/// transaction lands (each bumping its document version) or none does.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store-assigned identity for a new order.
    fn allocate_order_id(&self) -> OrderId {
        OrderId::new()
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Versioned<Order>>, StoreError>;

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError>;

    async fn get_item(&self, id: ProductId)
    -> Result<Option<Versioned<InventoryItem>>, StoreError>;

    async fn list_items(&self) -> Result<Vec<InventoryItem>, StoreError>;

    /// Authoritative item read that bypasses any local cache. Used where a
    /// stale hit would let a deleted product through.
    async fn resolve_item(
        &self,
        id: ProductId,
    ) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
        self.get_item(id).await
    }

    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, StoreError>;

    fn subscribe(&self, collection: Collection) -> Result<ChangeSubscription, StoreError>;

    /// Drop any locally cached reads for `collection`. Backends without a
    /// cache ignore this.
    fn invalidate(&self, _collection: Collection) {}
}

#[async_trait]
impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    fn allocate_order_id(&self) -> OrderId {
        (**self).allocate_order_id()
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Versioned<Order>>, StoreError> {
        (**self).get_order(id).await
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        (**self).list_orders().await
    }

    async fn get_item(
        &self,
        id: ProductId,
    ) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
        (**self).get_item(id).await
    }

    async fn list_items(&self) -> Result<Vec<InventoryItem>, StoreError> {
        (**self).list_items().await
    }

    async fn resolve_item(
        &self,
        id: ProductId,
    ) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
        (**self).resolve_item(id).await
    }

    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, StoreError> {
        (**self).commit(tx).await
    }

    fn subscribe(&self, collection: Collection) -> Result<ChangeSubscription, StoreError> {
        (**self).subscribe(collection)
    }

    fn invalidate(&self, collection: Collection) {
        (**self).invalidate(collection)
    }
}
