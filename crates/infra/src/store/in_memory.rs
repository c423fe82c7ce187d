use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use stockflow_core::{ExpectedVersion, OrderId, ProductId, Versioned};
use stockflow_events::{ChangeBatch, ChangeKind, Collection, DocumentChange};
use stockflow_inventory::InventoryItem;
use stockflow_purchasing::Order;

use super::r#trait::{
    ChangeSubscription, CommitReceipt, DocumentStore, StoreError, Transaction, TxWrite,
};

const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Documents {
    orders: HashMap<OrderId, Versioned<Order>>,
    items: HashMap<ProductId, Versioned<InventoryItem>>,
    sequence: u64,
}

impl Documents {
    fn version_of(&self, write: &TxWrite) -> Option<u64> {
        match write {
            TxWrite::PutOrder { order, .. } => self.orders.get(&order.id).map(|v| v.version),
            TxWrite::DeleteOrder { id, .. } => self.orders.get(id).map(|v| v.version),
            TxWrite::PutItem { item, .. } => self.items.get(&item.id).map(|v| v.version),
            TxWrite::DeleteItem { id, .. } => self.items.get(id).map(|v| v.version),
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    conflicts: AtomicU32,
    outages: AtomicU32,
    feeds_down: AtomicBool,
}

fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn upsert_change(previous: Option<u64>, version: u64) -> (ChangeKind, u64) {
    match previous {
        Some(_) => (ChangeKind::Modified, version),
        None => (ChangeKind::Added, version),
    }
}

fn check_expected(write: &TxWrite, actual: Option<u64>) -> Result<(), StoreError> {
    let expected = write.expected();
    expected.check(actual).map_err(|err| {
        let doc = format!("{}/{}", write.collection(), write.document_id());
        match (expected, actual) {
            (ExpectedVersion::Exact(_), None) => StoreError::Missing(doc),
            (ExpectedVersion::Absent, Some(_)) => StoreError::Duplicate(doc),
            _ => StoreError::Conflict(format!("{doc}: {err}")),
        }
    })
}

/// In-memory document store with change feeds.
///
/// Intended for tests/dev. Every async call yields once before touching the
/// documents so concurrent callers interleave the way they would against a
/// remote backend. Faults can be injected to exercise retry and degraded-sync
/// paths.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    docs: RwLock<Documents>,
    feeds: Mutex<HashMap<Collection, broadcast::Sender<ChangeBatch>>>,
    feed_capacity: usize,
    faults: Faults,
    commit_attempts: AtomicU64,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Feed buffer size per collection; slow subscribers beyond it see a lag.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            docs: RwLock::new(Documents::default()),
            feeds: Mutex::new(HashMap::new()),
            feed_capacity: capacity.max(1),
            faults: Faults::default(),
            commit_attempts: AtomicU64::new(0),
        }
    }

    /// Upsert an inventory item outside any engine flow (product collaborator).
    pub fn seed_item(&self, item: InventoryItem) -> Result<CommitReceipt, StoreError> {
        self.apply(Transaction::new().put_item(item, ExpectedVersion::Any))
    }

    /// Make the next `n` commits fail with a version conflict.
    pub fn fail_next_commits(&self, n: u32) {
        self.faults.conflicts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail as if the backend were unreachable.
    pub fn fail_next_commits_unavailable(&self, n: u32) {
        self.faults.outages.store(n, Ordering::SeqCst);
    }

    /// Close every open change feed and refuse new subscriptions.
    pub fn sever_change_feeds(&self) {
        self.faults.feeds_down.store(true, Ordering::SeqCst);
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.clear();
        }
        warn!("change feeds severed");
    }

    /// Accept subscriptions again after [`sever_change_feeds`](Self::sever_change_feeds).
    pub fn restore_change_feeds(&self) {
        self.faults.feeds_down.store(false, Ordering::SeqCst);
    }

    /// Number of commit calls seen, including failed ones.
    pub fn commit_attempts(&self) -> u64 {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("document lock poisoned".to_string())
    }

    fn apply(&self, tx: Transaction) -> Result<CommitReceipt, StoreError> {
        let (receipt, batches) = {
            let mut docs = self.docs.write().map_err(|_| Self::poisoned())?;

            for write in tx.writes() {
                check_expected(write, docs.version_of(write))?;
            }

            if tx.is_empty() {
                return Ok(CommitReceipt {
                    sequence: docs.sequence,
                    versions: vec![],
                });
            }

            docs.sequence += 1;
            let sequence = docs.sequence;
            let mut versions = Vec::with_capacity(tx.writes().len());
            let mut changes: BTreeMap<Collection, Vec<DocumentChange>> = BTreeMap::new();

            for write in tx.into_writes() {
                let collection = write.collection();
                let document_id = write.document_id();
                let change = match write {
                    TxWrite::PutOrder { order, .. } => {
                        let previous = docs.orders.get(&order.id).map(|v| v.version);
                        let version = previous.unwrap_or(0) + 1;
                        docs.orders.insert(order.id, Versioned::new(version, order));
                        Some(upsert_change(previous, version))
                    }
                    TxWrite::PutItem { item, .. } => {
                        let previous = docs.items.get(&item.id).map(|v| v.version);
                        let version = previous.unwrap_or(0) + 1;
                        docs.items.insert(item.id, Versioned::new(version, item));
                        Some(upsert_change(previous, version))
                    }
                    TxWrite::DeleteOrder { id, .. } => docs
                        .orders
                        .remove(&id)
                        .map(|v| (ChangeKind::Removed, v.version)),
                    TxWrite::DeleteItem { id, .. } => docs
                        .items
                        .remove(&id)
                        .map(|v| (ChangeKind::Removed, v.version)),
                };

                // Deleting an absent document under `Any` is a no-op.
                let Some((kind, version)) = change else {
                    continue;
                };
                let new_version = if kind == ChangeKind::Removed { 0 } else { version };
                versions.push((document_id, new_version));
                changes.entry(collection).or_default().push(DocumentChange {
                    kind,
                    document_id,
                    version,
                });
            }

            let committed_at = Utc::now();
            let batches: Vec<ChangeBatch> = changes
                .into_iter()
                .map(|(collection, changes)| ChangeBatch {
                    collection,
                    sequence,
                    changes,
                    committed_at,
                })
                .collect();

            (CommitReceipt { sequence, versions }, batches)
        };

        // Publish only after the write lock is released and the commit is visible.
        self.publish(batches);
        debug!(sequence = receipt.sequence, writes = receipt.versions.len(), "commit applied");
        Ok(receipt)
    }

    fn publish(&self, batches: Vec<ChangeBatch>) {
        if batches.is_empty() || self.faults.feeds_down.load(Ordering::SeqCst) {
            return;
        }
        let Ok(feeds) = self.feeds.lock() else {
            return;
        };
        for batch in batches {
            if let Some(sender) = feeds.get(&batch.collection) {
                // No receivers is fine: nobody is watching this collection yet.
                let _ = sender.send(batch);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_order(&self, id: OrderId) -> Result<Option<Versioned<Order>>, StoreError> {
        tokio::task::yield_now().await;
        let docs = self.docs.read().map_err(|_| Self::poisoned())?;
        Ok(docs.orders.get(&id).cloned())
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        tokio::task::yield_now().await;
        let docs = self.docs.read().map_err(|_| Self::poisoned())?;
        Ok(docs.orders.values().map(|v| v.doc.clone()).collect())
    }

    async fn get_item(
        &self,
        id: ProductId,
    ) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
        tokio::task::yield_now().await;
        let docs = self.docs.read().map_err(|_| Self::poisoned())?;
        Ok(docs.items.get(&id).cloned())
    }

    async fn list_items(&self) -> Result<Vec<InventoryItem>, StoreError> {
        tokio::task::yield_now().await;
        let docs = self.docs.read().map_err(|_| Self::poisoned())?;
        Ok(docs.items.values().map(|v| v.doc.clone()).collect())
    }

    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, StoreError> {
        tokio::task::yield_now().await;
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);

        if take_fault(&self.faults.outages) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        if take_fault(&self.faults.conflicts) {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }

        self.apply(tx)
    }

    fn subscribe(&self, collection: Collection) -> Result<ChangeSubscription, StoreError> {
        if self.faults.feeds_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "change feed for {collection} is unavailable"
            )));
        }
        let mut feeds = self
            .feeds
            .lock()
            .map_err(|_| StoreError::Unavailable("feed registry poisoned".to_string()))?;
        let sender = feeds
            .entry(collection)
            .or_insert_with(|| broadcast::channel(self.feed_capacity).0);
        Ok(ChangeSubscription::new(collection, sender.subscribe()))
    }
}
