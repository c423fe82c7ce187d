//! Read-through TTL cache in front of a [`DocumentStore`].
//!
//! Entries are stamped with `cached_at` and served while younger than the
//! configured TTL. Writes go straight to the backing store and invalidate
//! every key they touch (whether or not the commit succeeded), so an
//! optimistic-concurrency retry always re-reads the authoritative version.
//! Change-feed batches invalidate whole collections via
//! [`DocumentStore::invalidate`].
//!
//! Each collection carries an invalidation epoch. A read only fills the cache
//! if no invalidation of its collection happened while it was in flight, so a
//! slow pre-commit read can never overwrite a post-commit invalidation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;
use uuid::Uuid;

use stockflow_core::{OrderId, ProductId, Versioned};
use stockflow_events::Collection;
use stockflow_inventory::InventoryItem;
use stockflow_purchasing::Order;

use crate::store::{ChangeSubscription, CommitReceipt, DocumentStore, StoreError, Transaction};

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    cached_at: DateTime<Utc>,
}

impl<T: Clone> CacheEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
        }
    }

    fn fresh(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> Option<T> {
        (now.signed_duration_since(self.cached_at) < ttl).then(|| self.value.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct CacheLayer<S> {
    inner: S,
    ttl: chrono::Duration,
    orders: RwLock<HashMap<OrderId, CacheEntry<Versioned<Order>>>>,
    items: RwLock<HashMap<ProductId, CacheEntry<Versioned<InventoryItem>>>>,
    order_list: RwLock<Option<CacheEntry<Vec<Order>>>>,
    item_list: RwLock<Option<CacheEntry<Vec<InventoryItem>>>>,
    order_epoch: AtomicU64,
    item_epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S> CacheLayer<S> {
    /// A zero TTL disables caching (every read goes to `inner`).
    pub fn new(inner: S, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            inner,
            ttl,
            orders: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
            order_list: RwLock::new(None),
            item_list: RwLock::new(None),
            order_epoch: AtomicU64::new(0),
            item_epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn keyed<K, V>(&self, map: &RwLock<HashMap<K, CacheEntry<V>>>, key: &K) -> Option<V>
    where
        K: Eq + Hash,
        V: Clone,
    {
        // A poisoned cache is just a miss.
        let found = map
            .read()
            .ok()
            .and_then(|m| m.get(key).and_then(|e| e.fresh(self.ttl, Utc::now())));
        self.record(found.is_some());
        found
    }

    fn listed<V: Clone>(&self, slot: &RwLock<Option<CacheEntry<V>>>) -> Option<V> {
        let found = slot
            .read()
            .ok()
            .and_then(|s| s.as_ref().and_then(|e| e.fresh(self.ttl, Utc::now())));
        self.record(found.is_some());
        found
    }

    fn enabled(&self) -> bool {
        self.ttl > chrono::Duration::zero()
    }

    fn epoch(&self, collection: Collection) -> &AtomicU64 {
        match collection {
            Collection::Orders => &self.order_epoch,
            Collection::Inventory => &self.item_epoch,
        }
    }

    fn current_epoch(&self, collection: Collection) -> u64 {
        self.epoch(collection).load(Ordering::SeqCst)
    }

    /// Bumped before entries are dropped; fills compare it under the write lock.
    fn bump_epoch(&self, collection: Collection) {
        self.epoch(collection).fetch_add(1, Ordering::SeqCst);
    }

    fn forget(&self, collection: Collection, document_id: Uuid) {
        self.bump_epoch(collection);
        match collection {
            Collection::Orders => {
                if let Ok(mut m) = self.orders.write() {
                    m.remove(&OrderId::from_uuid(document_id));
                }
                clear(&self.order_list);
            }
            Collection::Inventory => {
                if let Ok(mut m) = self.items.write() {
                    m.remove(&ProductId::from_uuid(document_id));
                }
                clear(&self.item_list);
            }
        }
    }

    fn forget_collection(&self, collection: Collection) {
        self.bump_epoch(collection);
        match collection {
            Collection::Orders => {
                if let Ok(mut m) = self.orders.write() {
                    m.clear();
                }
                clear(&self.order_list);
            }
            Collection::Inventory => {
                if let Ok(mut m) = self.items.write() {
                    m.clear();
                }
                clear(&self.item_list);
            }
        }
    }
}

fn clear<V>(slot: &RwLock<Option<CacheEntry<V>>>) {
    if let Ok(mut s) = slot.write() {
        *s = None;
    }
}

fn store_keyed<K: Eq + Hash, V: Clone>(
    map: &RwLock<HashMap<K, CacheEntry<V>>>,
    epoch: (&AtomicU64, u64),
    key: K,
    value: V,
) {
    if let Ok(mut m) = map.write() {
        if epoch.0.load(Ordering::SeqCst) == epoch.1 {
            m.insert(key, CacheEntry::new(value));
        }
    }
}

fn store_listed<V: Clone>(
    slot: &RwLock<Option<CacheEntry<V>>>,
    epoch: (&AtomicU64, u64),
    value: V,
) {
    if let Ok(mut s) = slot.write() {
        if epoch.0.load(Ordering::SeqCst) == epoch.1 {
            *s = Some(CacheEntry::new(value));
        }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for CacheLayer<S> {
    fn allocate_order_id(&self) -> OrderId {
        self.inner.allocate_order_id()
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Versioned<Order>>, StoreError> {
        if self.enabled() {
            if let Some(hit) = self.keyed(&self.orders, &id) {
                return Ok(Some(hit));
            }
        }
        let epoch = self.current_epoch(Collection::Orders);
        let found = self.inner.get_order(id).await?;
        // Absence is never cached; a later create must be visible immediately.
        if let (true, Some(doc)) = (self.enabled(), &found) {
            store_keyed(&self.orders, (&self.order_epoch, epoch), id, doc.clone());
        }
        Ok(found)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        if self.enabled() {
            if let Some(hit) = self.listed(&self.order_list) {
                return Ok(hit);
            }
        }
        let epoch = self.current_epoch(Collection::Orders);
        let orders = self.inner.list_orders().await?;
        if self.enabled() {
            store_listed(&self.order_list, (&self.order_epoch, epoch), orders.clone());
        }
        Ok(orders)
    }

    async fn get_item(
        &self,
        id: ProductId,
    ) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
        if self.enabled() {
            if let Some(hit) = self.keyed(&self.items, &id) {
                return Ok(Some(hit));
            }
        }
        let epoch = self.current_epoch(Collection::Inventory);
        let found = self.inner.get_item(id).await?;
        if let (true, Some(doc)) = (self.enabled(), &found) {
            store_keyed(&self.items, (&self.item_epoch, epoch), id, doc.clone());
        }
        Ok(found)
    }

    async fn resolve_item(
        &self,
        id: ProductId,
    ) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
        let found = self.inner.resolve_item(id).await?;
        if found.is_none() {
            self.forget(Collection::Inventory, *id.as_uuid());
        }
        Ok(found)
    }

    async fn list_items(&self) -> Result<Vec<InventoryItem>, StoreError> {
        if self.enabled() {
            if let Some(hit) = self.listed(&self.item_list) {
                return Ok(hit);
            }
        }
        let epoch = self.current_epoch(Collection::Inventory);
        let items = self.inner.list_items().await?;
        if self.enabled() {
            store_listed(&self.item_list, (&self.item_epoch, epoch), items.clone());
        }
        Ok(items)
    }

    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, StoreError> {
        let touched: Vec<(Collection, Uuid)> = tx
            .writes()
            .iter()
            .map(|w| (w.collection(), w.document_id()))
            .collect();

        let result = self.inner.commit(tx).await;

        for (collection, document_id) in touched {
            self.forget(collection, document_id);
        }
        if let Err(err) = &result {
            trace!(error = %err, "commit failed; touched cache entries dropped");
        }
        result
    }

    fn subscribe(&self, collection: Collection) -> Result<ChangeSubscription, StoreError> {
        self.inner.subscribe(collection)
    }

    fn invalidate(&self, collection: Collection) {
        self.forget_collection(collection);
        self.inner.invalidate(collection);
    }
}
