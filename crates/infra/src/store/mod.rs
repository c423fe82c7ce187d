//! Document store boundary.
//!
//! Orders and inventory items live as versioned documents. Every write goes
//! through [`DocumentStore::commit`], which applies a batch of
//! compare-and-set writes atomically and then fans the resulting
//! [`ChangeBatch`](stockflow_events::ChangeBatch) out to collection
//! subscribers.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryDocumentStore;
pub use r#trait::{
    ChangeSubscription, CommitReceipt, DocumentStore, FeedError, StoreError, Transaction, TxWrite,
};
