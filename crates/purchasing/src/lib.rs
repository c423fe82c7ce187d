//! Purchasing domain module (purchase orders and in-flight quantities).
//!
//! This crate contains business rules for purchase orders, implemented purely as
//! deterministic domain logic (no IO, no async, no storage).

pub mod order;
pub mod pending;

pub use order::{Order, OrderDraft, OrderStatus};
pub use pending::{PendingQuantityIndex, pending_qty, recompute};
