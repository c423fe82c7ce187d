//! `stockflow-core` — shared building blocks for the order/inventory engine.
//!
//! This crate contains **pure domain** primitives (no storage, no async).

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{OrderId, ProductId};
pub use version::{ExpectedVersion, Versioned};
