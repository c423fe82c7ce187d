//! Inventory documents and low-stock evaluation.
//!
//! Inventory items are owned by the product-management collaborator; this
//! crate only models what the engine reads and the receipt-driven updates it
//! is allowed to make (quantity and cost).

pub mod item;
pub mod low_stock;

pub use item::InventoryItem;
pub use low_stock::{
    StockAssessment, evaluate, is_low, is_out_of_stock, suggested_reorder_quantity,
};
