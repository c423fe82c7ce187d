//! Demo: seed a few items, walk orders through their lifecycle and print the
//! resulting views.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use tracing::info;

use stockflow_core::ProductId;
use stockflow_events::TracingActivityLog;
use stockflow_infra::{EngineConfig, InMemoryDocumentStore, StockflowEngine};
use stockflow_inventory::InventoryItem;
use stockflow_purchasing::{OrderDraft, OrderStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init_pretty();

    let config = EngineConfig::from_env();
    let store = Arc::new(InMemoryDocumentStore::new());

    let bolts = ProductId::new();
    let filters = ProductId::new();
    let gaskets = ProductId::new();
    for item in [
        InventoryItem::new(bolts, "M8 bolt")
            .with_quantity(3)
            .with_min_quantity(20)
            .with_cost(Decimal::new(12, 2)),
        InventoryItem::new(filters, "Oil filter")
            .with_quantity(0)
            .with_min_quantity(5)
            .with_cost(Decimal::new(899, 2)),
        InventoryItem::new(gaskets, "Head gasket")
            .with_quantity(40)
            .with_min_quantity(10)
            .with_cost(Decimal::new(2450, 2)),
    ] {
        store.seed_item(item).context("seeding inventory")?;
    }

    let engine = StockflowEngine::start(store, config, Arc::new(TracingActivityLog));

    let bolt_order = engine
        .create_order(OrderDraft::new(bolts, "M8 bolt", 50, Decimal::new(11, 2), "Fastenal"))
        .await?;
    engine
        .update_status(bolt_order.id, OrderStatus::Ordered, None)
        .await?;
    engine
        .update_status(bolt_order.id, OrderStatus::PartiallyReceived, Some(20))
        .await?;

    let filter_order = engine
        .create_order(OrderDraft::new(filters, "Oil filter", 12, Decimal::new(850, 2), "Mann"))
        .await?;
    engine
        .update_status(filter_order.id, OrderStatus::Backordered, None)
        .await?;

    let gasket_order = engine
        .create_order(OrderDraft::new(gaskets, "Head gasket", 5, Decimal::new(2400, 2), "Elring"))
        .await?;
    engine
        .update_status(gasket_order.id, OrderStatus::Cancelled, None)
        .await?;

    // Longest default throttle window is two seconds.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let views = engine.projections();
    info!(health = ?views.sync_health(), "views settled");
    println!("orders:\n{}", serde_json::to_string_pretty(&*views.orders())?);
    println!("low stock:\n{}", serde_json::to_string_pretty(&*views.low_stock())?);
    println!("counts:\n{}", serde_json::to_string_pretty(&*views.counts())?);

    engine.shutdown().await;
    Ok(())
}
