//! Activity-logging collaborator boundary.
//!
//! Logging is best-effort: a failing sink is reported through `tracing` and
//! otherwise ignored. It never rolls back a committed order/inventory write.

use std::sync::Mutex;

use thiserror::Error;

use crate::{Event, LifecycleEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivityLogError {
    #[error("activity sink unavailable: {0}")]
    Unavailable(String),
    #[error("activity sink rejected event: {0}")]
    Rejected(String),
}

/// Receives structured lifecycle events.
pub trait ActivityLog: Send + Sync {
    fn record(&self, event: &LifecycleEvent) -> Result<(), ActivityLogError>;
}

impl<L> ActivityLog for std::sync::Arc<L>
where
    L: ActivityLog + ?Sized,
{
    fn record(&self, event: &LifecycleEvent) -> Result<(), ActivityLogError> {
        (**self).record(event)
    }
}

/// Record an event, swallowing (but logging) sink failures.
pub fn record_best_effort(log: &dyn ActivityLog, event: &LifecycleEvent) {
    if let Err(err) = log.record(event) {
        tracing::warn!(
            event_type = event.event_type(),
            order_id = %event.order_id,
            error = %err,
            "activity log write failed; continuing"
        );
    }
}

/// Activity log that emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityLog;

impl ActivityLog for TracingActivityLog {
    fn record(&self, event: &LifecycleEvent) -> Result<(), ActivityLogError> {
        tracing::info!(
            target: "stockflow::activity",
            event_type = event.event_type(),
            order_id = %event.order_id,
            product_id = %event.product_id,
            detail = %event.detail,
        );
        Ok(())
    }
}

/// In-memory activity log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(_) => vec![],
        }
    }
}

impl ActivityLog for InMemoryActivityLog {
    fn record(&self, event: &LifecycleEvent) -> Result<(), ActivityLogError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| ActivityLogError::Unavailable("lock poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::{OrderId, ProductId};

    struct BrokenSink;

    impl ActivityLog for BrokenSink {
        fn record(&self, _event: &LifecycleEvent) -> Result<(), ActivityLogError> {
            Err(ActivityLogError::Unavailable("disk full".to_string()))
        }
    }

    #[test]
    fn best_effort_swallows_sink_failures() {
        let event = LifecycleEvent::order_created(OrderId::new(), ProductId::new(), "created");
        record_best_effort(&BrokenSink, &event);
    }

    #[test]
    fn in_memory_log_keeps_events_in_order() {
        let log = InMemoryActivityLog::new();
        let order_id = OrderId::new();
        let product_id = ProductId::new();
        record_best_effort(&log, &LifecycleEvent::order_created(order_id, product_id, "a"));
        record_best_effort(&log, &LifecycleEvent::status_changed(order_id, product_id, "b"));

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detail, "a");
        assert_eq!(events[1].detail, "b");
    }
}
