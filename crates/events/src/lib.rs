//! Lifecycle events, the activity-log boundary and change-feed payloads.

pub mod activity;
pub mod change;
pub mod event;
pub mod lifecycle;

pub use activity::{
    ActivityLog, ActivityLogError, InMemoryActivityLog, TracingActivityLog, record_best_effort,
};
pub use change::{ChangeBatch, ChangeKind, Collection, DocumentChange};
pub use event::Event;
pub use lifecycle::{LifecycleEvent, LifecycleEventKind};
