//! Change-feed payloads delivered by the document store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collections the engine subscribes to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Orders,
    Inventory,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Orders, Collection::Inventory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::Inventory => "inventory",
        }
    }
}

impl core::fmt::Display for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub document_id: Uuid,
    /// Version after the change; for removals, the last version that existed.
    pub version: u64,
}

/// One committed write (or transaction) as seen by a collection subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub collection: Collection,
    /// Store-wide commit sequence; increases with every committed transaction.
    pub sequence: u64,
    pub changes: Vec<DocumentChange>,
    pub committed_at: DateTime<Utc>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn touches(&self, document_id: Uuid) -> bool {
        self.changes.iter().any(|c| c.document_id == document_id)
    }
}
