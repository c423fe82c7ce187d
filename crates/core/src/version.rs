//! Document versions for optimistic concurrency.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A document together with the store version it was read at.
///
/// Versions start at 1 on insert and increase by one on every committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub doc: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, doc: T) -> Self {
        Self { version, doc }
    }

    /// Expectation that matches only this exact read.
    pub fn expected(&self) -> ExpectedVersion {
        ExpectedVersion::Exact(self.version)
    }

    pub fn into_doc(self) -> T {
        self.doc
    }
}

/// Optimistic concurrency expectation for a document write.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Skip version checking (blind upsert).
    Any,
    /// The document must not exist yet.
    Absent,
    /// Require the document to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// `actual` is `None` when the document does not exist.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Absent, Some(_)) => false,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            (ExpectedVersion::Exact(_), None) => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_requires_matching_version() {
        assert!(ExpectedVersion::Exact(3).matches(Some(3)));
        assert!(!ExpectedVersion::Exact(3).matches(Some(4)));
        assert!(!ExpectedVersion::Exact(3).matches(None));
    }

    #[test]
    fn absent_only_matches_missing_documents() {
        assert!(ExpectedVersion::Absent.matches(None));
        assert!(ExpectedVersion::Absent.check(Some(1)).is_err());
        assert!(ExpectedVersion::Any.check(None).is_ok());
    }
}
