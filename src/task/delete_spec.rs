//! Delete-bundle task specification (§3, §4.G).

use serde::{Deserialize, Serialize};

use super::copy_spec::EntryStatus;
use super::failure::FailureClassification;

/// One object to delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteBundleEntry {
    pub dst_bucket: String,
    pub dst_object: String,
    pub generation_match: i64,
    pub size: u64,
    pub status: EntryStatus,
    pub failure: FailureClassification,
    pub failure_message: String,
}

impl DeleteBundleEntry {
    #[must_use]
    pub fn pending(dst_bucket: impl Into<String>, dst_object: impl Into<String>, generation_match: i64, size: u64) -> Self {
        Self {
            dst_bucket: dst_bucket.into(),
            dst_object: dst_object.into(),
            generation_match,
            size,
            status: EntryStatus::Unset,
            failure: FailureClassification::Unset,
            failure_message: String::new(),
        }
    }

    #[must_use]
    pub fn needs_work(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// An ordered collection of per-object delete entries executed as one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteBundleSpec {
    pub entries: Vec<DeleteBundleEntry>,
}

impl DeleteBundleSpec {
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.needs_work()).count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn terminal_entries_are_skipped_on_redelivery() {
        let mut entry = DeleteBundleEntry::pending("b", "o", 5, 19);
        assert!(entry.needs_work());
        entry.status = EntryStatus::Failed;
        assert!(!entry.needs_work());
    }
}
