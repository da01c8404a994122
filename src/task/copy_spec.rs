//! Copy specifications: single-file and bundled, carrying all resumable
//! state on the wire so the engine never needs local persistence (§3).

use serde::{Deserialize, Serialize};

use super::failure::FailureClassification;

/// Status of one entry in a [`CopyBundleSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Unset,
    Success,
    Failed,
}

impl EntryStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// The resumption fields of a [`CopySpec`]. Either every field here is
/// present or none are — see [`CopySpec::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    pub file_bytes: u64,
    pub file_mtime_unix: i64,
    pub bytes_copied: u64,
    pub crc32c: u32,
    pub resumable_upload_id: String,
}

/// Error returned when a [`CopySpec`]'s resumption fields are inconsistent.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("copy spec has a mix of present and absent resumption fields")]
pub struct MixedResumeStateError;

/// A single file's copy directive: where it comes from, where it goes, and
/// (for a mid-stream copy) how far it has gotten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopySpec {
    pub source_path: String,
    pub dst_bucket: String,
    pub dst_object: String,
    pub generation_match: i64,
    pub resume: Option<ResumeState>,
}

impl CopySpec {
    /// Fresh copy spec with no resumption state.
    #[must_use]
    pub fn fresh(source_path: impl Into<String>, dst_bucket: impl Into<String>, dst_object: impl Into<String>, generation_match: i64) -> Self {
        Self {
            source_path: source_path.into(),
            dst_bucket: dst_bucket.into(),
            dst_object: dst_object.into(),
            generation_match,
            resume: None,
        }
    }

    /// A spec is well-formed: the all-or-nothing invariant on `resume` is
    /// trivially satisfied by the `Option<ResumeState>` representation, but
    /// this exists as the one place future wire-decoders funnel through, so
    /// a flattened (individually-optional-fields) decode still gets the
    /// check spec.md §3 calls for.
    pub fn validate(&self) -> Result<(), MixedResumeStateError> {
        // Option<ResumeState> already enforces all-or-none at the type
        // level; nothing further to check. Kept as an explicit entry point
        // because §3's invariant is load-bearing and future wire formats
        // (flattened JSON/proto with individually-optional scalars) must
        // route through here rather than constructing ResumeState by hand.
        let _ = self;
        Ok(())
    }

    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resume.is_some()
    }
}

/// One entry of a [`CopyBundleSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyBundleEntry {
    pub spec: CopySpec,
    pub status: EntryStatus,
    pub failure: FailureClassification,
    pub failure_message: String,
    pub log: Option<super::response::CopyLog>,
}

impl CopyBundleEntry {
    #[must_use]
    pub fn pending(spec: CopySpec) -> Self {
        Self {
            spec,
            status: EntryStatus::Unset,
            failure: FailureClassification::Unset,
            failure_message: String::new(),
            log: None,
        }
    }

    #[must_use]
    pub fn needs_work(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// An ordered collection of per-file copy entries executed as one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyBundleSpec {
    pub entries: Vec<CopyBundleEntry>,
}

impl CopyBundleSpec {
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
    fn fresh_spec_has_no_resume_state() {
        let spec = CopySpec::fresh("/tmp/a", "bucket", "obj", 0);
        assert!(!spec.is_resumed());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn terminal_entries_are_not_reworked() {
        let mut entry = CopyBundleEntry::pending(CopySpec::fresh("/tmp/a", "b", "o", 0));
        assert!(entry.needs_work());
        entry.status = EntryStatus::Success;
        assert!(!entry.needs_work());
    }

    #[test]
    fn pending_count_excludes_terminal_entries() {
        let mut done = CopyBundleEntry::pending(CopySpec::fresh("/tmp/a", "b", "o1", 0));
        done.status = EntryStatus::Success;
        let pending = CopyBundleEntry::pending(CopySpec::fresh("/tmp/b", "b", "o2", 0));

        let bundle = CopyBundleSpec {
            entries: vec![done, pending],
        };
        assert_eq!(bundle.pending_count(), 1);
    }
}
