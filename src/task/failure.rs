//! The closed set of failure classification tags carried on task responses.
//!
//! Mirrors the taxonomy the DCP and agent both key off of: every failure the
//! core can produce maps onto exactly one of these variants, in the order
//! they are declared here (the order is part of the wire contract, not
//! incidental).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed-set failure classification attached to a failed [`crate::task::TaskResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClassification {
    Unset,
    Unknown,
    FileModifiedDuringCopy,
    HashMismatch,
    PreconditionFailed,
    FileNotFound,
    Permission,
    ServicePermission,
    NotActiveJobRun,
    AgentUnsupportedVersion,
    ServiceUnsupportedVersion,
    TaskTypeUnsupportedVersion,
    BlacklistedAgentVersion,
    SourceDirNotFound,
    InvalidFileName,
    NotServiceInducedUnknown,
    BucketNotFound,
    MetadataObjectNotFound,
    ResumableIdGone,
}

impl FailureClassification {
    /// Whether this tag represents a failure caused by the sink/service rather
    /// than local input. Used by the bundle aggregation rule in §4.F.6.
    #[must_use]
    pub fn is_service_induced(self) -> bool {
        matches!(self, Self::Unknown | Self::HashMismatch)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Unknown => "unknown",
            Self::FileModifiedDuringCopy => "file-modified-during-copy",
            Self::HashMismatch => "hash-mismatch",
            Self::PreconditionFailed => "precondition-failed",
            Self::FileNotFound => "file-not-found",
            Self::Permission => "permission",
            Self::ServicePermission => "service-permission",
            Self::NotActiveJobRun => "not-active-job-run",
            Self::AgentUnsupportedVersion => "agent-unsupported-version",
            Self::ServiceUnsupportedVersion => "service-unsupported-version",
            Self::TaskTypeUnsupportedVersion => "task-type-unsupported-version",
            Self::BlacklistedAgentVersion => "blacklisted-agent-version",
            Self::SourceDirNotFound => "source-dir-not-found",
            Self::InvalidFileName => "invalid-file-name",
            Self::NotServiceInducedUnknown => "not-service-induced-unknown",
            Self::BucketNotFound => "bucket-not-found",
            Self::MetadataObjectNotFound => "metadata-object-not-found",
            Self::ResumableIdGone => "resumable-id-gone",
        }
    }
}

impl fmt::Display for FailureClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn service_induced_tags_are_exactly_unknown_and_hash_mismatch() {
        let service_induced: Vec<_> = [
            FailureClassification::Unknown,
            FailureClassification::HashMismatch,
            FailureClassification::PreconditionFailed,
            FailureClassification::FileNotFound,
            FailureClassification::Permission,
        ]
        .into_iter()
        .filter(|tag| tag.is_service_induced())
        .collect();

        assert_eq!(
            service_induced,
            vec![
                FailureClassification::Unknown,
                FailureClassification::HashMismatch
            ]
        );
    }

    #[test]
    fn display_matches_wire_string() {
        assert_eq!(
            FailureClassification::FileModifiedDuringCopy.to_string(),
            "file-modified-during-copy"
        );
        assert_eq!(FailureClassification::Unset.to_string(), "unset");
    }
}
