//! Task requests and the tagged union of specs they carry (§3).

use serde::{Deserialize, Serialize};

use super::copy_spec::{CopyBundleSpec, CopySpec};
use super::delete_spec::DeleteBundleSpec;
use super::list_spec::ListSpec;

/// Exactly one of these accompanies every [`TaskRequest`] and, echoed back,
/// every [`super::response::TaskResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskSpec {
    List(ListSpec),
    Copy(CopySpec),
    CopyBundle(CopyBundleSpec),
    DeleteBundle(DeleteBundleSpec),
}

impl TaskSpec {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::List(_) => "list",
            Self::Copy(_) => "copy",
            Self::CopyBundle(_) => "copy-bundle",
            Self::DeleteBundle(_) => "delete-bundle",
        }
    }
}

/// A task as delivered by the subscription, before dispatch (§4.H step 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub job_run_id: String,
    /// `major.minor.patch`; parsed by the registry (§4.I).
    pub job_run_version: String,
    /// Monotonic per-task resend counter, incremented by the DCP each time
    /// it redelivers the same logical task.
    pub issuance: u64,
    pub spec: TaskSpec,
    /// Bus-reported publish time of this request, in Unix epoch
    /// milliseconds; stamped onto the response at dispatch step 8.
    pub published_ms: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_spec_variant() {
        let spec = TaskSpec::Copy(CopySpec::fresh("/a", "b", "o", 0));
        assert_eq!(spec.kind(), "copy");
    }
}
