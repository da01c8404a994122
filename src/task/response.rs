//! Task responses and the structured, per-kind logs they carry (§3, §4.F.2,
//! §4.F.4, §4.G, §4.E).

use serde::{Deserialize, Serialize};

use super::failure::FailureClassification;
use super::request::TaskSpec;

/// Per-file copy outcome, filled in by the entire-file or resumable-chunk
/// paths (§4.F.2, §4.F.4).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopyLog {
    pub src_size: u64,
    pub src_crc32c: u32,
    pub dst_size: u64,
    pub dst_crc32c: u32,
    pub dst_mtime_unix: i64,
    pub dst_md5_base64: String,
    pub bytes_copied: u64,
}

/// Aggregate log for a [`super::copy_spec::CopyBundleSpec`] (§4.F.6, P7).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopyBundleLog {
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub files_failed: u64,
    pub bytes_failed: u64,
}

/// Listing engine summary (§4.E step 5).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListLog {
    pub files_emitted: u64,
    pub bytes_found: u64,
    pub dirs_discovered: u64,
    pub dirs_walked: u64,
}

/// Per-object delete outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEntryLog {
    pub dst_bucket: String,
    pub dst_object: String,
    pub size: u64,
    pub status: super::copy_spec::EntryStatus,
}

/// Aggregate log for a [`super::delete_spec::DeleteBundleSpec`] (§4.G, B4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteBundleLog {
    pub objects_deleted: u64,
    pub bytes_deleted: u64,
    pub objects_failed: u64,
    pub bytes_failed: u64,
    pub entries: Vec<DeleteEntryLog>,
}

/// The structured, task-kind-specific body of a [`TaskResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskLog {
    Copy(CopyLog),
    CopyBundle(CopyBundleLog),
    List(ListLog),
    DeleteBundle(DeleteBundleLog),
}

/// Overall task outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Success,
    Failure,
}

/// Wall-clock timestamps stamped onto a response by the dispatch loop
/// (§4.H step 8), expressed as Unix epoch milliseconds so the type stays
/// serde-friendly without pulling in a time crate the teacher never used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTimestamps {
    pub request_published_ms: i64,
    pub processing_started_ms: i64,
    pub response_published_ms: i64,
}

/// The response the dispatch loop publishes for every task it processes
/// (except the not-publish cases of §4.H steps 6-7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub job_run_id: String,
    pub agent_version: String,
    pub status: TaskStatus,
    pub failure: FailureClassification,
    pub failure_message: String,
    pub log: Option<TaskLog>,
    /// Echoed verbatim from the request; checked bit-for-bit by the echo
    /// invariant (P3, §4.H step 6).
    pub req_spec: TaskSpec,
    /// The updated spec carrying resumable progress, if any.
    pub resp_spec: TaskSpec,
    pub timestamps: ResponseTimestamps,
}

impl TaskResponse {
    #[must_use]
    pub fn success(task_id: impl Into<String>, job_run_id: impl Into<String>, agent_version: impl Into<String>, req_spec: TaskSpec, resp_spec: TaskSpec, log: TaskLog) -> Self {
        Self {
            task_id: task_id.into(),
            job_run_id: job_run_id.into(),
            agent_version: agent_version.into(),
            status: TaskStatus::Success,
            failure: FailureClassification::Unset,
            failure_message: String::new(),
            log: Some(log),
            req_spec,
            resp_spec,
            timestamps: ResponseTimestamps::default(),
        }
    }

    #[must_use]
    pub fn failure(task_id: impl Into<String>, job_run_id: impl Into<String>, agent_version: impl Into<String>, req_spec: TaskSpec, resp_spec: TaskSpec, failure: FailureClassification, failure_message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            job_run_id: job_run_id.into(),
            agent_version: agent_version.into(),
            status: TaskStatus::Failure,
            failure,
            failure_message: failure_message.into(),
            log: None,
            req_spec,
            resp_spec,
            timestamps: ResponseTimestamps::default(),
        }
    }

    /// The echo invariant checked at dispatch step 6 (P3).
    #[must_use]
    pub fn echo_holds(&self, request_spec: &TaskSpec) -> bool {
        &self.req_spec == request_spec
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::copy_spec::CopySpec;

    #[test]
    fn echo_invariant_detects_mismatch() {
        let req_spec = TaskSpec::Copy(CopySpec::fresh("/a", "b", "o", 0));
        let wrong_spec = TaskSpec::Copy(CopySpec::fresh("/a", "b", "o", 1));
        let resp = TaskResponse::success("t1", "j1", "1.0.0", req_spec.clone(), req_spec.clone(), TaskLog::Copy(CopyLog::default()));

        assert!(resp.echo_holds(&req_spec));
        assert!(!resp.echo_holds(&wrong_spec));
    }
}
