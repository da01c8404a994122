//! The concrete handler wiring every task-spec variant to its engine
//! (§1: "driving it through a copy engine, a directory-listing engine, and
//! a bundle-delete engine"). Registered into a [`super::registry::HandlerRegistry`]
//! under the major version(s) it supports.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::copy::{BundleCopyEngine, CopyEngine};
use crate::delete::DeleteEngine;
use crate::listing::{classify_list_error, ListEngine};
use crate::task::{FailureClassification, TaskLog, TaskRequest, TaskResponse, TaskSpec};

use super::registry::TaskHandler;

/// Routes a delivered [`TaskRequest`] to the engine matching its spec
/// variant and folds the engine's outcome into a [`TaskResponse`].
///
/// The cancellation token is threaded through per §5 but none of the four
/// engines currently poll it mid-operation; a task already in flight when
/// cancellation fires runs to completion and the dispatch loop's own step 7
/// is what actually suppresses the publish/ack (see `dispatch_loop::finish`).
pub struct DefaultTaskHandler {
    copy_engine: Arc<CopyEngine>,
    bundle_copy_engine: Arc<BundleCopyEngine>,
    delete_engine: Arc<DeleteEngine>,
    list_engine: Arc<ListEngine>,
    agent_version: String,
}

impl DefaultTaskHandler {
    #[must_use]
    pub fn new(copy_engine: Arc<CopyEngine>, bundle_copy_engine: Arc<BundleCopyEngine>, delete_engine: Arc<DeleteEngine>, list_engine: Arc<ListEngine>, agent_version: impl Into<String>) -> Self {
        Self {
            copy_engine,
            bundle_copy_engine,
            delete_engine,
            list_engine,
            agent_version: agent_version.into(),
        }
    }
}

#[async_trait]
impl TaskHandler for DefaultTaskHandler {
    async fn handle(&self, request: TaskRequest, _cancel: CancellationToken) -> TaskResponse {
        let TaskRequest { task_id, job_run_id, spec, .. } = request;

        match spec {
            TaskSpec::Copy(copy_spec) => {
                let req_spec = TaskSpec::Copy(copy_spec.clone());
                let outcome = self.copy_engine.run(copy_spec, &job_run_id).await;
                let resp_spec = TaskSpec::Copy(outcome.spec);
                if outcome.status == crate::task::EntryStatus::Success {
                    TaskResponse::success(task_id, job_run_id, self.agent_version.as_str(), req_spec, resp_spec, TaskLog::Copy(outcome.log))
                } else {
                    TaskResponse::failure(task_id, job_run_id, self.agent_version.as_str(), req_spec, resp_spec, outcome.failure, outcome.failure_message)
                }
            }

            TaskSpec::CopyBundle(bundle_spec) => {
                let req_spec = TaskSpec::CopyBundle(bundle_spec.clone());
                let (bundle, log, any_failed, failure) = self.bundle_copy_engine.run(bundle_spec, &job_run_id).await;
                let resp_spec = TaskSpec::CopyBundle(bundle);
                if any_failed {
                    TaskResponse::failure(task_id, job_run_id, self.agent_version.as_str(), req_spec, resp_spec, failure, "one or more entries in the bundle failed")
                } else {
                    TaskResponse::success(task_id, job_run_id, self.agent_version.as_str(), req_spec, resp_spec, TaskLog::CopyBundle(log))
                }
            }

            TaskSpec::DeleteBundle(bundle_spec) => {
                let req_spec = TaskSpec::DeleteBundle(bundle_spec.clone());
                let (bundle, log, any_failed) = self.delete_engine.run(bundle_spec).await;
                if any_failed {
                    let worst = worst_delete_failure(&bundle);
                    let resp_spec = TaskSpec::DeleteBundle(bundle);
                    TaskResponse::failure(task_id, job_run_id, self.agent_version.as_str(), req_spec, resp_spec, worst, "one or more objects in the bundle failed to delete")
                } else {
                    let resp_spec = TaskSpec::DeleteBundle(bundle);
                    TaskResponse::success(task_id, job_run_id, self.agent_version.as_str(), req_spec, resp_spec, TaskLog::DeleteBundle(log))
                }
            }

            TaskSpec::List(list_spec) => {
                let req_spec = TaskSpec::List(list_spec.clone());
                let resp_spec = req_spec.clone();
                match self.list_engine.run(&list_spec).await {
                    Ok(log) => TaskResponse::success(task_id, job_run_id, self.agent_version.as_str(), req_spec, resp_spec, TaskLog::List(log)),
                    Err(err) => {
                        let failure = classify_list_error(&err);
                        warn!(%task_id, %failure, error = %err, "listing task failed");
                        TaskResponse::failure(task_id, job_run_id, self.agent_version.as_str(), req_spec, resp_spec, failure, err.to_string())
                    }
                }
            }
        }
    }
}

/// §4.G/§7: the bundle's aggregate failure tag is its first failed entry's
/// own tag (each entry is already individually classified by
/// `delete::classify_delete_error`; unlike the copy bundle there is no
/// separate service-induced-aggregation rule for deletes in spec.md, so the
/// first failure found is surfaced as representative).
fn worst_delete_failure(bundle: &crate::task::delete_spec::DeleteBundleSpec) -> FailureClassification {
    bundle
        .entries
        .iter()
        .find(|e| e.status == crate::task::EntryStatus::Failed)
        .map(|e| e.failure)
        .unwrap_or(FailureClassification::Unknown)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use crate::copy::SinkClient;
    use crate::rate::RateLimiter;
    use crate::task::{CopySpec, TaskRequest};
    use reqwest::Client;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn handler_against(server: &MockServer) -> DefaultTaskHandler {
        let sink = Arc::new(SinkClient::new(Client::new(), server.uri(), "test-ua/1.0"));
        let limiter = Arc::new(RateLimiter::unlimited());
        limiter.set_job_active("job-1", true);
        let stats = crate::stats::spawn(None, None);
        let (_throughput_tracker, throughput) = crate::rate::ThroughputTracker::spawn(None);
        let copy_engine = Arc::new(CopyEngine::new(sink.clone(), limiter, crate::copy::CopyEngineConfig::default(), stats, throughput));
        let bundle_copy_engine = Arc::new(BundleCopyEngine::new(copy_engine.clone(), 4));
        let delete_engine = Arc::new(DeleteEngine::new(sink.clone(), 4));
        let list_engine = Arc::new(ListEngine::new(sink, crate::listing::ListEngineConfig::default()));
        DefaultTaskHandler::new(copy_engine, bundle_copy_engine, delete_engine, list_engine, "1.0.0-test")
    }

    #[tokio::test]
    async fn copy_task_succeeds_and_echoes_the_request_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "size": "5",
                "crc32c": base64::engine::general_purpose::STANDARD.encode(crc32c::crc32c(b"hello").to_be_bytes()),
            })))
            .mount(&server)
            .await;

        let handler = handler_against(&server).await;
        let spec = TaskSpec::Copy(CopySpec::fresh(path.to_string_lossy().to_string(), "b", "o", 0));
        let request = TaskRequest {
            task_id: "t1".into(),
            job_run_id: "job-1".into(),
            job_run_version: "1.0.0".into(),
            issuance: 0,
            spec: spec.clone(),
            published_ms: 0,
        };

        let response = handler.handle(request, CancellationToken::new()).await;
        assert!(response.echo_holds(&spec));
        assert_eq!(response.status, crate::task::TaskStatus::Success);
        assert!(matches!(response.log, Some(TaskLog::Copy(_))));
    }

    #[tokio::test]
    async fn delete_bundle_task_reports_failure_on_a_permission_error() {
        use crate::task::delete_spec::{DeleteBundleEntry, DeleteBundleSpec};

        let server = MockServer::start().await;
        Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(403)).mount(&server).await;

        let handler = handler_against(&server).await;
        let spec = TaskSpec::DeleteBundle(DeleteBundleSpec {
            entries: vec![DeleteBundleEntry::pending("b", "locked.txt", 0, 10)],
        });
        let request = TaskRequest {
            task_id: "t2".into(),
            job_run_id: "job-1".into(),
            job_run_version: "1.0.0".into(),
            issuance: 0,
            spec: spec.clone(),
            published_ms: 0,
        };

        let response = handler.handle(request, CancellationToken::new()).await;
        assert_eq!(response.status, crate::task::TaskStatus::Failure);
    }
}
