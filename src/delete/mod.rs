//! Delete engine: bounded-concurrency object deletion (§4.G).

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{instrument, warn};

use crate::copy::{SinkClient, SinkError};
use crate::task::copy_spec::EntryStatus;
use crate::task::delete_spec::{DeleteBundleEntry, DeleteBundleSpec};
use crate::task::failure::FailureClassification;
use crate::task::response::{DeleteBundleLog, DeleteEntryLog};

/// Minimum allowed concurrency value; mirrors the teacher's download engine
/// bound so a misconfigured value fails fast instead of degenerating to
/// serial or unbounded behavior.
pub const MIN_CONCURRENCY: usize = 1;
pub const DEFAULT_CONCURRENCY: usize = 10;
const MAX_RETRIES: u32 = 3;

fn is_retryable(failure: FailureClassification) -> bool {
    !matches!(failure, FailureClassification::Permission | FailureClassification::PreconditionFailed)
}

fn classify_delete_error(error: &SinkError) -> FailureClassification {
    match error {
        SinkError::PreconditionFailed { .. } => FailureClassification::PreconditionFailed,
        SinkError::Status { status, .. } if status.as_u16() == 403 => FailureClassification::Permission,
        _ => FailureClassification::Unknown,
    }
}

/// Runs one entry's delete with up to [`MAX_RETRIES`] attempts, normalizing
/// a sink-reported not-found to success (B4).
async fn delete_one(sink: &SinkClient, entry: &mut DeleteBundleEntry) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match sink.delete_object(&entry.dst_bucket, &entry.dst_object, entry.generation_match).await {
            Ok(()) => {
                entry.status = EntryStatus::Success;
                entry.failure = FailureClassification::Unset;
                entry.failure_message.clear();
                return;
            }
            Err(source) => {
                let failure = classify_delete_error(&source);
                if attempt >= MAX_RETRIES || !is_retryable(failure) {
                    warn!(attempt, bucket = %entry.dst_bucket, object = %entry.dst_object, %failure, "delete failed");
                    entry.status = EntryStatus::Failed;
                    entry.failure = failure;
                    entry.failure_message = source.to_string();
                    return;
                }
            }
        }
    }
}

/// Executes a [`DeleteBundleSpec`], skipping terminal entries on
/// re-delivery and retrying everything else.
pub struct DeleteEngine {
    sink: Arc<SinkClient>,
    concurrency: usize,
}

impl DeleteEngine {
    #[must_use]
    pub fn new(sink: Arc<SinkClient>, concurrency: usize) -> Self {
        Self {
            sink,
            concurrency: concurrency.max(MIN_CONCURRENCY),
        }
    }

    #[instrument(skip(self, bundle))]
    pub async fn run(&self, mut bundle: DeleteBundleSpec) -> (DeleteBundleSpec, DeleteBundleLog, bool) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let pending: Vec<usize> = bundle.entries.iter().enumerate().filter(|(_, e)| e.needs_work()).map(|(i, _)| i).collect();

        let mut handles = Vec::with_capacity(pending.len());
        for index in pending {
            let sink = self.sink.clone();
            let semaphore = semaphore.clone();
            let mut entry = bundle.entries[index].clone();
            handles.push((
                index,
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    delete_one(&sink, &mut entry).await;
                    entry
                }),
            ));
        }

        let mut log = DeleteBundleLog::default();
        let mut any_failed = false;

        for (index, handle) in handles {
            let entry = match handle.await {
                Ok(entry) => entry,
                Err(join_error) => {
                    let mut entry = bundle.entries[index].clone();
                    entry.status = EntryStatus::Failed;
                    entry.failure = FailureClassification::Unknown;
                    entry.failure_message = join_error.to_string();
                    entry
                }
            };

            match entry.status {
                EntryStatus::Success => {
                    log.objects_deleted += 1;
                    log.bytes_deleted += entry.size;
                }
                EntryStatus::Failed => {
                    any_failed = true;
                    log.objects_failed += 1;
                    log.bytes_failed += entry.size;
                }
                EntryStatus::Unset => {}
            }
            log.entries.push(DeleteEntryLog {
                dst_bucket: entry.dst_bucket.clone(),
                dst_object: entry.dst_object.clone(),
                size: entry.size,
                status: entry.status,
            });
            bundle.entries[index] = entry;
        }

        (bundle, log, any_failed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::Client;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn absent_object_delete_reports_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let sink = Arc::new(SinkClient::new(Client::new(), server.uri(), "test-ua/1.0"));
        let engine = DeleteEngine::new(sink, DEFAULT_CONCURRENCY);
        let bundle = DeleteBundleSpec {
            entries: vec![DeleteBundleEntry::pending("b", "gone.txt", 0, 123)],
        };

        let (bundle, log, any_failed) = engine.run(bundle).await;
        assert!(!any_failed);
        assert_eq!(log.objects_deleted, 1);
        assert_eq!(bundle.entries[0].status, EntryStatus::Success);
    }

    #[tokio::test]
    async fn permission_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(403)).expect(1).mount(&server).await;

        let sink = Arc::new(SinkClient::new(Client::new(), server.uri(), "test-ua/1.0"));
        let engine = DeleteEngine::new(sink, DEFAULT_CONCURRENCY);
        let bundle = DeleteBundleSpec {
            entries: vec![DeleteBundleEntry::pending("b", "locked.txt", 0, 5)],
        };

        let (bundle, log, any_failed) = engine.run(bundle).await;
        assert!(any_failed);
        assert_eq!(log.objects_failed, 1);
        assert_eq!(bundle.entries[0].failure, FailureClassification::Permission);
    }

    #[test]
    fn retryable_excludes_permission_and_precondition() {
        assert!(!is_retryable(FailureClassification::Permission));
        assert!(!is_retryable(FailureClassification::PreconditionFailed));
        assert!(is_retryable(FailureClassification::Unknown));
    }
}
