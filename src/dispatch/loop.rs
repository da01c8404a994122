//! The ten-step task dispatch loop (§4.H).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::bus::{BusError, ResponsePublisher, TaskSource};
use crate::rate::RateLimiter;
use crate::stats::{StatsHandle, TaskKind};
use crate::task::{FailureClassification, TaskResponse};

use super::registry::{HandlerRegistry, Resolution};

fn now_ms() -> i64 {
    // The dispatch loop needs wall-clock timestamps for §4.H step 8; callers
    // inject the clock via `published_ms`/elapsed `Instant`s wherever a test
    // needs determinism, but the loop's own "now" for stamping is the one
    // place a true wall clock is unavoidable.
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn task_kind_of(response: &TaskResponse) -> TaskKind {
    match &response.req_spec {
        crate::task::TaskSpec::List(_) => TaskKind::List,
        crate::task::TaskSpec::Copy(_) | crate::task::TaskSpec::CopyBundle(_) => TaskKind::Copy,
        crate::task::TaskSpec::DeleteBundle(_) => TaskKind::DeleteBundle,
    }
}

/// Drives one iteration of the dispatch loop to completion (one delivered
/// message in, zero or one published response out). Exposed standalone so
/// the outer `run_forever` loop and tests can both drive it directly.
#[instrument(skip(source, publisher, registry, rate_limiter, stats, cancel))]
pub async fn dispatch_one(source: &dyn TaskSource, publisher: &dyn ResponsePublisher, registry: &HandlerRegistry, rate_limiter: &RateLimiter, stats: &StatsHandle, cancel: &CancellationToken) -> Result<(), BusError> {
    let started_at = tokio::time::Instant::now();
    let delivered = source.next().await?;

    // Step 2: decode failure is non-recoverable; ack and drop so the
    // message never redelivers.
    let mut request = match source.decode(delivered.payload()) {
        Ok(request) => request,
        Err(source_err) => {
            warn!(error = %source_err, "dropping undecodable task message");
            delivered.ack().await?;
            return Ok(());
        }
    };
    request.published_ms = delivered.published_ms();

    // Step 3: job-run activity gate.
    if !rate_limiter.is_job_active(&request.job_run_id) {
        let response = TaskResponse::failure(
            request.task_id.clone(),
            request.job_run_id.clone(),
            env!("CARGO_PKG_VERSION"),
            request.spec.clone(),
            request.spec.clone(),
            FailureClassification::NotActiveJobRun,
            "job run is not active",
        );
        return finish(source, publisher, delivered, &request, response, started_at, stats, cancel).await;
    }

    // Step 4: registry resolution.
    let handler = match registry.resolve(&request.job_run_version) {
        Resolution::Handler(handler) => handler,
        resolution => {
            let failure = resolution.failure_tag().unwrap_or(FailureClassification::Unknown);
            let response = TaskResponse::failure(
                request.task_id.clone(),
                request.job_run_id.clone(),
                env!("CARGO_PKG_VERSION"),
                request.spec.clone(),
                request.spec.clone(),
                failure,
                format!("no handler for job-run version {}", request.job_run_version),
            );
            return finish(source, publisher, delivered, &request, response, started_at, stats, cancel).await;
        }
    };

    // Step 5: invoke the handler, recording duration/failure in stats.
    let response = handler.handle(request.clone(), cancel.clone()).await;
    let failed = response.status == crate::task::TaskStatus::Failure;
    stats.record_task_duration(task_kind_of(&response), started_at.elapsed(), failed);

    finish(source, publisher, delivered, &request, response, started_at, stats, cancel).await
}

#[allow(clippy::too_many_arguments)]
async fn finish(
    _source: &dyn TaskSource,
    publisher: &dyn ResponsePublisher,
    delivered: Box<dyn crate::bus::DeliveredTask>,
    request: &crate::task::TaskRequest,
    mut response: TaskResponse,
    started_at: tokio::time::Instant,
    _stats: &StatsHandle,
    cancel: &CancellationToken,
) -> Result<(), BusError> {
    // Step 6: echo invariant. A violation is an agent coding error; do not
    // acknowledge so the message redelivers and the bug is observable.
    if !response.echo_holds(&request.spec) {
        warn!(task_id = %request.task_id, "echo invariant violated, leaving message unacknowledged");
        return Ok(());
    }

    // Step 7: a mid-process cancellation means another agent should pick
    // this up; do not publish, do not acknowledge.
    if cancel.is_cancelled() {
        info!(task_id = %request.task_id, "dispatch canceled mid-process, skipping publish and ack");
        return Ok(());
    }

    // Step 8: stamp timestamps.
    response.timestamps.request_published_ms = request.published_ms;
    response.timestamps.processing_started_ms = now_ms() - started_at.elapsed().as_millis() as i64;
    response.timestamps.response_published_ms = now_ms();

    // Step 9: publish; failure to publish means redeliver (don't ack).
    if let Err(err) = publisher.publish(&response).await {
        warn!(task_id = %request.task_id, error = %err, "publish failed, leaving message unacknowledged");
        return Ok(());
    }

    // Step 10: acknowledge the original message.
    delivered.ack().await
}

/// Runs [`dispatch_one`] until the cancellation token fires.
pub async fn run_forever(source: Arc<dyn TaskSource>, publisher: Arc<dyn ResponsePublisher>, registry: Arc<HandlerRegistry>, rate_limiter: Arc<RateLimiter>, stats: StatsHandle, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("dispatch loop shutting down");
                return;
            }
            result = dispatch_one(source.as_ref(), publisher.as_ref(), &registry, &rate_limiter, &stats, &cancel) => {
                if let Err(err) = result {
                    warn!(error = %err, "dispatch loop iteration failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::task::{CopySpec, TaskRequest, TaskSpec};

    struct FakeDelivered {
        payload: Vec<u8>,
        acked: Arc<AtomicBool>,
    }

    #[async_trait]
    impl crate::bus::DeliveredTask for FakeDelivered {
        fn payload(&self) -> &[u8] {
            &self.payload
        }
        fn published_ms(&self) -> i64 {
            1000
        }
        async fn ack(self: Box<Self>) -> Result<(), BusError> {
            self.acked.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeSource {
        request: Mutex<Option<TaskRequest>>,
        acked: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TaskSource for FakeSource {
        async fn next(&self) -> Result<Box<dyn crate::bus::DeliveredTask>, BusError> {
            Ok(Box::new(FakeDelivered { payload: vec![], acked: self.acked.clone() }))
        }
        fn decode(&self, _payload: &[u8]) -> Result<TaskRequest, BusError> {
            self.request.lock().unwrap_or_else(|p| p.into_inner()).clone().ok_or(BusError::Decode("no fixture request set".into()))
        }
    }

    struct FakePublisher {
        published: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ResponsePublisher for FakePublisher {
        async fn publish(&self, _response: &TaskResponse) -> Result<(), BusError> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct EchoingHandler;

    #[async_trait]
    impl super::super::registry::TaskHandler for EchoingHandler {
        async fn handle(&self, request: TaskRequest, _cancel: CancellationToken) -> TaskResponse {
            TaskResponse::success(request.task_id, request.job_run_id, "1.0.0", request.spec.clone(), request.spec, crate::task::TaskLog::Copy(crate::task::CopyLog::default()))
        }
    }

    fn sample_request() -> TaskRequest {
        TaskRequest {
            task_id: "t1".into(),
            job_run_id: "job1".into(),
            job_run_version: "1.0.0".into(),
            issuance: 0,
            spec: TaskSpec::Copy(CopySpec::fresh("/a", "b", "o", 0)),
            published_ms: 0,
        }
    }

    #[tokio::test]
    async fn inactive_job_run_fails_fast_without_invoking_a_handler() {
        let acked = Arc::new(AtomicBool::new(false));
        let source = FakeSource {
            request: Mutex::new(Some(sample_request())),
            acked: acked.clone(),
        };
        let published = Arc::new(AtomicUsize::new(0));
        let publisher = FakePublisher { published: published.clone() };

        let mut handlers = std::collections::BTreeMap::new();
        handlers.insert(1u32, Arc::new(EchoingHandler) as Arc<dyn super::super::registry::TaskHandler>);
        let registry = HandlerRegistry::new(handlers).unwrap();

        let rate_limiter = RateLimiter::unlimited();
        let stats = crate::stats::spawn(None, None);
        let cancel = CancellationToken::new();

        dispatch_one(&source, &publisher, &registry, &rate_limiter, &stats, &cancel).await.unwrap();

        assert_eq!(published.load(Ordering::SeqCst), 1);
        assert!(acked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn active_job_run_dispatches_to_the_resolved_handler() {
        let acked = Arc::new(AtomicBool::new(false));
        let source = FakeSource {
            request: Mutex::new(Some(sample_request())),
            acked: acked.clone(),
        };
        let published = Arc::new(AtomicUsize::new(0));
        let publisher = FakePublisher { published: published.clone() };

        let mut handlers = std::collections::BTreeMap::new();
        handlers.insert(1u32, Arc::new(EchoingHandler) as Arc<dyn super::super::registry::TaskHandler>);
        let registry = HandlerRegistry::new(handlers).unwrap();

        let rate_limiter = RateLimiter::unlimited();
        rate_limiter.set_job_active("job1", true);
        let stats = crate::stats::spawn(None, None);
        let cancel = CancellationToken::new();

        dispatch_one(&source, &publisher, &registry, &rate_limiter, &stats, &cancel).await.unwrap();

        assert_eq!(published.load(Ordering::SeqCst), 1);
        assert!(acked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_before_publish_skips_both_publish_and_ack() {
        let acked = Arc::new(AtomicBool::new(false));
        let source = FakeSource {
            request: Mutex::new(Some(sample_request())),
            acked: acked.clone(),
        };
        let published = Arc::new(AtomicUsize::new(0));
        let publisher = FakePublisher { published: published.clone() };

        let mut handlers = std::collections::BTreeMap::new();
        handlers.insert(1u32, Arc::new(EchoingHandler) as Arc<dyn super::super::registry::TaskHandler>);
        let registry = HandlerRegistry::new(handlers).unwrap();

        let rate_limiter = RateLimiter::unlimited();
        rate_limiter.set_job_active("job1", true);
        let stats = crate::stats::spawn(None, None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        dispatch_one(&source, &publisher, &registry, &rate_limiter, &stats, &cancel).await.unwrap();

        assert_eq!(published.load(Ordering::SeqCst), 0);
        assert!(!acked.load(Ordering::SeqCst));
    }
}
