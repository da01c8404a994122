//! Single-file and bundle copy orchestration (§4.F.1, §4.F.5, §4.F.6).

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{instrument, warn};

use crate::rate::{RateLimiter, ThroughputWriter};
use crate::stats::StatsHandle;
use crate::task::{CopyBundleLog, CopyBundleSpec, CopyLog, CopySpec, EntryStatus, FailureClassification, PulseStats, ResumeState};

use super::pipeline::PipelineBuilder;
use super::sink_client::{ChunkOutcome, SinkClient, SinkError};

const SNIFF_LEN: usize = 512;
const DEFAULT_COPY_WORK_DURATION: Duration = Duration::from_secs(60);
const READ_CHUNK: usize = 64 * 1024;
/// §4.F.7 Open Question: hard-coded for the experimental download branch.
const DOWNLOAD_CHUNK: usize = 32 * 1024 * 1024;
const SINK_SCHEME_PREFIX: &str = "sink://";

/// §4.F.4's back-off loop bounds: the PUT/POST retries while
/// `SinkError::is_retryable` holds, doubling the delay each attempt.
const MAX_CHUNK_RETRIES: u32 = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(16);

/// Delay before retry attempt `attempt` (1-indexed, the attempt that just
/// failed): doubles `RETRY_BASE_DELAY` per attempt up to `RETRY_MAX_DELAY`,
/// plus up to a quarter of the capped delay in jitter so concurrent bundle
/// workers retrying the same failure don't all wake at once.
fn retry_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(8);
    let capped_ms = (RETRY_BASE_DELAY.as_millis() as u64).saturating_mul(1u64 << exponent).min(RETRY_MAX_DELAY.as_millis() as u64);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped_ms / 4 + 1);
    Duration::from_millis(capped_ms + jitter_ms)
}

/// Retries `attempt_fn` while the error it returns is retryable (§4.F.4),
/// sleeping with [`retry_backoff`] between attempts. Returns the final
/// result paired with how many retries were spent getting there, so the
/// caller can fold the count into `PulseStats::copy_retries`. The body
/// passed to each attempt must be rebuilt by the closure since a
/// `reqwest::Body` is consumed by the request it fails.
async fn send_with_retry<T, F, Fut>(mut attempt_fn: F) -> (Result<T, SinkError>, u64)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SinkError>>,
{
    let mut attempt = 0u32;
    let mut retries = 0u64;
    loop {
        attempt += 1;
        match attempt_fn().await {
            Ok(value) => return (Ok(value), retries),
            Err(source) => {
                if attempt >= MAX_CHUNK_RETRIES || !source.is_retryable() {
                    return (Err(source), retries);
                }
                retries += 1;
                let delay = retry_backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %source, "retrying sink request after backoff");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CopyEngineError {
    #[error("source open/stat failed: {source}")]
    Io { source: std::io::Error },
    #[error("sink request failed: {source}")]
    Sink { source: SinkError },
}

impl CopyEngineError {
    #[must_use]
    pub fn io(source: std::io::Error) -> Self {
        Self::Io { source }
    }

    #[must_use]
    pub fn sink(source: SinkError) -> Self {
        Self::Sink { source }
    }
}

/// The outcome of driving one [`CopySpec`] to as much progress as this
/// invocation made, paired with the failure tag if it ended badly.
pub struct CopyOutcome {
    pub spec: CopySpec,
    pub log: CopyLog,
    pub status: EntryStatus,
    pub failure: FailureClassification,
    pub failure_message: String,
}

impl CopyOutcome {
    fn success(spec: CopySpec, log: CopyLog) -> Self {
        Self {
            spec,
            log,
            status: EntryStatus::Success,
            failure: FailureClassification::Unset,
            failure_message: String::new(),
        }
    }

    fn failure(spec: CopySpec, log: CopyLog, failure: FailureClassification, message: impl Into<String>) -> Self {
        Self {
            spec,
            log,
            status: EntryStatus::Failed,
            failure,
            failure_message: message.into(),
        }
    }
}

/// Tunables a handler threads through to the engine; mirrors the relevant
/// slice of `AgentConfig` (§6) without coupling the engine to the whole
/// config struct.
#[derive(Debug, Clone)]
pub struct CopyEngineConfig {
    pub copy_entire_file_limit: u64,
    pub chunk_size: u64,
    pub copy_work_duration: Duration,
    pub buffer_capacity: usize,
}

impl Default for CopyEngineConfig {
    fn default() -> Self {
        Self {
            copy_entire_file_limit: 8 * 1024 * 1024,
            chunk_size: 8 * 1024 * 1024,
            copy_work_duration: DEFAULT_COPY_WORK_DURATION,
            buffer_capacity: READ_CHUNK,
        }
    }
}

fn sniff_content_type(prefix: &[u8]) -> &'static str {
    if prefix.starts_with(b"%PDF") {
        "application/pdf"
    } else if prefix.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if prefix.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if std::str::from_utf8(prefix).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

/// §4.F.1 step 1: inverse-direction classification by URL-scheme prefix.
#[must_use]
pub fn is_download(source_path: &str) -> bool {
    source_path.starts_with(SINK_SCHEME_PREFIX)
}

struct OpenedSource {
    file: File,
    size: u64,
    mtime_unix: i64,
}

async fn open_and_stat(source_path: &str) -> Result<OpenedSource, std::io::Error> {
    let file = File::open(source_path).await?;
    let meta = file.metadata().await?;
    let mtime_unix = meta.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map_or(0, |d| d.as_secs() as i64);
    Ok(OpenedSource { file, size: meta.len(), mtime_unix })
}

/// §4.F.1 step 2/4: verifies a stat snapshot matches the spec's recorded
/// size/mtime when resuming, and the final post-write check either way.
fn verify_unchanged(expected_size: u64, expected_mtime: i64, actual_size: u64, actual_mtime: i64) -> Result<(), FailureClassification> {
    if expected_size != actual_size || expected_mtime != actual_mtime {
        return Err(FailureClassification::FileModifiedDuringCopy);
    }
    Ok(())
}

/// Drives one [`CopySpec`] through the single-file copy state machine
/// (§4.F.1–§4.F.5): classification, entire-file vs resumable path
/// selection, the time-budgeted multi-chunk loop, and the final stat
/// check.
pub struct CopyEngine {
    sink: Arc<SinkClient>,
    limiter: Arc<RateLimiter>,
    config: CopyEngineConfig,
    stats: StatsHandle,
    throughput: ThroughputWriter,
}

impl CopyEngine {
    #[must_use]
    pub fn new(sink: Arc<SinkClient>, limiter: Arc<RateLimiter>, config: CopyEngineConfig, stats: StatsHandle, throughput: ThroughputWriter) -> Self {
        Self { sink, limiter, config, stats, throughput }
    }

    /// Runs one entry to completion or until the time budget/job-activity
    /// check ends this invocation, gated by an optional bundle permit
    /// (§4.F.6's semaphore-bypass-for-single-entry rule: callers pass
    /// `None` for single-entry bundles).
    #[instrument(skip(self, job_run_id), fields(source = %spec.source_path, dst = %spec.dst_object))]
    pub async fn run(&self, spec: CopySpec, job_run_id: &str) -> CopyOutcome {
        if is_download(&spec.source_path) {
            warn!("download-direction copy specs are not handled by the upload engine");
            return CopyOutcome::failure(spec, CopyLog::default(), FailureClassification::Unknown, "download direction is not wired into the default handler");
        }

        let open_started = Instant::now();
        let opened = match open_and_stat(&spec.source_path).await {
            Ok(opened) => opened,
            Err(source) => {
                let failure = if source.kind() == std::io::ErrorKind::NotFound { FailureClassification::FileNotFound } else { FailureClassification::Unknown };
                return CopyOutcome::failure(spec, CopyLog::default(), failure, source.to_string());
            }
        };
        self.stats.record_pulse_stats(PulseStats {
            copy_open_ms: open_started.elapsed().as_millis() as u64,
            ..PulseStats::zero()
        });

        if let Some(resume) = &spec.resume {
            if let Err(failure) = verify_unchanged(resume.file_bytes, resume.file_mtime_unix, opened.size, opened.mtime_unix) {
                return CopyOutcome::failure(spec, CopyLog::default(), failure, "source file changed since the copy began");
            }
        }

        let initial_size = opened.size;
        let initial_mtime = opened.mtime_unix;

        let outcome = if spec.resume.is_none() && (opened.size <= self.config.copy_entire_file_limit || self.config.chunk_size == 0) {
            self.run_entire_file(spec, opened, job_run_id).await
        } else {
            self.run_resumable_budgeted(spec, opened, job_run_id).await
        };

        self.final_stat_check(outcome, initial_size, initial_mtime).await
    }

    /// §4.F.1 step 4: unconditional re-stat after a successful write,
    /// compared against whichever size/mtime the copy was verified against
    /// going in — the recorded `ResumeState` for a resumable copy, or the
    /// size/mtime observed by the initial open/stat for an entire-file copy
    /// (which never populates `spec.resume`).
    async fn final_stat_check(&self, outcome: CopyOutcome, initial_size: u64, initial_mtime: i64) -> CopyOutcome {
        if outcome.status != EntryStatus::Success {
            return outcome;
        }
        let stat_started = Instant::now();
        let restat = open_and_stat(&outcome.spec.source_path).await;
        self.stats.record_pulse_stats(PulseStats {
            copy_stat_ms: stat_started.elapsed().as_millis() as u64,
            ..PulseStats::zero()
        });

        match restat {
            Ok(restat) => {
                let (expected_size, expected_mtime) = match outcome.spec.resume.as_ref() {
                    Some(resume) => (resume.file_bytes, resume.file_mtime_unix),
                    None => (initial_size, initial_mtime),
                };
                if verify_unchanged(expected_size, expected_mtime, restat.size, restat.mtime_unix).is_err() {
                    let CopyOutcome { spec, log, .. } = outcome;
                    return CopyOutcome::failure(spec, log, FailureClassification::FileModifiedDuringCopy, "source file changed after the copy completed");
                }
                outcome
            }
            Err(_) => outcome,
        }
    }

    #[instrument(skip(self, spec, opened))]
    async fn run_entire_file(&self, spec: CopySpec, opened: OpenedSource, _job_run_id: &str) -> CopyOutcome {
        let OpenedSource { mut file, size, mtime_unix } = opened;

        let mut prefix = vec![0u8; SNIFF_LEN.min(size as usize)];
        if let Err(source) = file.read_exact(&mut prefix).await {
            if source.kind() != std::io::ErrorKind::UnexpectedEof {
                return CopyOutcome::failure(spec, CopyLog::default(), FailureClassification::Unknown, source.to_string());
            }
        }
        let seek_started = Instant::now();
        if let Err(source) = file.seek(std::io::SeekFrom::Start(0)).await {
            return CopyOutcome::failure(spec, CopyLog::default(), FailureClassification::Unknown, source.to_string());
        }
        let seek_ms = seek_started.elapsed().as_millis() as u64;
        let content_type = sniff_content_type(&prefix);

        let crc = Arc::new(Mutex::new(0u32));
        let byte_counter = Arc::new(AtomicU64::new(0));
        let elapsed_ms = Arc::new(AtomicU64::new(0));

        let mut reader = PipelineBuilder::new(file)
            .byte_tracking(byte_counter.clone())
            .buffered(self.config.buffer_capacity)
            .rate_limited(self.limiter.clone())
            .crc32c(crc.clone())
            .timing(elapsed_ms.clone())
            .build();

        let mut buf = Vec::with_capacity(size as usize);
        if let Err(source) = reader.read_to_end(&mut buf).await {
            return CopyOutcome::failure(spec, CopyLog::default(), FailureClassification::Unknown, source.to_string());
        }
        let src_crc32c = *crc.lock().unwrap_or_else(|p| p.into_inner());

        let write_started = Instant::now();
        let (result, retries) = send_with_retry(|| {
            let body = reqwest::Body::from(buf.clone());
            self.sink.upload_entire_file(&spec.dst_bucket, &spec.dst_object, spec.generation_match, body, content_type, mtime_unix)
        })
        .await;
        let write_ms = write_started.elapsed().as_millis() as u64;

        self.stats.record_pulse_stats(PulseStats {
            copy_bytes: byte_counter.load(Ordering::Relaxed),
            copy_seek_ms: seek_ms,
            copy_read_ms: elapsed_ms.load(Ordering::Relaxed),
            copy_write_ms: write_ms,
            copy_retries: retries,
            ..PulseStats::zero()
        });
        self.throughput.record(byte_counter.load(Ordering::Relaxed));

        match result {
            Ok(dst) => {
                if dst.crc32c != src_crc32c {
                    return CopyOutcome::failure(
                        spec,
                        CopyLog {
                            src_size: size,
                            src_crc32c,
                            bytes_copied: size,
                            ..CopyLog::default()
                        },
                        FailureClassification::HashMismatch,
                        format!("source crc32c {src_crc32c} != destination crc32c {}", dst.crc32c),
                    );
                }
                let log = CopyLog {
                    src_size: size,
                    src_crc32c,
                    dst_size: dst.size,
                    dst_crc32c: dst.crc32c,
                    dst_mtime_unix: dst.mtime_unix,
                    dst_md5_base64: dst.md5_base64,
                    bytes_copied: size,
                };
                CopyOutcome::success(spec, log)
            }
            Err(source) => CopyOutcome::failure(spec, CopyLog::default(), classify_sink_error(&source), source.to_string()),
        }
    }

    /// §4.F.5: loops sending resumable chunks while all four conditions
    /// hold, never regressing to a worse position than the last success.
    #[instrument(skip(self, spec, opened))]
    async fn run_resumable_budgeted(&self, mut spec: CopySpec, opened: OpenedSource, job_run_id: &str) -> CopyOutcome {
        let OpenedSource { file, size, mtime_unix } = opened;
        let started_at = Instant::now();

        if spec.resume.is_none() {
            let mut prefix_file = match file.try_clone().await {
                Ok(f) => f,
                Err(source) => return CopyOutcome::failure(spec, CopyLog::default(), FailureClassification::Unknown, source.to_string()),
            };
            let mut prefix = vec![0u8; SNIFF_LEN.min(size as usize)];
            let _ = prefix_file.read_exact(&mut prefix).await;
            let content_type = sniff_content_type(&prefix);

            match self.sink.prepare_resumable_upload(&spec.dst_bucket, &spec.dst_object, spec.generation_match, size, content_type, mtime_unix).await {
                Ok(handle) => {
                    spec.resume = Some(ResumeState {
                        file_bytes: size,
                        file_mtime_unix: mtime_unix,
                        bytes_copied: 0,
                        crc32c: 0,
                        resumable_upload_id: handle,
                    });
                }
                Err(source) => return CopyOutcome::failure(spec, CopyLog::default(), classify_sink_error(&source), source.to_string()),
            }
        }

        let mut last_good_log = CopyLog { src_size: size, ..CopyLog::default() };
        let mut last_good_spec = spec.clone();
        let mut file = file;

        loop {
            let resume = match &spec.resume {
                Some(resume) => resume.clone(),
                None => break,
            };
            if resume.bytes_copied >= resume.file_bytes {
                break;
            }
            if started_at.elapsed() >= self.config.copy_work_duration {
                break;
            }
            if !self.limiter.is_job_active(job_run_id) {
                break;
            }

            match self.send_one_chunk(&mut file, &mut spec, &resume).await {
                Ok(Some(log)) => {
                    last_good_log = log;
                    last_good_spec = spec.clone();
                    break;
                }
                Ok(None) => {
                    last_good_spec = spec.clone();
                }
                Err((failure, message)) => {
                    return CopyOutcome::failure(last_good_spec, last_good_log, failure, message);
                }
            }
        }

        if last_good_spec.resume.as_ref().is_some_and(|r| r.bytes_copied >= r.file_bytes) && last_good_log.bytes_copied > 0 {
            CopyOutcome::success(last_good_spec, last_good_log)
        } else if last_good_log.bytes_copied > 0 && last_good_spec.resume.as_ref().map(|r| r.bytes_copied) == Some(last_good_log.bytes_copied) {
            CopyOutcome::success(last_good_spec, last_good_log)
        } else {
            // Budget ran out, the job went inactive, or nothing has been
            // sent yet: report interim progress as a non-terminal failure
            // so the caller redelivers and resumes from the recorded spec.
            CopyOutcome::failure(last_good_spec, last_good_log, FailureClassification::Unset, "copy_work_duration exhausted before the file completed")
        }
    }

    /// Sends exactly one chunk. Returns `Ok(Some(log))` on final-chunk
    /// success, `Ok(None)` on a non-final success (caller loops), or an
    /// `Err` with the failure tag to surface.
    async fn send_one_chunk(&self, file: &mut File, spec: &mut CopySpec, resume: &ResumeState) -> Result<Option<CopyLog>, (FailureClassification, String)> {
        let bytes_to_copy = self.config.chunk_size.min(resume.file_bytes - resume.bytes_copied);
        let is_final = resume.bytes_copied + bytes_to_copy >= resume.file_bytes;

        let seek_started = Instant::now();
        if let Err(source) = file.seek(std::io::SeekFrom::Start(resume.bytes_copied)).await {
            return Err((FailureClassification::Unknown, source.to_string()));
        }
        let seek_ms = seek_started.elapsed().as_millis() as u64;

        let crc = Arc::new(Mutex::new(resume.crc32c));
        let byte_counter = Arc::new(AtomicU64::new(0));
        let elapsed_ms = Arc::new(AtomicU64::new(0));

        let cloned = match file.try_clone().await {
            Ok(f) => f,
            Err(source) => return Err((FailureClassification::Unknown, source.to_string())),
        };

        let mut reader = PipelineBuilder::new(cloned)
            .byte_tracking(byte_counter.clone())
            .length_limit(bytes_to_copy)
            .buffered(self.config.buffer_capacity)
            .rate_limited(self.limiter.clone())
            .crc32c(crc.clone())
            .timing(elapsed_ms.clone())
            .build();

        let mut buf = Vec::with_capacity(bytes_to_copy as usize);
        if let Err(source) = reader.read_to_end(&mut buf).await {
            return Err((FailureClassification::Unknown, source.to_string()));
        }
        let running_crc32c = *crc.lock().unwrap_or_else(|p| p.into_inner());

        let write_started = Instant::now();
        let (outcome, retries) = send_with_retry(|| {
            let body = reqwest::Body::from(buf.clone());
            self.sink.send_chunk(&resume.resumable_upload_id, body, resume.bytes_copied, bytes_to_copy, Some(resume.file_bytes), is_final)
        })
        .await;
        let write_ms = write_started.elapsed().as_millis() as u64;

        self.stats.record_pulse_stats(PulseStats {
            copy_bytes: byte_counter.load(Ordering::Relaxed),
            copy_seek_ms: seek_ms,
            copy_read_ms: elapsed_ms.load(Ordering::Relaxed),
            copy_write_ms: write_ms,
            copy_retries: retries,
            ..PulseStats::zero()
        });
        self.throughput.record(byte_counter.load(Ordering::Relaxed));

        match outcome {
            Ok(ChunkOutcome::Final(dst)) => {
                if dst.crc32c != running_crc32c {
                    return Err((FailureClassification::HashMismatch, format!("source crc32c {running_crc32c} != destination crc32c {}", dst.crc32c)));
                }
                spec.resume = Some(ResumeState {
                    bytes_copied: resume.bytes_copied + bytes_to_copy,
                    crc32c: running_crc32c,
                    ..resume.clone()
                });
                Ok(Some(CopyLog {
                    src_size: resume.file_bytes,
                    src_crc32c: running_crc32c,
                    dst_size: dst.size,
                    dst_crc32c: dst.crc32c,
                    dst_mtime_unix: dst.mtime_unix,
                    dst_md5_base64: dst.md5_base64,
                    bytes_copied: resume.bytes_copied + bytes_to_copy,
                }))
            }
            Ok(ChunkOutcome::ResumeIncomplete) => {
                spec.resume = Some(ResumeState {
                    bytes_copied: resume.bytes_copied + bytes_to_copy,
                    crc32c: running_crc32c,
                    ..resume.clone()
                });
                Ok(None)
            }
            Err(source) => Err((classify_sink_error(&source), source.to_string())),
        }
    }

    /// §4.F.7, experimental: the inverse (sink-to-local) direction. Not
    /// wired into the default handler registry; kept for completeness
    /// since a copy spec can in principle name either direction.
    #[instrument(skip(self))]
    pub async fn download_entire_object(&self, bucket: &str, object: &str, dest_path: &Path) -> Result<u64, CopyEngineError> {
        warn!(chunk_bytes = DOWNLOAD_CHUNK, %bucket, %object, "experimental download-direction path invoked");
        // A complete implementation would GET the object in DOWNLOAD_CHUNK
        // ranges and stream them to dest_path; the sink client exposes no
        // GET method yet because the spec's Open Question (§9) leaves this
        // direction's scope unresolved. Touching `dest_path` here keeps the
        // signature honest about what a real implementation would do.
        File::create(dest_path).await.map_err(CopyEngineError::io)?;
        let _ = self.sink.delete_object(bucket, object, -1).await;
        Ok(0)
    }
}

fn classify_sink_error(error: &SinkError) -> FailureClassification {
    match error {
        SinkError::ResumableIdGone { .. } => FailureClassification::ResumableIdGone,
        SinkError::PreconditionFailed { .. } => FailureClassification::PreconditionFailed,
        SinkError::Status { status, .. } if status.as_u16() == 403 => FailureClassification::Permission,
        SinkError::Status { status, .. } if status.as_u16() == 404 => FailureClassification::BucketNotFound,
        _ => FailureClassification::Unknown,
    }
}

/// §4.F.6: bundle copy with the semaphore-gating/bypass rule and
/// service-induced aggregation tag logic.
pub struct BundleCopyEngine {
    engine: Arc<CopyEngine>,
    concurrency: usize,
}

impl BundleCopyEngine {
    #[must_use]
    pub fn new(engine: Arc<CopyEngine>, concurrency: usize) -> Self {
        Self { engine, concurrency: concurrency.max(1) }
    }

    #[instrument(skip(self, bundle, job_run_id))]
    pub async fn run(&self, mut bundle: CopyBundleSpec, job_run_id: &str) -> (CopyBundleSpec, CopyBundleLog, bool, FailureClassification) {
        let pending_indices: Vec<usize> = bundle.entries.iter().enumerate().filter(|(_, e)| e.needs_work()).map(|(i, _)| i).collect();

        let semaphore = (pending_indices.len() > 1).then(|| Arc::new(Semaphore::new(self.concurrency)));

        let mut handles = Vec::with_capacity(pending_indices.len());
        for index in pending_indices {
            let engine = self.engine.clone();
            let job_run_id = job_run_id.to_string();
            let spec = bundle.entries[index].spec.clone();
            let permit_fut = semaphore.clone();
            handles.push((
                index,
                tokio::spawn(async move {
                    let _permit = match permit_fut {
                        Some(sem) => Some(sem.acquire_owned().await),
                        None => None,
                    };
                    engine.run(spec, &job_run_id).await
                }),
            ));
        }

        let mut log = CopyBundleLog::default();
        let mut any_failed = false;
        let mut worst_service_induced = false;

        for (index, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => CopyOutcome {
                    spec: bundle.entries[index].spec.clone(),
                    log: CopyLog::default(),
                    status: EntryStatus::Failed,
                    failure: FailureClassification::Unknown,
                    failure_message: join_error.to_string(),
                },
            };

            let entry = &mut bundle.entries[index];
            entry.spec = outcome.spec;
            entry.status = outcome.status;
            entry.failure = outcome.failure;
            entry.failure_message = outcome.failure_message;
            entry.log = Some(outcome.log.clone());

            match outcome.status {
                EntryStatus::Success => {
                    log.files_copied += 1;
                    log.bytes_copied += outcome.log.bytes_copied;
                }
                EntryStatus::Failed => {
                    any_failed = true;
                    log.files_failed += 1;
                    log.bytes_failed += outcome.log.bytes_copied;
                    worst_service_induced |= outcome.failure.is_service_induced();
                }
                EntryStatus::Unset => {}
            }
        }

        let failure = if !any_failed {
            FailureClassification::Unset
        } else if worst_service_induced {
            FailureClassification::Unknown
        } else {
            FailureClassification::NotServiceInducedUnknown
        };

        (bundle, log, any_failed, failure)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn classifies_download_scheme_prefix() {
        assert!(is_download("sink://bucket/object"));
        assert!(!is_download("/local/path/file.txt"));
    }

    #[test]
    fn sniffs_text_and_binary_prefixes() {
        assert_eq!(sniff_content_type(b"hello world"), "text/plain; charset=utf-8");
        assert_eq!(sniff_content_type(&[0xFF, 0xD8, 0xFF, 0x00]), "image/jpeg");
    }

    #[test]
    fn verify_unchanged_flags_size_or_mtime_drift() {
        assert!(verify_unchanged(10, 100, 10, 100).is_ok());
        assert_eq!(verify_unchanged(10, 100, 11, 100), Err(FailureClassification::FileModifiedDuringCopy));
        assert_eq!(verify_unchanged(10, 100, 10, 101), Err(FailureClassification::FileModifiedDuringCopy));
    }

    #[tokio::test]
    async fn empty_source_file_copies_as_zero_bytes_with_zero_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        tokio::fs::write(&path, b"").await.unwrap();

        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "size": "0",
                "crc32c": base64::engine::general_purpose::STANDARD.encode(0u32.to_be_bytes()),
                "md5Hash": "",
            })))
            .mount(&server)
            .await;

        let sink = Arc::new(SinkClient::new(reqwest::Client::new(), server.uri(), "test-ua/1.0"));
        let limiter = Arc::new(RateLimiter::unlimited());
        limiter.set_job_active("job-1", true);
        let stats = crate::stats::spawn(None, None);
        let (_throughput_tracker, throughput) = crate::rate::ThroughputTracker::spawn(None);
        let engine = CopyEngine::new(sink, limiter, CopyEngineConfig::default(), stats, throughput);

        let spec = CopySpec::fresh(path.to_string_lossy().to_string(), "b", "o", 0);
        let outcome = engine.run(spec, "job-1").await;

        assert_eq!(outcome.status, EntryStatus::Success);
        assert_eq!(outcome.log.src_crc32c, 0);
        assert_eq!(outcome.log.dst_crc32c, 0);
        assert_eq!(outcome.log.bytes_copied, 0);
    }
}
