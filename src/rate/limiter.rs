//! Token-bucket outbound bandwidth limiter and job-activity admission map
//! (§4.A).
//!
//! Mirrors the teacher's per-domain `RateLimiter`: one `Mutex`-guarded piece
//! of shared state consulted on every acquire, plus a `DashMap` for the
//! orthogonal job-activity lookup, so the two concerns never contend on the
//! same lock.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Sentinel rate meaning "no limit"; matches the widest positive value the
/// wire's signed 32-bit rate field can carry.
pub const UNLIMITED: i64 = i32::MAX as i64;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Process-wide outbound byte-rate limiter shared by every copy worker.
pub struct RateLimiter {
    bytes_per_sec: AtomicI64,
    bucket: Mutex<BucketState>,
    job_activity: DashMap<String, bool>,
}

impl RateLimiter {
    /// `bytes_per_sec <= 0` means unlimited (§6: `--bandwidth-limit-bytes-per-sec 0`),
    /// matching the CLI's documented sentinel rather than stalling `acquire()`
    /// on a zero-width bucket.
    #[must_use]
    pub fn new(bytes_per_sec: i64) -> Self {
        let bytes_per_sec = if bytes_per_sec <= 0 { UNLIMITED } else { bytes_per_sec };
        Self {
            bytes_per_sec: AtomicI64::new(bytes_per_sec),
            bucket: Mutex::new(BucketState {
                tokens: bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
            job_activity: DashMap::new(),
        }
    }

    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(UNLIMITED)
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.bytes_per_sec.load(Ordering::Relaxed) >= UNLIMITED
    }

    /// Reconfigures the rate. Atomic with respect to concurrent acquires:
    /// the next token check on any in-flight waiter observes the new rate.
    /// `bytes_per_sec <= 0` means unlimited, matching [`Self::new`].
    #[instrument(skip(self))]
    pub fn set_limit(&self, bytes_per_sec: i64) {
        let bytes_per_sec = if bytes_per_sec <= 0 { UNLIMITED } else { bytes_per_sec };
        debug!(bytes_per_sec, "rate limit reconfigured");
        self.bytes_per_sec.store(bytes_per_sec, Ordering::Relaxed);
    }

    /// Requests `requested` bytes' worth of tokens. Returns the number of
    /// bytes actually granted, which may be less than requested (partial
    /// serve is preferred over a full blocking sleep for streaming
    /// smoothness); callers loop, re-requesting the remainder.
    #[instrument(skip(self))]
    pub async fn acquire(&self, requested: u64) -> u64 {
        if requested == 0 || self.is_unlimited() {
            return requested;
        }

        let rate = self.bytes_per_sec.load(Ordering::Relaxed).max(0) as f64;
        let burst_capacity = rate;

        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(burst_capacity);
        bucket.last_refill = now;

        if bucket.tokens <= 0.0 {
            // Bucket is empty: sleep long enough to accrue at least one
            // byte's worth of tokens, then grant a partial serve of
            // whatever trickled in rather than waiting for the full
            // request to be satisfiable in one shot.
            let wait_secs = (1.0 / rate).max(0.0);
            drop(bucket);
            tokio::time::sleep(Duration::from_secs_f64(wait_secs)).await;
            let mut bucket = self.bucket.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * rate).min(burst_capacity);
            bucket.last_refill = now;
            let granted = bucket.tokens.min(requested as f64).max(0.0);
            bucket.tokens -= granted;
            return granted as u64;
        }

        let granted = bucket.tokens.min(requested as f64);
        bucket.tokens -= granted;
        granted as u64
    }

    /// Marks a job run as active, admitting its tasks.
    pub fn set_job_active(&self, job_run_id: impl Into<String>, active: bool) {
        self.job_activity.insert(job_run_id.into(), active);
    }

    pub fn remove_job(&self, job_run_id: &str) {
        self.job_activity.remove(job_run_id);
    }

    /// §4.A: a task for an unknown or inactive job fails fast with
    /// `not-active-job-run` before any work starts.
    #[must_use]
    pub fn is_job_active(&self, job_run_id: &str) -> bool {
        self.job_activity.get(job_run_id).map(|v| *v).unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_sentinel_disables_waits() {
        let limiter = RateLimiter::unlimited();
        assert!(limiter.is_unlimited());
    }

    #[tokio::test]
    async fn unlimited_grants_full_request_instantly() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        let granted = limiter.acquire(10_000_000).await;
        assert_eq!(granted, 10_000_000);
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn limited_bucket_caps_burst_at_one_second_of_tokens() {
        let limiter = RateLimiter::new(100);
        let granted = limiter.acquire(1000).await;
        assert!(granted <= 100, "burst grant {granted} exceeded one second of tokens");
    }

    #[test]
    fn zero_bytes_per_sec_means_unlimited() {
        let limiter = RateLimiter::new(0);
        assert!(limiter.is_unlimited());
    }

    #[test]
    fn unknown_job_is_inactive_by_default() {
        let limiter = RateLimiter::unlimited();
        assert!(!limiter.is_job_active("job-1"));
    }

    #[test]
    fn job_activity_toggles() {
        let limiter = RateLimiter::unlimited();
        limiter.set_job_active("job-1", true);
        assert!(limiter.is_job_active("job-1"));
        limiter.set_job_active("job-1", false);
        assert!(!limiter.is_job_active("job-1"));
    }

    #[tokio::test]
    async fn set_limit_is_observed_by_subsequent_acquires() {
        let limiter = RateLimiter::new(100);
        let _ = limiter.acquire(100).await;
        limiter.set_limit(UNLIMITED);
        assert!(limiter.is_unlimited());
    }
}
