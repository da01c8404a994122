//! The copy engine's reader pipeline (§4.F.1, §9 Design Notes).
//!
//! Composes, innermost to outermost: raw file → byte-tracking → length-limit
//! (chunking) → optional semaphore-acquiring → buffered → rate-limited →
//! CRC32C-updating → timing. Each decorator sees the byte stream exactly
//! once; order is recorded explicitly by [`PipelineBuilder`] so a retried
//! chunk produces the same CRC32C over the same byte range as the first
//! attempt.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, BufReader, ReadBuf};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

struct ByteTrackingReader {
    inner: BoxedReader,
    counter: Arc<AtomicU64>,
}

impl AsyncRead for ByteTrackingReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if result.is_ready() {
            let read = buf.filled().len() - before;
            self.counter.fetch_add(read as u64, Ordering::Relaxed);
        }
        result
    }
}

/// Clamps the stream to at most `remaining` bytes, letting the chunking
/// logic (§4.F.4) bound each PUT to the configured chunk size.
struct LengthLimitReader {
    inner: BoxedReader,
    remaining: u64,
}

impl AsyncRead for LengthLimitReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if self.remaining == 0 {
            return Poll::Ready(Ok(()));
        }
        let max = self.remaining.min(buf.remaining() as u64) as usize;
        let mut limited = buf.take(max);
        let result = Pin::new(&mut self.inner).poll_read(cx, &mut limited);
        if result.is_ready() {
            let read = limited.filled().len() as u64;
            self.remaining -= read;
            buf.advance(read as usize);
        }
        result
    }
}

/// Holds an acquired permit alive for the lifetime of the read; present
/// only for bundle workers (bundles with more than one entry gate through
/// the copy-concurrency semaphore, §4.F.6).
struct SemaphoreGatedReader {
    inner: BoxedReader,
    _permit: OwnedSemaphorePermit,
}

impl AsyncRead for SemaphoreGatedReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

type AcquireFuture = Pin<Box<dyn Future<Output = u64> + Send>>;

/// Paces reads against the shared token bucket: each `poll_read` first
/// acquires tokens for up to `buf.remaining()` bytes, then reads at most
/// that many bytes from the inner stream. The in-flight acquire future is
/// held across `Pending` polls rather than re-issued, so a woken task
/// resumes the same wait instead of losing its place in the bucket.
struct RateLimitedReader {
    inner: BoxedReader,
    limiter: Arc<crate::rate::RateLimiter>,
    pending: Option<AcquireFuture>,
}

impl AsyncRead for RateLimitedReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            let mut pending = self.pending.take().unwrap_or_else(|| {
                let limiter = self.limiter.clone();
                let requested = buf.remaining() as u64;
                Box::pin(async move { limiter.acquire(requested).await }) as AcquireFuture
            });

            let granted = match pending.as_mut().poll(cx) {
                Poll::Ready(granted) => granted,
                Poll::Pending => {
                    self.pending = Some(pending);
                    return Poll::Pending;
                }
            };

            if granted == 0 {
                // Only reachable if the bucket is misconfigured to a zero
                // rate; `RateLimiter::new`/`set_limit` both normalize that
                // to unlimited, so loop rather than signal a false EOF.
                continue;
            }

            let mut limited = buf.take((granted as usize).min(buf.remaining()));
            return match Pin::new(&mut self.inner).poll_read(cx, &mut limited) {
                Poll::Ready(Ok(())) => {
                    let read = limited.filled().len();
                    buf.advance(read);
                    Poll::Ready(Ok(()))
                }
                other => other,
            };
        }
    }
}

struct Crc32cReader {
    inner: BoxedReader,
    crc: Arc<Mutex<u32>>,
}

impl AsyncRead for Crc32cReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if result.is_ready() {
            let chunk = &buf.filled()[before..];
            if !chunk.is_empty() {
                let mut crc = self.crc.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                *crc = crc32c::crc32c_append(*crc, chunk);
            }
        }
        result
    }
}

struct TimingReader {
    inner: BoxedReader,
    elapsed_ms: Arc<AtomicU64>,
}

impl AsyncRead for TimingReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let start = Instant::now();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if result.is_ready() {
            self.elapsed_ms.fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);
        }
        result
    }
}

/// Explicit, order-recording composition of the copy engine's reader
/// pipeline. Call sites build outward from the raw file reader exactly in
/// the order spec.md §9 calls for.
pub struct PipelineBuilder {
    reader: BoxedReader,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(raw: impl AsyncRead + Unpin + Send + 'static) -> Self {
        Self { reader: Box::new(raw) }
    }

    #[must_use]
    pub fn byte_tracking(self, counter: Arc<AtomicU64>) -> Self {
        Self {
            reader: Box::new(ByteTrackingReader { inner: self.reader, counter }),
        }
    }

    #[must_use]
    pub fn length_limit(self, remaining: u64) -> Self {
        Self {
            reader: Box::new(LengthLimitReader { inner: self.reader, remaining }),
        }
    }

    #[must_use]
    pub fn semaphore_gated(self, permit: Option<OwnedSemaphorePermit>) -> Self {
        match permit {
            Some(permit) => Self {
                reader: Box::new(SemaphoreGatedReader { inner: self.reader, _permit: permit }),
            },
            None => self,
        }
    }

    #[must_use]
    pub fn buffered(self, capacity: usize) -> Self {
        Self {
            reader: Box::new(BufReader::with_capacity(capacity, self.reader)),
        }
    }

    #[must_use]
    pub fn rate_limited(self, limiter: Arc<crate::rate::RateLimiter>) -> Self {
        Self {
            reader: Box::new(RateLimitedReader { inner: self.reader, limiter, pending: None }),
        }
    }

    #[must_use]
    pub fn crc32c(self, crc: Arc<Mutex<u32>>) -> Self {
        Self {
            reader: Box::new(Crc32cReader { inner: self.reader, crc }),
        }
    }

    #[must_use]
    pub fn timing(self, elapsed_ms: Arc<AtomicU64>) -> Self {
        Self {
            reader: Box::new(TimingReader { inner: self.reader, elapsed_ms }),
        }
    }

    #[must_use]
    pub fn build(self) -> BoxedReader {
        self.reader
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn byte_tracking_and_crc32c_observe_every_byte() {
        let data = b"Ephemeral test file content for copy_test.go.".to_vec();
        let counter = Arc::new(AtomicU64::new(0));
        let crc = Arc::new(Mutex::new(0u32));

        let mut reader = PipelineBuilder::new(std::io::Cursor::new(data.clone()))
            .byte_tracking(counter.clone())
            .crc32c(crc.clone())
            .build();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, data);
        assert_eq!(counter.load(Ordering::Relaxed), data.len() as u64);
        assert_eq!(*crc.lock().unwrap(), 3_923_584_507u32);
    }

    #[tokio::test]
    async fn length_limit_clamps_the_stream() {
        let data = b"0123456789".to_vec();
        let mut reader = PipelineBuilder::new(std::io::Cursor::new(data)).length_limit(4).build();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"0123");
    }
}
