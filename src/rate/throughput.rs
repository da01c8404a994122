//! Sliding-window outbound throughput tracker (§4.B).
//!
//! A single collector task owns the ring buffer; writers publish byte
//! counts over a bounded channel and never touch the buffer directly,
//! following the same single-writer discipline as the stats collector
//! (§4.C).

use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tracing::{debug, instrument};

const DEFAULT_WINDOW_SECS: usize = 30;
const WRITE_QUEUE_DEPTH: usize = 64;

/// Handle writers use to publish bytes sent. Cloning is cheap; the
/// underlying channel is shared.
#[derive(Clone)]
pub struct ThroughputWriter {
    tx: mpsc::Sender<u64>,
}

impl ThroughputWriter {
    /// Publishes `bytes` sent just now. Dropping the sample under queue
    /// pressure is acceptable per §4.B and is not surfaced as an error.
    pub fn record(&self, bytes: u64) {
        if self.tx.try_send(bytes).is_err() {
            debug!(bytes, "throughput sample dropped under queue pressure");
        }
    }
}

/// Sliding-window byte-rate tracker. Construct with [`ThroughputTracker::spawn`],
/// which starts the owning collector task and returns a handle plus a
/// cloneable writer.
pub struct ThroughputTracker {
    window: std::sync::Arc<tokio::sync::Mutex<RingBuffer>>,
}

struct RingBuffer {
    buckets: Vec<u64>,
    cursor: usize,
}

impl RingBuffer {
    fn new(window_secs: usize) -> Self {
        Self {
            buckets: vec![0; window_secs.max(1)],
            cursor: 0,
        }
    }

    fn advance_tick(&mut self) {
        self.cursor = (self.cursor + 1) % self.buckets.len();
        self.buckets[self.cursor] = 0;
    }

    fn add(&mut self, bytes: u64) {
        self.buckets[self.cursor] += bytes;
    }

    fn sum(&self) -> u64 {
        self.buckets.iter().sum()
    }
}

impl ThroughputTracker {
    /// Spawns the collector task and returns the tracker handle (for
    /// reading `throughput()`) plus the writer handle (for publishing
    /// samples). `window_secs` defaults to 30 when `None`.
    #[must_use]
    #[instrument(skip_all)]
    pub fn spawn(window_secs: Option<usize>) -> (std::sync::Arc<Self>, ThroughputWriter) {
        let window_secs = window_secs.unwrap_or(DEFAULT_WINDOW_SECS);
        let buffer = std::sync::Arc::new(tokio::sync::Mutex::new(RingBuffer::new(window_secs)));
        let (tx, mut rx) = mpsc::channel::<u64>(WRITE_QUEUE_DEPTH);

        let collector_buffer = buffer.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        collector_buffer.lock().await.advance_tick();
                    }
                    sample = rx.recv() => {
                        match sample {
                            Some(bytes) => collector_buffer.lock().await.add(bytes),
                            None => break,
                        }
                    }
                }
            }
        });

        let tracker = std::sync::Arc::new(Self { window: buffer });
        (tracker, ThroughputWriter { tx })
    }

    /// Bytes per second over the configured window.
    pub async fn throughput(&self) -> f64 {
        let buf = self.window.lock().await;
        let window_secs = buf.buckets.len() as f64;
        buf.sum() as f64 / window_secs
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn empty_window_has_zero_throughput() {
        let (tracker, _writer) = ThroughputTracker::spawn(Some(4));
        assert_eq!(tracker.throughput().await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_bytes_are_reflected_in_throughput() {
        let (tracker, writer) = ThroughputTracker::spawn(Some(4));
        writer.record(400);
        // Yield so the collector task processes the channel send.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(tracker.throughput().await, 100.0);
    }
}
