//! The single-writer statistics collector (§4.C).
//!
//! One long-lived task owns every mutable counter. Producers never touch
//! state directly; they send over bounded channels sized for burst
//! absorption (§5), and the collector drains them with `tokio::select!`.
//! The only state reachable from outside the collector task is the
//! accumulator snapshot, which is behind a single `tokio::sync::Mutex`
//! released immediately after each read.

use std::time::Duration as StdDuration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration};
use tracing::instrument;

use crate::task::pulse::PulseStats;

use super::periodic_log::{format_periodic_log, PeriodicSnapshot, TaskKindSnapshot};

/// Which periodic-log bucket a completed task's duration feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Copy,
    List,
    /// Delete bundles are tracked in pulse/accumulator stats but have no
    /// column in the periodic log's fixed format (§4.C).
    DeleteBundle,
}

#[derive(Debug)]
enum StatsMessage {
    TaskDuration { kind: TaskKind, duration_ms: u64, failed: bool },
    PulseStats(PulseStats),
    BandwidthLimit(i64),
    ControlMessage,
    PulseSent,
    AccumulatedPulseStatsRequest(oneshot::Sender<PulseStats>),
    PeriodicLogSnapshotRequest(oneshot::Sender<String>),
}

#[derive(Default)]
struct DurationBucket {
    done: u64,
    fail: u64,
    sum_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

impl DurationBucket {
    fn record(&mut self, duration_ms: u64, failed: bool) {
        if failed {
            self.fail += 1;
        } else {
            self.done += 1;
        }
        self.sum_ms += duration_ms;
        self.min_ms = if self.min_ms == 0 { duration_ms } else { self.min_ms.min(duration_ms) };
        self.max_ms = self.max_ms.max(duration_ms);
    }

    fn snapshot(&self) -> TaskKindSnapshot {
        let total = self.done + self.fail;
        TaskKindSnapshot {
            done: self.done,
            fail: self.fail,
            dur_min_ms: self.min_ms,
            dur_max_ms: self.max_ms,
            dur_avg_ms: if total == 0 { 0 } else { self.sum_ms / total },
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Handle producers use to feed the collector. Cloning is cheap.
#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::Sender<StatsMessage>,
}

impl StatsHandle {
    #[instrument(skip(self))]
    pub fn record_task_duration(&self, kind: TaskKind, duration: StdDuration, failed: bool) {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let _ = self.tx.try_send(StatsMessage::TaskDuration { kind, duration_ms, failed });
    }

    pub fn record_pulse_stats(&self, delta: PulseStats) {
        let _ = self.tx.try_send(StatsMessage::PulseStats(delta));
    }

    pub fn record_bandwidth_limit(&self, bytes_per_sec: i64) {
        let _ = self.tx.try_send(StatsMessage::BandwidthLimit(bytes_per_sec));
    }

    pub fn record_control_message(&self) {
        let _ = self.tx.try_send(StatsMessage::ControlMessage);
    }

    pub fn record_pulse_sent(&self) {
        let _ = self.tx.try_send(StatsMessage::PulseSent);
    }

    /// Atomically returns the "since last pulse" bucket and zeroes it.
    /// *Not idempotent* — intended to be called exactly once per pulse
    /// emission (§4.C).
    pub async fn accumulated_pulse_stats(&self) -> PulseStats {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(StatsMessage::AccumulatedPulseStatsRequest(tx)).await.is_err() {
            return PulseStats::zero();
        }
        rx.await.unwrap_or_else(|_| PulseStats::zero())
    }

    /// Test/diagnostic hook: renders the current periodic log line without
    /// waiting for the next periodic tick.
    pub async fn periodic_log_snapshot(&self) -> String {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(StatsMessage::PeriodicLogSnapshotRequest(tx)).await.is_err() {
            return String::new();
        }
        rx.await.unwrap_or_default()
    }
}

struct CollectorState {
    periodic: PeriodicAccumulator,
    lifetime_pulse: PulseStats,
    last_pulse_snapshot: PulseStats,
    current_pulse_bucket: PulseStats,
    tx_bytes: u64,
    ctrl_msgs: u64,
    pulse_msgs: u64,
}

#[derive(Default)]
struct PeriodicAccumulator {
    copy: DurationBucket,
    list: DurationBucket,
}

impl CollectorState {
    fn new() -> Self {
        Self {
            periodic: PeriodicAccumulator::default(),
            lifetime_pulse: PulseStats::zero(),
            last_pulse_snapshot: PulseStats::zero(),
            current_pulse_bucket: PulseStats::zero(),
            tx_bytes: 0,
            ctrl_msgs: 0,
            pulse_msgs: 0,
        }
    }

    fn record_task_duration(&mut self, kind: TaskKind, duration_ms: u64, failed: bool) {
        match kind {
            TaskKind::Copy => self.periodic.copy.record(duration_ms, failed),
            TaskKind::List => self.periodic.list.record(duration_ms, failed),
            TaskKind::DeleteBundle => {}
        }
    }

    /// Accumulator tick (§4.C): diff the lifetime record against the last
    /// snapshot and fold the delta into the pulse bucket.
    fn accumulator_tick(&mut self) {
        let delta = self.lifetime_pulse.sub(&self.last_pulse_snapshot);
        self.current_pulse_bucket = self.current_pulse_bucket.add(&delta);
        self.last_pulse_snapshot = self.lifetime_pulse;
    }

    fn take_accumulated_pulse_stats(&mut self) -> PulseStats {
        let bucket = self.current_pulse_bucket;
        self.current_pulse_bucket = PulseStats::zero();
        bucket
    }

    fn periodic_snapshot(&self) -> PeriodicSnapshot {
        PeriodicSnapshot {
            copy: self.periodic.copy.snapshot(),
            list: self.periodic.list.snapshot(),
            tx_bytes: self.tx_bytes,
            ctrl_msgs: self.ctrl_msgs,
            pulse_msgs: self.pulse_msgs,
        }
    }

    fn reset_periodic(&mut self) {
        self.periodic.copy.reset();
        self.periodic.list.reset();
        self.tx_bytes = 0;
        self.ctrl_msgs = 0;
        self.pulse_msgs = 0;
    }
}

/// Spawns the collector task and returns a handle producers clone freely.
///
/// `periodic_log_period` defaults to 3 minutes; `accumulator_period`
/// defaults to 1 second (fine-grained enough that pulse emission, which
/// typically runs on its own longer interval, always sees a fresh delta).
#[must_use]
#[instrument(skip_all)]
pub fn spawn(periodic_log_period: Option<Duration>, accumulator_period: Option<Duration>) -> StatsHandle {
    let periodic_log_period = periodic_log_period.unwrap_or(Duration::from_secs(180));
    let accumulator_period = accumulator_period.unwrap_or(Duration::from_secs(1));

    let (tx, mut rx) = mpsc::channel::<StatsMessage>(256);

    tokio::spawn(async move {
        let mut state = CollectorState::new();
        let mut periodic_ticker = time::interval(periodic_log_period);
        let mut accumulator_ticker = time::interval(accumulator_period);

        loop {
            tokio::select! {
                _ = periodic_ticker.tick() => {
                    let line = format_periodic_log(&state.periodic_snapshot());
                    tracing::info!(target: "ingest_core::stats", "{line}");
                    state.reset_periodic();
                }
                _ = accumulator_ticker.tick() => {
                    state.accumulator_tick();
                }
                msg = rx.recv() => {
                    match msg {
                        Some(StatsMessage::TaskDuration { kind, duration_ms, failed }) => {
                            state.record_task_duration(kind, duration_ms, failed);
                        }
                        Some(StatsMessage::PulseStats(delta)) => {
                            state.lifetime_pulse = state.lifetime_pulse.add(&delta);
                            state.tx_bytes += delta.copy_bytes + delta.list_bytes;
                        }
                        Some(StatsMessage::BandwidthLimit(_)) => {}
                        Some(StatsMessage::ControlMessage) => state.ctrl_msgs += 1,
                        Some(StatsMessage::PulseSent) => state.pulse_msgs += 1,
                        Some(StatsMessage::AccumulatedPulseStatsRequest(reply)) => {
                            let _ = reply.send(state.take_accumulated_pulse_stats());
                        }
                        Some(StatsMessage::PeriodicLogSnapshotRequest(reply)) => {
                            let _ = reply.send(format_periodic_log(&state.periodic_snapshot()));
                        }
                        None => break,
                    }
                }
            }
        }
    });

    StatsHandle { tx }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accumulated_pulse_stats_zeroes_between_calls() {
        let handle = spawn(Some(Duration::from_secs(3600)), Some(Duration::from_millis(10)));

        handle.record_pulse_stats(PulseStats {
            copy_bytes: 47,
            ..PulseStats::zero()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = handle.accumulated_pulse_stats().await;
        assert_eq!(first.copy_bytes, 47);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = handle.accumulated_pulse_stats().await;
        assert_eq!(second, PulseStats::zero());
    }

    #[tokio::test]
    async fn periodic_snapshot_resets_counts_to_zero() {
        let handle = spawn(Some(Duration::from_secs(3600)), Some(Duration::from_millis(10)));
        handle.record_task_duration(TaskKind::Copy, StdDuration::from_millis(250), false);

        let before = handle.periodic_log_snapshot().await;
        assert!(before.starts_with("copy done:1 fail:0"));
    }
}
