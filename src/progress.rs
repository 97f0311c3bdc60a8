//! Progress reporting for archive operations.
//!
//! The scheduler owns a [`ProgressTracker`] and calls [`ProgressTracker::advance`]
//! once per committed block, so events arrive in commit order on the scheduler's
//! own thread and need no synchronization.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Weight of the newest sample in the throughput moving average.
const THROUGHPUT_SMOOTHING: f64 = 0.3;
/// Percent reported before the final block is committed never reaches 100.
const MAX_PARTIAL_PERCENT: f64 = 99.999;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub processed_bytes: u64,
    pub total_bytes: u64,
    /// 0..=100, non-decreasing within one operation. Exactly 100.0 only on the last event.
    pub percent: f64,
    /// Smoothed bytes per second.
    pub throughput: f64,
    pub eta: Duration,
    pub elapsed: Duration,
}

/// Progress callback function type
pub type ProgressCallback<'a> = dyn Fn(ProgressEvent) + Send + Sync + 'a;

pub struct ProgressTracker<'a> {
    total_bytes: u64,
    total_blocks: u64,
    processed_bytes: u64,
    committed_blocks: u64,
    percent: f64,
    throughput: Option<f64>,
    start: Instant,
    last: Instant,
    callback: Option<&'a ProgressCallback<'a>>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(total_bytes: u64, total_blocks: u64, callback: Option<&'a ProgressCallback<'a>>) -> Self {
        let now = Instant::now();
        Self {
            total_bytes,
            total_blocks: total_blocks.max(1),
            processed_bytes: 0,
            committed_blocks: 0,
            percent: 0.0,
            throughput: None,
            start: now,
            last: now,
            callback,
        }
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.committed_blocks >= self.total_blocks
    }

    /// Record one committed block of `bytes` original bytes and emit an event.
    /// Calls after the final block are ignored.
    pub fn advance(&mut self, bytes: u64) {
        if self.is_complete() {
            return;
        }
        let now = Instant::now();
        self.committed_blocks += 1;
        self.processed_bytes = self.processed_bytes.saturating_add(bytes).min(self.total_bytes);

        let dt = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        let elapsed = now.duration_since(self.start);
        let average = rate(self.processed_bytes, elapsed.as_secs_f64());
        let sample = if dt > 0.0 { bytes as f64 / dt } else { average };
        let smoothed = match self.throughput {
            Some(prev) => THROUGHPUT_SMOOTHING * sample + (1.0 - THROUGHPUT_SMOOTHING) * prev,
            None => sample,
        };
        self.throughput = Some(smoothed);

        let percent = if self.is_complete() {
            100.0
        } else if self.total_bytes == 0 {
            0.0
        } else {
            (self.processed_bytes as f64 / self.total_bytes as f64 * 100.0).min(MAX_PARTIAL_PERCENT)
        };
        self.percent = self.percent.max(percent);

        let remaining = self.total_bytes - self.processed_bytes;
        let eta = if self.is_complete() || average <= 0.0 {
            Duration::ZERO
        } else {
            seconds(remaining as f64 / average)
        };

        if let Some(callback) = self.callback {
            callback(ProgressEvent {
                processed_bytes: self.processed_bytes,
                total_bytes: self.total_bytes,
                percent: self.percent,
                throughput: finite_or_zero(smoothed),
                eta,
                elapsed,
            });
        }
    }
}

fn rate(bytes: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn seconds(s: f64) -> Duration {
    if s.is_finite() && s >= 0.0 {
        Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}
