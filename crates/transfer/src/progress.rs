use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::types::{TransferKind, TransferState};

/// Point-in-time view of a session's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub kind: TransferKind,
    pub state: TransferState,
    /// Plaintext bytes of the whole object.
    pub total_bytes: u64,
    /// Plaintext bytes committed so far.
    pub completed_bytes: u64,
    pub total_blocks: u64,
    pub completed_blocks: u64,
    pub total_parts: u64,
    pub completed_parts: u64,
    /// Average throughput over the recent window.
    pub bytes_per_second: f64,
}

impl ProgressSnapshot {
    /// Completed fraction in `0.0..=1.0`. An empty object counts as complete
    /// once the session is done.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.state == TransferState::Done { 1.0 } else { 0.0 };
        }
        self.completed_bytes as f64 / self.total_bytes as f64
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.completed_bytes)
    }

    /// Estimated time to completion, `None` while no rate is known.
    pub fn eta(&self) -> Option<Duration> {
        eta_at(self.bytes_per_second, self.remaining_bytes())
    }
}

/// Event emitted by a session on its event channel.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A part committed.
    Progress(ProgressSnapshot),
    Completed { session_id: String },
    Failed { session_id: String, error: String },
    Cancelled { session_id: String },
}

/// Sliding-window throughput estimate.
///
/// Keeps at most `capacity` `(instant, bytes)` samples no older than
/// `window`; the rate is the sampled bytes over the span they cover.
pub struct SpeedCalculator {
    window: Duration,
    capacity: usize,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 100)
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(2),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    fn samples(&self) -> MutexGuard<'_, VecDeque<(Instant, u64)>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_sample(&self, bytes: u64) {
        self.record(Instant::now(), bytes);
    }

    fn record(&self, at: Instant, bytes: u64) {
        let mut samples = self.samples();
        samples.push_back((at, bytes));
        while samples.len() > self.capacity {
            samples.pop_front();
        }
        while let Some(&(oldest, _)) = samples.front() {
            if at.duration_since(oldest) <= self.window {
                break;
            }
            samples.pop_front();
        }
    }

    /// Bytes per second over the window; 0.0 until two samples exist.
    pub fn bytes_per_second(&self) -> f64 {
        let samples = self.samples();
        let (Some(&(first, _)), Some(&(last, _))) = (samples.front(), samples.back()) else {
            return 0.0;
        };
        let span = last.duration_since(first).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        samples.iter().map(|&(_, bytes)| bytes).sum::<u64>() as f64 / span
    }

    /// Time left for `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        eta_at(self.bytes_per_second(), remaining)
    }

    pub fn reset(&self) {
        self.samples().clear();
    }
}

fn eta_at(rate: f64, remaining: u64) -> Option<Duration> {
    (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
}
