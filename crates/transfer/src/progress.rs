use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Default time window for throughput.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Maximum retained samples.
const MAX_SAMPLES: usize = 100;

struct Sample {
    /// Cumulative bytes at `at`.
    total: u64,
    at: Instant,
}

/// Sliding-window throughput over cumulative byte counts.
pub struct ThroughputMeter {
    window: Duration,
    samples: Mutex<VecDeque<Sample>>,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ThroughputMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    /// Records that `total` bytes have been transferred so far.
    pub fn record(&self, total: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push_back(Sample { total, at: now });

        while let Some(front) = samples.front() {
            let expired = now.duration_since(front.at) > self.window;
            if (expired && samples.len() > 2) || samples.len() > MAX_SAMPLES {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average rate between the oldest and newest retained sample.
    ///
    /// Returns 0.0 until two samples at distinct instants exist.
    pub fn bytes_per_second(&self) -> f64 {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (samples.front(), samples.back()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        last.total.saturating_sub(first.total) as f64 / elapsed.as_secs_f64()
    }

    /// Time left to move `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
    }

    pub fn reset(&self) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
