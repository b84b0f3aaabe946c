//! Transfer-rate estimation over a sliding window.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Samples retained at most this long.
const WINDOW: Duration = Duration::from_secs(5);

/// Hard cap on retained samples.
const MAX_SAMPLES: usize = 256;

struct Sample {
    bytes: i64,
    at: Instant,
}

/// Computes instantaneous throughput from byte-delta samples.
///
/// Callers feed every chunk that leaves the upload producer; readers get
/// the windowed average in bytes per second.
pub struct SpeedCalculator {
    samples: Mutex<Vec<Sample>>,
}

impl SpeedCalculator {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: i64) {
        let mut samples = self.samples.lock().unwrap();
        let now = Instant::now();
        samples.push(Sample { bytes, at: now });

        let cutoff = now - WINDOW;
        samples.retain(|s| s.at >= cutoff);
        if samples.len() > MAX_SAMPLES {
            let excess = samples.len() - MAX_SAMPLES;
            samples.drain(..excess);
        }
    }

    /// Windowed average in bytes/second; 0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let samples = self.samples.lock().unwrap();
        if samples.len() < 2 {
            return 0.0;
        }

        let elapsed = samples[samples.len() - 1]
            .at
            .duration_since(samples[0].at);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total: i64 = samples.iter().map(|s| s.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Seconds left for `remaining_bytes` at the current rate; 0 if unknown.
    pub fn eta_seconds(&self, remaining_bytes: i64) -> i64 {
        let speed = self.bytes_per_second();
        if speed <= 0.0 || remaining_bytes <= 0 {
            return 0;
        }
        (remaining_bytes as f64 / speed).ceil() as i64
    }

    /// Drops all recorded samples.
    pub fn reset(&self) {
        self.samples.lock().unwrap().clear();
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new()
    }
}
