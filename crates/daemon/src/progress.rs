use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Samples required before an ETA is projected
pub const MIN_SAMPLES_FOR_ETA: usize = 6;

/// One progress projection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub encoded: Duration,
    /// Fraction of the media encoded, clamped to [0, 1]
    pub relative: f64,
    pub eta: Option<Duration>,
}

/// Sliding window of (wall clock, encoded duration) samples for one job.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    total: Duration,
    capacity: usize,
    samples: VecDeque<(Instant, Duration)>,
}

impl ProgressEstimator {
    pub fn new(total: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            total,
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, encoded: Duration) -> ProgressReport {
        self.record_at(Instant::now(), encoded)
    }

    /// Append a sample, evicting the oldest past capacity, and project
    pub fn record_at(&mut self, now: Instant, encoded: Duration) -> ProgressReport {
        self.samples.push_back((now, encoded));
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }

        ProgressReport {
            encoded,
            relative: self.relative_progress(encoded),
            eta: self.eta_at(now, encoded),
        }
    }

    /// Remaining wall-clock time, `None` until enough samples exist or when
    /// nothing was encoded since the oldest sample.
    pub fn eta_at(&self, now: Instant, current: Duration) -> Option<Duration> {
        if self.samples.len() < MIN_SAMPLES_FOR_ETA {
            return None;
        }

        let &(oldest_time, oldest_encoded) = self.samples.front()?;
        let encoded_since_oldest = current.checked_sub(oldest_encoded)?;
        if encoded_since_oldest.is_zero() {
            return None;
        }

        let elapsed_wall = now.saturating_duration_since(oldest_time);
        let remaining_encoded = self.total.saturating_sub(current);
        let secs = remaining_encoded.as_secs_f64() * elapsed_wall.as_secs_f64()
            / encoded_since_oldest.as_secs_f64();

        Duration::try_from_secs_f64(secs).ok()
    }

    /// `current / total` clamped to [0, 1]; container duration drift can
    /// push `current` past `total`.
    pub fn relative_progress(&self, current: Duration) -> f64 {
        if self.total.is_zero() {
            return 0.0;
        }
        (current.as_secs_f64() / self.total.as_secs_f64()).clamp(0.0, 1.0)
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Human-readable duration, e.g. "1h 02m 03s"
pub fn format_eta(d: Duration) -> String {
    let total = d.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
