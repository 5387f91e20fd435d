//! Run progress reporting

use std::time::{Duration, Instant};

/// `1h 2m 3s`, `2m 3s` or `3s`
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Tracks processed rows and produces progress lines at the first row, the
/// last row and every `every` rows
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    every: usize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize, every: usize) -> Self {
        Self {
            total,
            every: every.max(1),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn should_report(&self, processed: usize) -> bool {
        processed == 1 || processed == self.total || processed % self.every == 0
    }

    /// Progress line for `processed` rows, if one is due
    pub fn report(&self, processed: usize) -> Option<String> {
        self.should_report(processed)
            .then(|| self.line(processed, self.elapsed()))
    }

    /// Rate and ETA are derived from the average time per row so far
    pub fn line(&self, processed: usize, elapsed: Duration) -> String {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { processed as f64 / secs } else { 0.0 };
        let remaining = self.total.saturating_sub(processed);
        let eta = if rate > 0.0 {
            Duration::from_secs_f64(remaining as f64 / rate)
        } else {
            Duration::ZERO
        };
        let pct = if self.total > 0 {
            processed as f64 / self.total as f64 * 100.0
        } else {
            100.0
        };

        format!(
            "Progress: {}/{} ({:.1}%) | elapsed {} | rate {:.2} it/s | ETA {}",
            processed,
            self.total,
            pct,
            format_duration(elapsed),
            rate,
            format_duration(eta)
        )
    }
}
