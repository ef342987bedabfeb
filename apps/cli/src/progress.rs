//! Transfer speed and ETA estimation for progress display.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window transfer speed estimator.
///
/// Records cumulative byte counts and averages over a bounded time window,
/// so the displayed rate tracks the recent transfer rather than the whole
/// run (which would make a resumed upload look instantaneous).
pub struct SpeedCalculator {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    max_samples: usize,
}

impl SpeedCalculator {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            window: Duration::from_secs(5),
            max_samples: 100,
        }
    }

    /// Records the cumulative number of bytes completed so far.
    pub fn record(&mut self, cumulative_bytes: u64) {
        self.record_at(Instant::now(), cumulative_bytes);
    }

    fn record_at(&mut self, at: Instant, cumulative_bytes: u64) {
        self.samples.push_back((at, cumulative_bytes));

        // Prune samples that fell out of the window.
        while let Some(&(t, _)) = self.samples.front() {
            if at.duration_since(t) > self.window && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average speed in bytes per second within the window.
    ///
    /// Returns 0.0 until two samples have been recorded.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = t1.duration_since(t0);
        if elapsed.is_zero() || b1 <= b0 {
            return 0.0;
        }
        (b1 - b0) as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time until `remaining_bytes` more are transferred.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let bps = self.bytes_per_second();
        if bps <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / bps))
    }
}

/// Formats a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Formats a duration as `1h02m03s` / `2m03s` / `45s`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}
