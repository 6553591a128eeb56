use std::time::{Duration, Instant};

pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(500);

/// Megabits per second: `bytes * 8 / (seconds * 1e6)`. An empty interval
/// yields zero.
pub fn rate_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / (secs * 1e6)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    /// Emit after this many cycles. Zero behaves like one.
    EveryCycles(u32),
    TimeSlice(Duration),
}

impl Default for Sampling {
    fn default() -> Self {
        Sampling::TimeSlice(DEFAULT_TIME_SLICE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub timestamp_secs: f64,
    pub mbps: f64,
    pub latency: Option<Duration>,
    pub boundary: bool,
}

pub struct RateMeter {
    sampling: Sampling,
    origin: Instant,
    window_start: Instant,
    window_bytes: u64,
    window_cycles: u32,
}

impl RateMeter {
    pub fn new(sampling: Sampling, origin: Instant) -> Self {
        Self {
            sampling,
            origin,
            window_start: origin,
            window_bytes: 0,
            window_cycles: 0,
        }
    }

    /// Opens a fresh window, dropping whatever was accumulated.
    pub fn restart(&mut self, now: Instant) {
        self.window_start = now;
        self.window_bytes = 0;
        self.window_cycles = 0;
    }

    pub fn record(
        &mut self,
        bytes: usize,
        latency: Option<Duration>,
        now: Instant,
    ) -> Option<RateSample> {
        self.window_bytes += bytes as u64;
        self.window_cycles += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        let due = match self.sampling {
            Sampling::EveryCycles(cycles) => self.window_cycles >= cycles.max(1),
            Sampling::TimeSlice(slice) => elapsed >= slice,
        };
        if !due {
            return None;
        }

        let sample = RateSample {
            timestamp_secs: self.timestamp(now),
            mbps: rate_mbps(self.window_bytes, elapsed),
            latency,
            boundary: false,
        };
        self.restart(now);
        Some(sample)
    }

    /// Zero-rate sample marking a lost connection.
    pub fn boundary(&mut self, now: Instant) -> RateSample {
        self.restart(now);
        RateSample {
            timestamp_secs: self.timestamp(now),
            mbps: 0.0,
            latency: None,
            boundary: true,
        }
    }

    fn timestamp(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.origin).as_secs_f64()
    }
}
