//! Timing utilities for capture timestamps and frame pacing
//!
//! `StreamClock` stamps captured frames; `FramePacer` spaces produced frames
//! at `1/fps` on the async runtime clock so paused-time tests stay exact.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic clock for capture timestamps
///
/// All timestamps of one capture source derive from this single start
/// instant to keep them ordered.
#[derive(Debug, Clone)]
pub struct StreamClock {
    start: Arc<Instant>,
}

impl StreamClock {
    /// Create a new clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Create a clock from an existing start instant
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Microseconds elapsed since clock creation
    #[inline]
    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Seconds elapsed since clock creation
    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Rational time base of produced video, `num/den` seconds per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub fn per_frame(fps: u32) -> Self {
        Self {
            num: 1,
            den: fps.max(1),
        }
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000u64 * self.num as u64 / self.den as u64)
    }
}

/// Paces frame emission to a fixed interval.
///
/// `wait` sleeps until `last_emit + interval`. When the caller falls behind
/// the next deadline is measured from the late emit, so there is no burst of
/// catch-up frames.
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    last_emit: Option<tokio::time::Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: TimeBase::per_frame(fps).tick_duration(),
            last_emit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep until the next emit slot, then record the emit.
    pub async fn wait(&mut self) -> tokio::time::Instant {
        if let Some(last) = self.last_emit {
            tokio::time::sleep_until(last + self.interval).await;
        }
        let now = tokio::time::Instant::now();
        self.last_emit = Some(now);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = StreamClock::new();
        let a = clock.elapsed_us();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.elapsed_us();
        assert!(b > a);
    }

    #[test]
    fn test_time_base() {
        let tb = TimeBase::per_frame(30);
        assert_eq!(tb, TimeBase { num: 1, den: 30 });
        assert!((tb.tick_duration().as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);

        assert_eq!(TimeBase::per_frame(0).den, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spacing() {
        let mut pacer = FramePacer::new(20);
        let first = pacer.wait().await;
        let second = pacer.wait().await;
        let third = pacer.wait().await;
        assert_eq!(second - first, Duration::from_millis(50));
        assert_eq!(third - second, Duration::from_millis(50));
    }
}
