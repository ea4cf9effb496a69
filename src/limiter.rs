//! Tick rate limiting for render pipeline threads.
//!
//! A [`FrameLimiter`] caps how many iterations per second a loop may run.
//! The pattern is: call [`begin_tick`](FrameLimiter::begin_tick) at the top
//! of the loop body, do the work, then call [`wait`](FrameLimiter::wait) to
//! sleep out the remainder of the target period.

use std::time::{Duration, Instant};

/// Paces a loop to a target iteration rate.
///
/// A limiter with no rate configured never sleeps.
///
/// # Example
///
/// ```
/// use vermilion_graphics::limiter::FrameLimiter;
///
/// let mut limiter = FrameLimiter::new(60);
/// limiter.begin_tick();
/// // ... tick work ...
/// limiter.wait(); // sleeps whatever is left of the ~16.6ms period
/// ```
#[derive(Debug, Clone)]
pub struct FrameLimiter {
    period: Option<Duration>,
    tick_start: Option<Instant>,
}

impl FrameLimiter {
    /// Create a limiter targeting `ticks_per_second` iterations.
    ///
    /// A rate of 0 disables pacing, same as [`unlimited`](Self::unlimited).
    pub fn new(ticks_per_second: u32) -> Self {
        let period = if ticks_per_second == 0 {
            None
        } else {
            Some(Duration::from_secs(1) / ticks_per_second)
        };
        Self {
            period,
            tick_start: None,
        }
    }

    /// Create a limiter that never sleeps.
    pub fn unlimited() -> Self {
        Self {
            period: None,
            tick_start: None,
        }
    }

    /// Get the target period, if pacing is enabled.
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Change the target rate. Takes effect from the next tick.
    pub fn set_rate(&mut self, ticks_per_second: u32) {
        self.period = if ticks_per_second == 0 {
            None
        } else {
            Some(Duration::from_secs(1) / ticks_per_second)
        };
    }

    /// Mark the start of a tick.
    pub fn begin_tick(&mut self) {
        self.tick_start = Some(Instant::now());
    }

    /// Sleep out the remainder of the target period.
    ///
    /// Returns immediately if pacing is disabled, if [`begin_tick`](Self::begin_tick)
    /// was not called, or if the tick already overran the period.
    pub fn wait(&mut self) {
        let start = self.tick_start.take();
        if let (Some(period), Some(start)) = (self.period, start) {
            let elapsed = start.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
    }
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_sleeps() {
        let mut limiter = FrameLimiter::unlimited();
        assert!(limiter.period().is_none());

        let start = Instant::now();
        limiter.begin_tick();
        limiter.wait();
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_zero_rate_is_unlimited() {
        let limiter = FrameLimiter::new(0);
        assert!(limiter.period().is_none());
    }

    #[test]
    fn test_wait_without_begin_is_noop() {
        let mut limiter = FrameLimiter::new(10);
        let start = Instant::now();
        limiter.wait();
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_wait_pads_short_tick() {
        let mut limiter = FrameLimiter::new(50); // 20ms period

        let start = Instant::now();
        limiter.begin_tick();
        limiter.wait();
        // Sleep granularity varies, allow generous slack on the upper bound.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(18), "elapsed {elapsed:?}");
    }

    #[test]
    fn test_overrun_tick_does_not_sleep() {
        let mut limiter = FrameLimiter::new(100); // 10ms period
        limiter.begin_tick();
        std::thread::sleep(Duration::from_millis(15));

        let start = Instant::now();
        limiter.wait();
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_set_rate() {
        let mut limiter = FrameLimiter::unlimited();
        limiter.set_rate(10);
        assert_eq!(limiter.period(), Some(Duration::from_millis(100)));
        limiter.set_rate(0);
        assert!(limiter.period().is_none());
    }
}
