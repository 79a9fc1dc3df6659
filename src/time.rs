//! Clock access and sleep primitives.
//!
//! All control and fusion code reads time through [`Clock`] as seconds since an
//! arbitrary epoch, so tests can drive the whole stack with a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-clock monotonic time measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Resolution is one microsecond.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time in seconds.
    pub fn set(&self, secs: f64) {
        self.micros
            .store((secs * 1_000_000.0).round() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

/// Sleep for a number of milliseconds.
#[inline]
pub fn sleep_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

/// Sleep for a fractional number of seconds. Negative values return at once.
#[inline]
pub fn sleep_secs(secs: f64) {
    if secs > 0.0 {
        thread::sleep(Duration::from_secs_f64(secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), 0.0);
        clock.advance(Duration::from_millis(5));
        clock.advance(Duration::from_millis(5));
        assert_relative_eq!(clock.now(), 0.010);
        clock.set(2.5);
        assert_relative_eq!(clock.now(), 2.5);
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        sleep_ms(2);
        assert!(clock.now() > a);
    }
}
