// crates/markplay-control/src/clock.rs
//
// Wall-clock time for timers and suppression windows.
//
// Media time is f64 seconds and lives on the engine. Wall time is what timers
// are armed against; it is a separate integer type so the two can never be
// mixed up in delay arithmetic. The controller reads it through `Clock` so
// tests can drive it by hand.

use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic instant, in microseconds since the owning clock's origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallTime(u64);

impl WallTime {
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(us: u64) -> Self {
        Self(us)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Time from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for WallTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        let us = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(us))
    }
}

pub trait Clock: Send {
    fn now(&self) -> WallTime;
}

/// Real monotonic time.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> WallTime {
        let us = u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX);
        WallTime(us)
    }
}

/// Hand-driven time. Clones share the same instant, so a harness keeps one
/// handle and the controller owns another.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let us = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.us.fetch_add(us, Ordering::SeqCst);
    }

    /// Jump to `to`. Moving backwards is ignored; wall time is monotonic.
    pub fn set(&self, to: WallTime) {
        self.us.fetch_max(to.0, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> WallTime {
        WallTime(self.us.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let a = ManualClock::new();
        let b = a.clone();
        a.advance(Duration::from_millis(250));
        assert_eq!(b.now(), WallTime::from_micros(250_000));
    }

    #[test]
    fn manual_clock_never_goes_back() {
        let c = ManualClock::new();
        c.set(WallTime::from_micros(10));
        c.set(WallTime::from_micros(5));
        assert_eq!(c.now(), WallTime::from_micros(10));
    }

    #[test]
    fn wall_time_arithmetic() {
        let t = WallTime::from_micros(1_000) + Duration::from_millis(2);
        assert_eq!(t.as_micros(), 3_000);
        assert_eq!(t.saturating_since(WallTime::from_micros(500)), Duration::from_micros(2_500));
        assert_eq!(WallTime::ZERO.saturating_since(t), Duration::ZERO);
    }
}
