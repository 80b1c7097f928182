// crates/markplay-control/src/scheduler.rs
//
// Pause scheduler: one single-shot timer aimed at the next mark, or at the
// region end when no mark is left.
//
// Position ticks are too coarse to stop on a mark by themselves (they arrive
// every ~250 ms on most engines), so the controller converts the distance to
// the next target into a wall-clock delay and arms a timer. Ticks still run
// as a cross-check; whichever notices the crossing first halts.
//
// `plan` is pure: it looks at position, rate, suppression and the mark index
// and says what to arm. `PauseScheduler` only holds the one armed timer and
// hands out generation tokens, so a fire for a timer that was since cancelled
// or replaced is recognisable and ignored.

use std::time::Duration;

use markplay_core::commands::TimerToken;
use markplay_core::marks::{MarkIndex, MARK_EPSILON};
use markplay_core::Tolerances;

use crate::clock::WallTime;

/// What the armed timer does when it fires.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimerPurpose {
    /// Halt on `mark` (re-validated on fire).
    HaltAtMark { mark: f64 },
    /// Park just before the region end.
    ParkAtEnd,
    /// Suppression window ended; plan again.
    SuppressionRecheck,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArmedTimer {
    pub token:    TimerToken,
    pub deadline: WallTime,
    pub purpose:  TimerPurpose,
}

/// Owner of the single outstanding timer.
#[derive(Debug, Default)]
pub struct PauseScheduler {
    armed:      Option<ArmedTimer>,
    next_token: u64,
}

impl PauseScheduler {
    /// Arm a timer, replacing any armed one.
    pub fn arm(&mut self, deadline: WallTime, purpose: TimerPurpose) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.armed = Some(ArmedTimer { token, deadline, purpose });
        token
    }

    pub fn cancel(&mut self) {
        if let Some(t) = self.armed.take() {
            log::trace!("[scheduler] cancelled timer {:?}", t.token);
        }
    }

    /// Claim the timer for a fire carrying `token`. `None` means the fire is
    /// stale (cancelled or superseded) and must do nothing.
    pub fn take_if_current(&mut self, token: TimerToken) -> Option<ArmedTimer> {
        match self.armed {
            Some(t) if t.token == token => self.armed.take(),
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<(TimerToken, WallTime)> {
        self.armed.map(|t| (t.token, t.deadline))
    }
}

/// Everything `plan` needs to decide, borrowed from the controller.
#[derive(Clone, Copy, Debug)]
pub struct PlanInput<'a> {
    pub position:       f64,
    pub rate:           f64,
    pub now:            WallTime,
    pub suppress_until: Option<WallTime>,
    pub region_end:     f64,
    pub next_idx:       usize,
    pub marks:          &'a MarkIndex,
    pub tolerances:     &'a Tolerances,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Plan {
    /// Come back when the suppression window closes.
    Recheck { at: WallTime },
    /// Arm a timer.
    Arm { deadline: WallTime, purpose: TimerPurpose },
    /// Already at or past the parking point.
    ParkNow,
}

/// Decide the next timer. Returns the plan and the (possibly advanced) next
/// mark index; marks already behind the playhead are dropped, not halted on.
pub fn plan(input: PlanInput<'_>) -> (Plan, usize) {
    let tol = input.tolerances;

    if let Some(until) = input.suppress_until {
        if until > input.now {
            return (Plan::Recheck { at: until }, input.next_idx);
        }
    }

    let mut idx = input.next_idx.min(input.marks.len());
    while let Some(m) = input.marks.get(idx) {
        if m > input.position + MARK_EPSILON {
            break;
        }
        log::debug!("[scheduler] dropping missed mark {m:.3}s (position {:.3}s)", input.position);
        idx += 1;
    }

    let park_at = park_point(input.region_end, tol);
    let (target, purpose) = match input.marks.get(idx) {
        Some(m) if m < park_at => (m, TimerPurpose::HaltAtMark { mark: m }),
        _                      => (park_at, TimerPurpose::ParkAtEnd),
    };

    if purpose == TimerPurpose::ParkAtEnd && input.position >= park_at {
        return (Plan::ParkNow, idx);
    }

    let delay = delay_for(target - input.position, input.rate, tol);
    (Plan::Arm { deadline: input.now + delay, purpose }, idx)
}

/// Where the playhead rests when parked at the region end.
pub fn park_point(region_end: f64, tol: &Tolerances) -> f64 {
    region_end - tol.end_park_offset.max(0.0)
}

/// Wall-clock time to cover `distance` media seconds at `rate`, never shorter
/// than the minimum timer delay.
pub fn delay_for(distance: f64, rate: f64, tol: &Tolerances) -> Duration {
    let rate = rate.abs().max(tol.rate_floor).max(f64::EPSILON);
    let secs = (distance.max(0.0) / rate).min(86_400.0);
    Duration::from_secs_f64(secs).max(tol.min_timer_delay())
}

#[cfg(test)]
mod tests {
    use super::*;
    use markplay_core::Region;

    fn marks(ms: &[f64], start: f64, end: f64) -> MarkIndex {
        let mut idx = MarkIndex::new(ms.to_vec());
        idx.filter_to_region(&Region { start, end });
        idx
    }

    fn input<'a>(pos: f64, rate: f64, idx: usize, m: &'a MarkIndex, tol: &'a Tolerances) -> PlanInput<'a> {
        PlanInput {
            position:       pos,
            rate,
            now:            WallTime::ZERO,
            suppress_until: None,
            region_end:     10.0,
            next_idx:       idx,
            marks:          m,
            tolerances:     tol,
        }
    }

    #[test]
    fn arms_for_next_mark() {
        let tol = Tolerances::default();
        let m = marks(&[2.0, 5.0, 8.0], 0.0, 10.0);
        let (p, idx) = plan(input(0.0, 1.0, 0, &m, &tol));
        assert_eq!(idx, 0);
        assert_eq!(
            p,
            Plan::Arm {
                deadline: WallTime::from_micros(2_000_000),
                purpose:  TimerPurpose::HaltAtMark { mark: 2.0 },
            }
        );
    }

    #[test]
    fn half_rate_doubles_delay() {
        let tol = Tolerances::default();
        let m = marks(&[5.0], 0.0, 10.0);
        let (p, _) = plan(input(3.0, 0.5, 0, &m, &tol));
        let Plan::Arm { deadline, .. } = p else { panic!("expected arm, got {p:?}") };
        assert_eq!(deadline, WallTime::from_micros(4_000_000));
    }

    #[test]
    fn missed_marks_are_dropped() {
        let tol = Tolerances::default();
        let m = marks(&[2.0, 5.0, 8.0], 0.0, 10.0);
        let (p, idx) = plan(input(5.5, 1.0, 0, &m, &tol));
        assert_eq!(idx, 2);
        assert!(matches!(p, Plan::Arm { purpose: TimerPurpose::HaltAtMark { mark }, .. } if mark == 8.0));
    }

    #[test]
    fn no_marks_left_targets_end() {
        let tol = Tolerances::default();
        let m = marks(&[2.0], 0.0, 10.0);
        let (p, idx) = plan(input(3.0, 1.0, 1, &m, &tol));
        assert_eq!(idx, 1);
        let Plan::Arm { deadline, purpose } = p else { panic!("expected arm, got {p:?}") };
        assert_eq!(purpose, TimerPurpose::ParkAtEnd);
        let expected = delay_for(park_point(10.0, &tol) - 3.0, 1.0, &tol);
        assert_eq!(deadline, WallTime::ZERO + expected);
    }

    #[test]
    fn mark_at_region_end_parks() {
        let tol = Tolerances::default();
        let m = marks(&[10.0], 0.0, 10.0);
        let (p, _) = plan(input(9.0, 1.0, 0, &m, &tol));
        assert!(matches!(p, Plan::Arm { purpose: TimerPurpose::ParkAtEnd, .. }));
    }

    #[test]
    fn past_parking_point_parks_now() {
        let tol = Tolerances::default();
        let m = marks(&[], 0.0, 10.0);
        let (p, _) = plan(input(9.99, 1.0, 0, &m, &tol));
        assert_eq!(p, Plan::ParkNow);
    }

    #[test]
    fn suppression_wins() {
        let tol = Tolerances::default();
        let m = marks(&[2.0], 0.0, 10.0);
        let mut i = input(0.0, 1.0, 0, &m, &tol);
        i.suppress_until = Some(WallTime::from_micros(120_000));
        assert_eq!(plan(i).0, Plan::Recheck { at: WallTime::from_micros(120_000) });
    }

    #[test]
    fn tiny_distance_uses_min_delay() {
        let tol = Tolerances::default();
        assert_eq!(delay_for(0.001, 1.0, &tol), tol.min_timer_delay());
        assert_eq!(delay_for(1.0, 0.0, &tol), Duration::from_secs(20));
    }

    #[test]
    fn stale_tokens_are_rejected() {
        let mut s = PauseScheduler::default();
        let old = s.arm(WallTime::from_micros(5), TimerPurpose::ParkAtEnd);
        let new = s.arm(WallTime::from_micros(9), TimerPurpose::ParkAtEnd);
        assert_ne!(old, new);
        assert!(s.take_if_current(old).is_none());
        assert!(s.take_if_current(new).is_some());
        assert!(s.take_if_current(new).is_none());
    }
}
