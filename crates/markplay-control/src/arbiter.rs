// crates/markplay-control/src/arbiter.rs
//
// Interaction arbiter: who wins when a user gesture races the scheduler.
//
// A click on the timeline arrives as two events: the gesture starting, then
// (some milliseconds later) the engine confirming the seek. Between the two,
// the position the scheduler sees is stale. The arbiter opens a suppression
// window on the gesture, during which no timer or tick may halt, and
// remembers whether the gesture should start playback once the seek lands.

use std::time::Duration;

use crate::clock::WallTime;

/// A gesture waiting for its seek confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingInteraction {
    /// Engine was not playing when the gesture began: the seek should start it.
    pub autoplay:   bool,
    pub started_at: WallTime,
}

#[derive(Debug, Default)]
pub struct InteractionArbiter {
    suppress_until: Option<WallTime>,
    pending:        Option<PendingInteraction>,
}

impl InteractionArbiter {
    /// Record a gesture. Extends (never shortens) the suppression window and
    /// replaces any earlier unconfirmed gesture.
    pub fn begin(&mut self, now: WallTime, window: Duration, engine_playing: bool) {
        let until = now + window;
        self.suppress_until = Some(self.suppress_until.map_or(until, |u| u.max(until)));
        self.pending = Some(PendingInteraction {
            autoplay:   !engine_playing,
            started_at: now,
        });
        log::debug!(
            "[arbiter] gesture, suppressing for {} ms (autoplay {})",
            window.as_millis(),
            !engine_playing
        );
    }

    /// Consume the pending gesture, if any, for a seek confirmation.
    pub fn take_pending(&mut self) -> Option<PendingInteraction> {
        self.pending.take()
    }

    /// Forget a gesture that a newer command overrode.
    pub fn cancel_pending(&mut self) {
        if self.pending.take().is_some() {
            log::debug!("[arbiter] pending gesture overridden");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_suppressing(&self, now: WallTime) -> bool {
        self.suppress_until.is_some_and(|u| u > now)
    }

    /// The end of the window while it is still open.
    pub fn suppress_until(&self, now: WallTime) -> Option<WallTime> {
        self.suppress_until.filter(|u| *u > now)
    }

    pub fn clear(&mut self) {
        self.suppress_until = None;
        self.pending = None;
    }
}
