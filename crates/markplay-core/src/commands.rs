// crates/markplay-core/src/commands.rs
//
// Every input the controller reacts to is a ControllerEvent.
// Engine callbacks, timers, frame continuations, user gestures and the
// control surface all funnel into this one enum, and the controller consumes
// them one at a time. Adding a new input = add a variant here + one match arm
// in markplay-control/src/controller.rs.

use serde::{Deserialize, Serialize};

/// Generation number of an armed timer. A fire carrying a token that is no
/// longer the armed one is stale and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerToken(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControllerEvent {
    // ── Engine feedback ──────────────────────────────────────────────────────
    /// Media finished loading; carries its duration in seconds.
    MediaReady(f64),
    /// Periodic position sample from the engine.
    Tick(f64),
    /// The engine started playing (confirmation, or an outside source such as
    /// media keys).
    PlaybackStarted,
    /// The engine paused.
    PlaybackPaused,

    // ── Deferred work ────────────────────────────────────────────────────────
    /// The single-shot mark/boundary timer reached its deadline.
    MarkTimerFired(TimerToken),
    /// A rendering-frame boundary passed; queued continuations may run.
    FrameElapsed,

    // ── Region widget ────────────────────────────────────────────────────────
    /// The drag widget proposes new bounds.
    RegionChanged { start: f64, end: f64 },

    // ── User gestures on the timeline ────────────────────────────────────────
    /// A click or drag on the timeline started.
    UserInteraction,
    /// The position the gesture landed on, once the engine confirmed the seek.
    UserSeek(f64),

    // ── Explicit requests ────────────────────────────────────────────────────
    PlayRequested,
    PauseRequested,
    ResetRequested,
    RateChanged(f64),

    // ── Control surface (buttons / keys) ─────────────────────────────────────
    PlayPause,
    Stop,
    SkipBy(f64),
    JumpToPreviousMark,
}

impl ControllerEvent {
    /// Events that express a fresh user decision. These win over anything
    /// scheduled before them.
    pub fn is_user_driven(&self) -> bool {
        matches!(
            self,
            Self::RegionChanged { .. }
                | Self::UserInteraction
                | Self::UserSeek(_)
                | Self::PlayRequested
                | Self::PauseRequested
                | Self::ResetRequested
                | Self::RateChanged(_)
                | Self::PlayPause
                | Self::Stop
                | Self::SkipBy(_)
                | Self::JumpToPreviousMark
        )
    }

    /// High-frequency events that are logged at trace level only.
    pub fn is_chatty(&self) -> bool {
        matches!(self, Self::Tick(_) | Self::FrameElapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_feedback_is_not_user_driven() {
        assert!(!ControllerEvent::Tick(1.0).is_user_driven());
        assert!(!ControllerEvent::MarkTimerFired(TimerToken(3)).is_user_driven());
        assert!(!ControllerEvent::PlaybackPaused.is_user_driven());
        assert!(ControllerEvent::JumpToPreviousMark.is_user_driven());
        assert!(ControllerEvent::UserSeek(2.0).is_user_driven());
    }
}
