// crates/markplay-core/src/state.rs
//
// Controller state as a tagged value.
//
// The mode flags a playback controller tends to accumulate (parked, resetting,
// halted-at-mark) are variants here so illegal combinations cannot be built.
// The one piece of data a halt needs later, the mark it stopped at, rides
// inside the PausedAtMark variant.

use serde::{Deserialize, Serialize};

use crate::region::Region;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerState {
    /// No media loaded yet, or this controller's lease was revoked.
    Idle,
    /// Media loaded and halted by the user, a stop, or a finished reset.
    Paused,
    Playing,
    /// Halted because playback reached `mark`; resume continues just past it.
    PausedAtMark { mark: f64 },
    /// Halted just before the region end instead of letting the engine finish.
    ParkedAtEnd,
    /// Region is being rebuilt; play attempts are swallowed until it settles.
    Resetting,
}

impl ControllerState {
    /// Halted by the controller itself (mark or boundary), as opposed to the user.
    pub fn is_auto_halted(&self) -> bool {
        matches!(self, Self::PausedAtMark { .. } | Self::ParkedAtEnd)
    }

    /// Media is loaded and the controller accepts commands.
    pub fn is_ready(&self) -> bool {
        !matches!(self, Self::Idle | Self::Resetting)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle              => "idle",
            Self::Paused            => "paused",
            Self::Playing           => "playing",
            Self::PausedAtMark { .. } => "paused-at-mark",
            Self::ParkedAtEnd       => "parked-at-end",
            Self::Resetting         => "resetting",
        }
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Read-only view of a controller for UI glue and logging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state:           ControllerState,
    pub position:        f64,
    pub duration:        f64,
    pub region:          Option<Region>,
    pub active_marks:    Vec<f64>,
    pub next_mark_index: usize,
    pub rate:            f64,
}

impl Snapshot {
    /// The mark playback will stop at next, if any.
    pub fn next_mark(&self) -> Option<f64> {
        self.active_marks.get(self.next_mark_index).copied()
    }
}
