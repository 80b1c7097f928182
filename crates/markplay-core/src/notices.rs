// crates/markplay-core/src/notices.rs
//
// Types that flow out of the controller to whoever is watching it
// (the worker's result channel, the CLI, tests). Plain data only.

use serde::{Deserialize, Serialize};

use crate::state::ControllerState;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum ControllerNotice {
    StateChanged { from: ControllerState, to: ControllerState },
    /// Playback halted at `mark`; the playhead is being moved to `position`.
    HaltedAtMark { mark: f64, position: f64 },
    /// Playback halted before the region end; the playhead is being moved to `position`.
    ParkedAtEnd  { position: f64 },
    /// Another session took over this controller's host.
    Revoked,
}
