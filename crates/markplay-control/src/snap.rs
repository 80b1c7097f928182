// crates/markplay-control/src/snap.rs
//
// Playhead snap: move the engine position as exactly as it allows.
//
// Engines round or drop a seek issued while audio is running. The reliable
// choreography is pause, let one rendering frame pass, then set the position.
// The controller owns a FrameQueue; `snap_to` either seeks right away (engine
// already paused) or pauses and queues the seek for the next FrameElapsed.
//
// Every queued task carries the epoch it was queued under. A user decision
// bumps the epoch, so a continuation queued before it is dropped on the floor
// when the frame arrives instead of undoing the newer decision.
//
// Seek failures are soft: we log and carry on. The next position tick is the
// ground truth, same as a seek that silently missed.

use crate::engine::PlaybackEngine;

/// Work deferred to the next rendering-frame boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameTask {
    /// Apply a position the engine was paused for.
    Snap { target: f64 },
    /// Start the engine after a snap landed.
    Play,
    /// Release the reset guard.
    SettleReset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapOutcome {
    /// Position set now (or the seek soft-failed; either way nothing is queued).
    Applied,
    /// Engine was paused; the seek runs on the next frame.
    Deferred,
}

/// FIFO of frame continuations tagged with the epoch they belong to.
#[derive(Debug, Default)]
pub struct FrameQueue {
    tasks: Vec<(u64, FrameTask)>,
}

impl FrameQueue {
    pub fn push(&mut self, epoch: u64, task: FrameTask) {
        self.tasks.push((epoch, task));
    }

    /// Take everything queued so far. Tasks pushed while the caller runs
    /// these wait for the following frame.
    pub fn take_all(&mut self) -> Vec<(u64, FrameTask)> {
        std::mem::take(&mut self.tasks)
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Drop queued Play tasks but keep position work.
    pub fn cancel_plays(&mut self) {
        self.tasks.retain(|(_, t)| !matches!(t, FrameTask::Play));
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Any live work for `epoch`.
    pub fn has_pending(&self, epoch: u64) -> bool {
        self.tasks.iter().any(|(e, _)| *e == epoch)
    }

    pub fn has_pending_play(&self, epoch: u64) -> bool {
        self.tasks.iter().any(|(e, t)| *e == epoch && matches!(t, FrameTask::Play))
    }

    /// The last queued snap target for `epoch`; where the playhead is headed.
    pub fn pending_snap(&self, epoch: u64) -> Option<f64> {
        self.tasks.iter().rev().find_map(|(e, t)| match t {
            FrameTask::Snap { target } if *e == epoch => Some(*target),
            _ => None,
        })
    }
}

/// Move the playhead to `target`.
///
/// If the engine is playing it is paused now and the seek is queued for the
/// next frame under `epoch`; otherwise the seek happens immediately.
pub fn snap_to<E: PlaybackEngine + ?Sized>(
    engine: &mut E,
    frames: &mut FrameQueue,
    epoch:  u64,
    target: f64,
) -> SnapOutcome {
    if engine.is_playing() {
        engine.pause();
        frames.push(epoch, FrameTask::Snap { target });
        log::debug!("[snap] paused, seek to {target:.3}s deferred one frame");
        SnapOutcome::Deferred
    } else {
        apply_seek(engine, target, "snap");
        SnapOutcome::Applied
    }
}

/// Seek `engine` to `target`.
///
/// Returns `false` if the engine reported a failure. Callers never retry;
/// the next tick tells the controller where the engine really is.
pub fn apply_seek<E: PlaybackEngine + ?Sized>(engine: &mut E, target: f64, label: &str) -> bool {
    match engine.set_time(target) {
        Ok(()) => true,
        Err(e) => {
            log::warn!(
                "[snap] soft-fail in {label} at {target:.3}s: {e}; \
                 trusting the next position tick"
            );
            false
        }
    }
}
