// crates/markplay-control/src/engine.rs
//
// Seams to the external collaborators: the media engine that actually makes
// sound, and the widget that draws the region on the waveform.
//
// Only the controller holds these. Snap and scheduler code receive the engine
// by reference from the controller and never keep it.

use markplay_core::Region;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("play was rejected: {0}")]
    PlayRejected(String),
    #[error("seek to {target:.3}s failed: {reason}")]
    SeekFailed { target: f64, reason: String },
    #[error("media is not loaded")]
    NotReady,
}

/// The media playback engine.
///
/// Engines are imprecise: position is coarse, play/pause may take effect
/// later than the call, and a seek issued while audio runs can be rounded
/// or dropped. The controller treats the next position tick as ground truth
/// and never retries a failed call in a loop.
pub trait PlaybackEngine: Send {
    fn play(&mut self) -> Result<(), EngineError>;
    fn pause(&mut self);
    fn is_playing(&self) -> bool;
    /// Current position in media seconds.
    fn current_time(&self) -> f64;
    /// Exact seek to `t` media seconds.
    fn set_time(&mut self, t: f64) -> Result<(), EngineError>;
    /// Media length in seconds; 0 until loaded.
    fn duration(&self) -> f64;
    fn set_playback_rate(&mut self, rate: f64, preserve_pitch: bool);
}

/// The visual region on the waveform. It only displays bounds; proposals
/// come back to the controller as `ControllerEvent::RegionChanged`.
pub trait RegionOverlay: Send {
    fn add_region(&mut self, region: Region);
    fn clear_regions(&mut self);
}

/// Overlay for hosts that draw nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverlay;

impl RegionOverlay for NoOverlay {
    fn add_region(&mut self, _region: Region) {}
    fn clear_regions(&mut self) {}
}
