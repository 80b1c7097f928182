// crates/markplay-control/src/lib.rs
//
// The playback controller and everything it needs at runtime.
//
// Layering (leaf first):
//   clock / engine   : seams to the outside world (time source, media engine)
//   snap             : pause, wait a frame, then set position
//   scheduler        : single-shot timer for the next mark or the region end
//   arbiter          : suppression window + re-sync after user gestures
//   controller       : the state machine that owns all of the above
//   registry         : one live controller per host; new sessions revoke old
//   worker           : runs a controller on its own thread over channels
//   sim              : deterministic engine + harness for tests and the CLI
//
// To add a new input: add a ControllerEvent variant in markplay-core, then a
// match arm in controller.rs.

pub mod arbiter;
pub mod clock;
pub mod controller;
pub mod engine;
pub mod registry;
pub mod scheduler;
pub mod sim;
pub mod snap;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock, WallTime};
pub use controller::Controller;
pub use engine::{EngineError, NoOverlay, PlaybackEngine, RegionOverlay};
pub use registry::{Lease, Registry};
pub use worker::{ControllerWorker, WorkerSender, WorkerStopped};

pub use markplay_core::notices::ControllerNotice;
