// crates/markplay-core/src/lib.rs
//
// Pure session data for markplay: no engine handles, no clocks, no threads.
// markplay-control builds the controller on top of these types; markplay-cli
// reads the config types from disk.

pub mod commands;
pub mod config;
pub mod helpers;
pub mod marks;
pub mod notices;
pub mod region;
pub mod state;

pub use commands::{ControllerEvent, TimerToken};
pub use config::{ConfigError, PointerProfile, SessionConfig, SessionPlan, ToleranceOverrides, Tolerances};
pub use marks::MarkIndex;
pub use notices::ControllerNotice;
pub use region::Region;
pub use state::{ControllerState, Snapshot};
