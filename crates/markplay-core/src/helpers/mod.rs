// crates/markplay-core/src/helpers/mod.rs
//
// Shared helpers with no dependency on controller state.

pub mod time;
