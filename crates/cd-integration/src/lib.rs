//! Runtime controller
//!
//! Starts the audio, loader and render owners in dependency order and tears
//! them down in reverse, so nothing that holds the audio context outlives it.

pub mod runtime;

pub use runtime::{Runtime, RuntimeState};
