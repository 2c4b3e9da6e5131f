//! Render owner thread
//!
//! The render owner creates the graphics context, runs one queued work item
//! per tick, calls the application's frame callback and then releases anyone
//! waiting for the next vsync.

pub mod backend;
pub mod debug_output;
pub mod thread;

pub use backend::{
    Capabilities, DebugApi, DebugCallback, DebugMessage, DebugSeverity, GraphicsBackend,
    GraphicsFeatures, NullBackend,
};
pub use thread::{RenderCallback, RenderHandle, RenderThread, VSyncHandle};
