//! Graphics backends

pub mod null;

pub use null::{GraphicsProbe, NullBackend};

use bitflags::bitflags;

use crate::thread::VSyncHandle;

bitflags! {
    /// Context features relevant to the render owner
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GraphicsFeatures: u32 {
        /// Core 4.3 debug output
        const CORE_43 = 1 << 0;
        /// Core 3.0, needed to query context flags
        const CORE_30 = 1 << 1;
        const KHR_DEBUG = 1 << 2;
        const ARB_DEBUG_OUTPUT = 1 << 3;
        const AMD_DEBUG_OUTPUT = 1 << 4;
        /// The context was created with the debug flag
        const DEBUG_CONTEXT = 1 << 5;
    }
}

/// Description of a created context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub version: String,
    pub shading_language: String,
    pub renderer: String,
    pub vendor: String,
    pub features: GraphicsFeatures,
}

/// Debug-output mechanisms, most specific first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugApi {
    Core43,
    KhrDebug,
    ArbDebugOutput,
    AmdDebugOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    High,
    Medium,
    Low,
    Notification,
}

/// A message reported by the driver through the installed callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    pub id: u32,
    pub severity: DebugSeverity,
    pub text: String,
}

pub type DebugCallback = Box<dyn Fn(&DebugMessage) + Send + Sync>;

/// Graphics context owned by the render thread.
///
/// Every method is called on the render owner only.
pub trait GraphicsBackend: Send {
    fn name(&self) -> &str;

    /// Create the context and make it current. `vsync` lets the display
    /// layer block until the next rendered frame. Returns `None` on failure.
    fn create_context(&mut self, vsync: VSyncHandle) -> Option<Capabilities>;

    fn begin_frame(&mut self);

    /// Finish the frame and present it
    fn end_frame(&mut self);

    /// Block until every submitted command has completed
    fn finish(&mut self);

    /// Route driver debug messages through `callback`
    fn install_debug_callback(
        &mut self,
        api: DebugApi,
        callback: DebugCallback,
    ) -> anyhow::Result<()>;

    /// Enable debug output on a context that was not created for debugging,
    /// muting the given message ids
    fn enable_debug_output(&mut self, suppressed_ids: &[u32]);

    /// Release the context and any installed callback
    fn release_context(&mut self);
}
