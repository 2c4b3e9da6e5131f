//! Headless backend
//!
//! Paces frames with a sleep instead of a display and records what the render
//! owner did through a shared [`GraphicsProbe`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    Capabilities, DebugApi, DebugCallback, DebugMessage, GraphicsBackend, GraphicsFeatures,
};
use crate::thread::VSyncHandle;

/// Observations of a [`NullBackend`], readable from any thread
#[derive(Default)]
pub struct GraphicsProbe {
    frames: AtomicU64,
    flushes: AtomicU64,
    installed: Mutex<Option<DebugApi>>,
    callback: Mutex<Option<DebugCallback>>,
    debug_enabled: AtomicBool,
    suppressed: Mutex<Vec<u32>>,
    released: AtomicBool,
    vsync: Mutex<Option<VSyncHandle>>,
}

impl GraphicsProbe {
    /// Frames presented so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Full pipeline flushes so far
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn installed_debug_api(&self) -> Option<DebugApi> {
        *self.installed.lock()
    }

    pub fn debug_output_enabled(&self) -> bool {
        self.debug_enabled.load(Ordering::SeqCst)
    }

    pub fn suppressed_ids(&self) -> Vec<u32> {
        self.suppressed.lock().clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// The handle passed to `create_context`, as a display layer would keep it
    pub fn vsync(&self) -> Option<VSyncHandle> {
        self.vsync.lock().clone()
    }

    /// Report a driver message. Returns whether a callback received it.
    pub fn emit(&self, message: &DebugMessage) -> bool {
        if self.suppressed.lock().contains(&message.id) {
            return false;
        }
        match self.callback.lock().as_ref() {
            Some(callback) => {
                callback(message);
                true
            }
            None => false,
        }
    }
}

/// Graphics backend without a display
pub struct NullBackend {
    capabilities: Option<Capabilities>,
    frame_interval: Duration,
    frame_start: Option<Instant>,
    probe: Arc<GraphicsProbe>,
}

impl NullBackend {
    pub fn new(frame_interval: Duration) -> Self {
        Self::with_features(
            frame_interval,
            GraphicsFeatures::CORE_43
                | GraphicsFeatures::CORE_30
                | GraphicsFeatures::KHR_DEBUG
                | GraphicsFeatures::DEBUG_CONTEXT,
        )
    }

    pub fn with_features(frame_interval: Duration, features: GraphicsFeatures) -> Self {
        Self {
            capabilities: Some(Capabilities {
                version: "4.6 headless".to_string(),
                shading_language: "4.60".to_string(),
                renderer: "null".to_string(),
                vendor: "cadence".to_string(),
                features,
            }),
            frame_interval,
            frame_start: None,
            probe: Arc::new(GraphicsProbe::default()),
        }
    }

    /// A backend whose context creation always fails
    pub fn without_context() -> Self {
        Self {
            capabilities: None,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn probe(&self) -> Arc<GraphicsProbe> {
        self.probe.clone()
    }
}

impl GraphicsBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn create_context(&mut self, vsync: VSyncHandle) -> Option<Capabilities> {
        let capabilities = self.capabilities.clone()?;
        *self.probe.vsync.lock() = Some(vsync);
        Some(capabilities)
    }

    fn begin_frame(&mut self) {
        self.frame_start = Some(Instant::now());
    }

    fn end_frame(&mut self) {
        self.probe.frames.fetch_add(1, Ordering::SeqCst);
        if let Some(start) = self.frame_start.take() {
            let elapsed = start.elapsed();
            if elapsed < self.frame_interval {
                thread::sleep(self.frame_interval - elapsed);
            }
        }
    }

    fn finish(&mut self) {
        self.probe.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn install_debug_callback(
        &mut self,
        api: DebugApi,
        callback: DebugCallback,
    ) -> anyhow::Result<()> {
        let mut installed = self.probe.installed.lock();
        if let Some(existing) = *installed {
            anyhow::bail!("{:?} debug callback already installed", existing);
        }
        *installed = Some(api);
        *self.probe.callback.lock() = Some(callback);
        Ok(())
    }

    fn enable_debug_output(&mut self, suppressed_ids: &[u32]) {
        self.probe.debug_enabled.store(true, Ordering::SeqCst);
        self.probe.suppressed.lock().extend_from_slice(suppressed_ids);
    }

    fn release_context(&mut self) {
        self.probe.callback.lock().take();
        self.probe.vsync.lock().take();
        self.probe.released.store(true, Ordering::SeqCst);
    }
}
