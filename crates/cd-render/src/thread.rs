//! Render owner thread

use std::sync::Arc;

use cd_core::config::GraphicsConfig;
use cd_core::error::{RenderError, ThreadError};
use cd_thread::{
    Affinity, ExecutionPolicy, ExecutorHandle, Pending, Phase, QueueExecutor, Rendezvous,
    ThreadContext, ThreadControl, TickStage,
};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::backend::{Capabilities, GraphicsBackend};
use crate::debug_output;

/// Thread name of the render owner
pub const RENDER_THREAD_NAME: &str = "RenderThread";

/// Per-frame callback run on the render owner between begin and end of frame
pub type RenderCallback = Box<dyn FnMut(&mut dyn GraphicsBackend) + Send>;

/// Lets any thread wait for the render owner's next finished frame.
///
/// Display layers that get redraw callbacks on a thread of their own use this
/// to line up with the render cadence.
#[derive(Clone, Default)]
pub struct VSyncHandle {
    rendezvous: Arc<Rendezvous>,
}

impl VSyncHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the next frame is finished on the GPU. Returns `false` if
    /// the render owner was interrupted instead.
    pub fn await_vsync(&self) -> bool {
        self.rendezvous.arrive_and_wait()
    }

    pub fn has_waiters(&self) -> bool {
        self.rendezvous.has_waiters()
    }

    fn signal(&self, backend: &mut dyn GraphicsBackend) {
        if self.rendezvous.has_waiters() {
            backend.finish();
            let released = self.rendezvous.release();
            cd_core::render_trace!("VSync released {} waiters", released);
        }
    }
}

#[derive(Default)]
struct RenderShared {
    capabilities: Mutex<Option<Capabilities>>,
}

/// [`TickStage`] of the render owner
pub struct RenderStage {
    backend: Box<dyn GraphicsBackend>,
    render: RenderCallback,
    vsync: VSyncHandle,
    debug_callback: bool,
    shared: Arc<RenderShared>,
    context_created: bool,
}

impl TickStage for RenderStage {
    fn init(&mut self, _ctx: &ThreadContext) -> bool {
        let Some(caps) = self.backend.create_context(self.vsync.clone()) else {
            let err = RenderError::InitializationFailure(format!(
                "{} backend created no context",
                self.backend.name()
            ));
            error!("{}", err);
            return false;
        };
        self.context_created = true;

        info!("Graphics context created");
        info!("Version: {}", caps.version);
        info!("Shading language: {}", caps.shading_language);
        info!("Renderer: {}", caps.renderer);
        info!("Vendor: {}", caps.vendor);

        if self.debug_callback {
            debug_output::install(self.backend.as_mut(), &caps);
        }
        *self.shared.capabilities.lock() = Some(caps);
        true
    }

    fn after_drain(&mut self, _ctx: &ThreadContext) {
        self.backend.begin_frame();
        (self.render)(self.backend.as_mut());
        self.backend.end_frame();
        self.vsync.signal(self.backend.as_mut());
    }

    fn shutdown(&mut self, _ctx: &ThreadContext) -> anyhow::Result<()> {
        self.vsync.rendezvous.terminate();
        if self.context_created {
            self.backend.release_context();
            self.context_created = false;
            cd_core::render_debug!("Graphics context released");
        }
        Ok(())
    }

    fn park_when_idle(&self) -> bool {
        false
    }
}

/// The render owner thread
pub struct RenderThread {
    executor: QueueExecutor<RenderStage>,
    vsync: VSyncHandle,
    shared: Arc<RenderShared>,
}

impl RenderThread {
    pub fn new(
        config: &GraphicsConfig,
        backend: Box<dyn GraphicsBackend>,
        render: RenderCallback,
    ) -> Self {
        let vsync = VSyncHandle::new();
        let shared = Arc::new(RenderShared::default());
        let stage = RenderStage {
            backend,
            render,
            vsync: vsync.clone(),
            debug_callback: config.debug_callback,
            shared: shared.clone(),
            context_created: false,
        };
        let executor =
            QueueExecutor::new(RENDER_THREAD_NAME, ExecutionPolicy::OnePerIteration, false, stage);
        executor.control().add_waker(vsync.rendezvous.clone());
        Self {
            executor,
            vsync,
            shared,
        }
    }

    /// Acquire `affinity` (usually the audio context) before the context is created
    pub fn with_affinity(mut self, affinity: Arc<dyn Affinity>) -> Self {
        self.executor = self.executor.with_affinity(affinity);
        self
    }

    pub fn start(&mut self) -> Result<(), ThreadError> {
        self.executor.start()
    }

    pub fn handle(&self) -> RenderHandle {
        RenderHandle {
            executor: self.executor.handle(),
            vsync: self.vsync.clone(),
            shared: self.shared.clone(),
        }
    }

    pub fn vsync(&self) -> VSyncHandle {
        self.vsync.clone()
    }

    pub fn phase(&self) -> Phase {
        self.executor.phase()
    }

    pub fn wait_for_ready(&self) {
        self.executor.wait_for_ready();
    }

    pub fn init_succeeded(&self) -> bool {
        self.executor.init_succeeded()
    }

    pub fn interrupt(&self) {
        self.executor.interrupt();
    }

    pub fn allow_teardown(&self) {
        self.executor.allow_teardown();
    }

    pub fn join(&mut self) -> Result<(), ThreadError> {
        self.executor.join()
    }
}

/// Cloneable access to the render owner from any thread
#[derive(Clone)]
pub struct RenderHandle {
    executor: ExecutorHandle,
    vsync: VSyncHandle,
    shared: Arc<RenderShared>,
}

impl RenderHandle {
    pub fn control(&self) -> &ThreadControl {
        self.executor.control()
    }

    /// Queue `f` on the render owner; it runs before the next frame
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.executor.execute(f);
    }

    pub fn submit<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.executor.submit(f)
    }

    pub fn await_vsync(&self) -> bool {
        self.vsync.await_vsync()
    }

    /// Capabilities of the created context, once init succeeded
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.shared.capabilities.lock().clone()
    }
}
