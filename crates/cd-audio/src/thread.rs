//! Audio owner thread
//!
//! Owns the output device and its context, runs one queued work item per tick,
//! refills every registered [`Music`] stream and then sleeps for the configured
//! update interval.

use std::sync::Arc;
use std::time::Duration;

use cd_core::config::AudioConfig;
use cd_core::error::{AudioError, ThreadError};
use cd_core::resource::ResourceHandle;
use cd_thread::{
    Affinity, ExecutionPolicy, ExecutorHandle, Pending, Phase, QueueExecutor, ThreadContext,
    ThreadControl, TickStage,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::backend::{AudioBackend, AudioContext, ContextCaps};
use crate::decoder::Decoder;
use crate::music::Music;
use crate::sound::Sound;

/// Thread name of the audio owner
pub const AUDIO_THREAD_NAME: &str = "AudioThread";

/// How [`AudioHandle::execute_quick`] runs its work. Chosen once the device is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Run on the calling thread
    DirectInvoke,
    /// Queue on the audio owner
    QueuedInvoke,
}

struct AudioShared {
    config: AudioConfig,
    context: OnceCell<Arc<dyn AudioContext>>,
    dispatch: OnceCell<Dispatch>,
    /// Streams refilled every tick. Only touched on the owner thread.
    streams: Mutex<Vec<Arc<Music>>>,
}

/// [`TickStage`] of the audio owner
pub struct AudioStage {
    backend: Box<dyn AudioBackend>,
    shared: Arc<AudioShared>,
    interval: Duration,
}

impl TickStage for AudioStage {
    fn init(&mut self, _ctx: &ThreadContext) -> bool {
        let context = match self.backend.open() {
            Ok(context) => context,
            Err(e) => {
                let err = AudioError::InitializationFailure(format!("{:#}", e));
                error!("Failed to open {} audio device: {}", self.backend.name(), err);
                let _ = self.shared.dispatch.set(Dispatch::QueuedInvoke);
                return false;
            }
        };

        if !context.make_current() {
            error!("Failed to make the {} audio context current", self.backend.name());
            let _ = self.shared.dispatch.set(Dispatch::QueuedInvoke);
            self.backend.close();
            return false;
        }

        let caps = context.capabilities();
        let dispatch = if caps.contains(ContextCaps::THREAD_LOCAL_CONTEXT) {
            Dispatch::DirectInvoke
        } else {
            Dispatch::QueuedInvoke
        };
        let _ = self.shared.context.set(context);
        let _ = self.shared.dispatch.set(dispatch);

        info!(
            "Audio device '{}' ready, capabilities {:?}, {:?}",
            self.backend.name(),
            caps,
            dispatch
        );
        true
    }

    fn after_drain(&mut self, ctx: &ThreadContext) {
        self.shared.streams.lock().retain(|music| music.update());
        ctx.sleep(self.interval);
    }

    fn shutdown(&mut self, _ctx: &ThreadContext) -> anyhow::Result<()> {
        self.shared.streams.lock().clear();
        if let Some(context) = self.shared.context.get() {
            context.detach_thread();
            context.clear_current();
        }
        self.backend.close();
        cd_core::audio_debug!("Audio device closed");
        Ok(())
    }

    fn park_when_idle(&self) -> bool {
        false
    }
}

/// The audio owner thread
pub struct AudioThread {
    executor: QueueExecutor<AudioStage>,
    shared: Arc<AudioShared>,
}

impl AudioThread {
    pub fn new(config: &AudioConfig, backend: Box<dyn AudioBackend>) -> Self {
        let shared = Arc::new(AudioShared {
            config: config.clone(),
            context: OnceCell::new(),
            dispatch: OnceCell::new(),
            streams: Mutex::new(Vec::new()),
        });
        let stage = AudioStage {
            backend,
            shared: shared.clone(),
            interval: Duration::from_millis(config.update_interval_ms),
        };
        let executor =
            QueueExecutor::new(AUDIO_THREAD_NAME, ExecutionPolicy::OnePerIteration, false, stage);
        Self { executor, shared }
    }

    pub fn start(&mut self) -> Result<(), ThreadError> {
        self.executor.start()
    }

    pub fn handle(&self) -> AudioHandle {
        AudioHandle {
            executor: self.executor.handle(),
            shared: self.shared.clone(),
        }
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

/// Cloneable access to the audio owner from any thread
#[derive(Clone)]
pub struct AudioHandle {
    executor: ExecutorHandle,
    shared: Arc<AudioShared>,
}

impl AudioHandle {
    pub fn config(&self) -> &AudioConfig {
        &self.shared.config
    }

    pub fn control(&self) -> &ThreadControl {
        self.executor.control()
    }

    pub fn wait_for_ready(&self) {
        self.control().wait_for_ready();
    }

    pub fn init_succeeded(&self) -> bool {
        self.control().init_succeeded()
    }

    /// The open context, once init succeeded
    pub fn context(&self) -> Option<Arc<dyn AudioContext>> {
        self.shared.context.get().cloned()
    }

    /// Dispatch chosen for [`execute_quick`](Self::execute_quick)
    pub fn dispatch(&self) -> Dispatch {
        match self.shared.dispatch.get() {
            Some(&dispatch) if self.init_succeeded() => dispatch,
            _ => Dispatch::QueuedInvoke,
        }
    }

    /// Queue `f` on the audio owner
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

    /// Run `f` right away on this thread when any thread may use the context,
    /// otherwise queue it on the owner. Callers must not rely on either path.
    pub fn execute_quick<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.dispatch() {
            Dispatch::DirectInvoke => f(),
            Dispatch::QueuedInvoke => self.execute(f),
        }
    }

    /// [`execute_quick`](Self::execute_quick) returning the result of `f`
    pub fn submit_quick<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        match self.dispatch() {
            Dispatch::DirectInvoke => Pending::ready(f()),
            Dispatch::QueuedInvoke => self.submit(f),
        }
    }

    pub fn supports_thread_local_context(&self) -> bool {
        self.shared
            .context
            .get()
            .is_some_and(|ctx| ctx.capabilities().contains(ContextCaps::THREAD_LOCAL_CONTEXT))
    }

    /// Give the calling thread context affinity. Returns `false` when the
    /// context does not support it.
    pub fn attach_context_to_calling_thread(&self) -> bool {
        match self.shared.context.get() {
            Some(context) if self.supports_thread_local_context() => context.attach_thread(),
            _ => false,
        }
    }

    pub fn detach_context_from_calling_thread(&self) -> bool {
        match self.shared.context.get() {
            Some(context) if self.supports_thread_local_context() => {
                context.detach_thread();
                true
            }
            _ => false,
        }
    }

    /// Create a stream on the owner thread and prime its buffers
    pub fn init_music(
        &self,
        decoder: ResourceHandle<Box<dyn Decoder>>,
    ) -> Pending<Result<Arc<Music>, AudioError>> {
        let audio = self.clone();
        self.submit(move || Music::create(&audio, decoder))
    }

    /// Decode a whole clip on the owner thread
    pub fn init_sound(
        &self,
        decoder: ResourceHandle<Box<dyn Decoder>>,
    ) -> Pending<Result<Arc<Sound>, AudioError>> {
        let audio = self.clone();
        self.submit(move || Sound::create(&audio, decoder))
    }

    /// Add `music` to the per-tick update list
    pub fn register_stream(&self, music: Arc<Music>) {
        let shared = self.shared.clone();
        self.execute(move || {
            let mut streams = shared.streams.lock();
            if !streams.iter().any(|m| Arc::ptr_eq(m, &music)) {
                streams.push(music);
            }
        });
    }

    pub fn unregister_stream(&self, music: &Arc<Music>) {
        let shared = self.shared.clone();
        let music = Arc::downgrade(music);
        self.execute(move || {
            shared
                .streams
                .lock()
                .retain(|m| !std::ptr::eq(Arc::as_ptr(m), music.as_ptr()));
        });
    }

    /// Number of registered streams
    pub fn active_streams(&self) -> Pending<usize> {
        let shared = self.shared.clone();
        self.submit(move || shared.streams.lock().len())
    }
}

impl Affinity for AudioHandle {
    fn acquire(&self) -> bool {
        self.wait_for_ready();
        self.init_succeeded() && self.attach_context_to_calling_thread()
    }

    fn release(&self) {
        self.detach_context_from_calling_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;

    fn stop(mut thread: AudioThread) {
        thread.interrupt();
        thread.allow_teardown();
        thread.join().unwrap();
    }

    #[test]
    fn test_init_opens_device() {
        let backend = NullBackend::new();
        let context = backend.context();
        let mut thread = AudioThread::new(&AudioConfig::default(), Box::new(backend));
        thread.start().unwrap();
        thread.wait_for_ready();

        assert!(thread.init_succeeded());
        let handle = thread.handle();
        assert_eq!(handle.dispatch(), Dispatch::DirectInvoke);
        assert!(handle.context().is_some());

        stop(thread);
        assert!(context.is_closed());
    }

    #[test]
    fn test_failed_device_is_inert() {
        let mut thread = AudioThread::new(&AudioConfig::default(), Box::new(NullBackend::failing()));
        thread.start().unwrap();
        thread.wait_for_ready();

        assert!(!thread.init_succeeded());
        let handle = thread.handle();
        assert_eq!(handle.dispatch(), Dispatch::QueuedInvoke);
        assert!(!handle.attach_context_to_calling_thread());
        assert!(matches!(handle.submit(|| 1).wait(), Err(ThreadError::Canceled)));

        stop(thread);
    }

    #[test]
    fn test_context_affinity_requires_capability() {
        let backend = NullBackend::with_capabilities(ContextCaps::empty());
        let context = backend.context();
        let mut thread = AudioThread::new(&AudioConfig::default(), Box::new(backend));
        thread.start().unwrap();
        thread.wait_for_ready();

        let handle = thread.handle();
        assert!(!handle.supports_thread_local_context());
        assert!(!handle.attach_context_to_calling_thread());
        assert!(!handle.detach_context_from_calling_thread());
        assert_eq!(context.attached_threads(), 0);

        stop(thread);
    }
}
