//! Ordered startup and shutdown of the owner threads

use std::path::PathBuf;
use std::sync::Arc;

use cd_audio::{AudioBackend, AudioHandle, AudioThread, Music, Playback, Sound};
use cd_core::error::{CadenceError, ThreadError};
use cd_core::Config;
use cd_loader::{AssetLoader, LoaderHandle};
use cd_render::{GraphicsBackend, RenderCallback, RenderHandle, RenderThread};
use cd_thread::Affinity;
use tracing::{info, warn};

/// Runtime lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Created,
    Running,
    Stopped,
}

/// Owns the audio, loader and render threads
pub struct Runtime {
    config: Config,
    state: RuntimeState,
    audio: AudioThread,
    loader: AssetLoader,
    render: RenderThread,
    /// Whether the controlling thread holds the audio context
    attached: bool,
}

impl Runtime {
    pub fn new(
        config: Config,
        audio_backend: Box<dyn AudioBackend>,
        graphics_backend: Box<dyn GraphicsBackend>,
        render: RenderCallback,
    ) -> Self {
        let audio = AudioThread::new(&config.audio, audio_backend);
        let affinity: Arc<dyn Affinity> = Arc::new(audio.handle());
        let loader = AssetLoader::new().with_affinity(affinity.clone());
        let render =
            RenderThread::new(&config.graphics, graphics_backend, render).with_affinity(affinity);

        Self {
            config,
            state: RuntimeState::Created,
            audio,
            loader,
            render,
            attached: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn audio(&self) -> AudioHandle {
        self.audio.handle()
    }

    pub fn loader(&self) -> LoaderHandle {
        self.loader.handle()
    }

    pub fn render(&self) -> RenderHandle {
        self.render.handle()
    }

    /// Start audio first, then the loader and render owners once audio is
    /// ready, then give the calling thread audio affinity.
    ///
    /// A subsystem that fails to initialize is logged and left inert.
    pub fn start(&mut self) -> Result<(), CadenceError> {
        if self.state != RuntimeState::Created {
            return Err(ThreadError::AlreadyStarted("runtime".to_string()).into());
        }
        self.state = RuntimeState::Running;

        self.audio.start()?;
        self.audio.wait_for_ready();
        if !self.audio.init_succeeded() {
            warn!("Audio failed to initialize, continuing without sound");
        }

        self.loader.start()?;
        self.render.start()?;
        self.loader.wait_for_ready();
        self.render.wait_for_ready();
        if !self.render.init_succeeded() {
            warn!("Graphics failed to initialize, continuing without rendering");
        }

        self.attached = self.audio.handle().attach_context_to_calling_thread();
        info!(
            "Runtime started (audio: {}, render: {}, controller affinity: {})",
            self.audio.init_succeeded(),
            self.render.init_succeeded(),
            self.attached
        );
        Ok(())
    }

    /// Stop every owner. Render and loader are released and joined before the
    /// audio owner so no thread still holds the audio context when it closes.
    ///
    /// Always runs to completion; the first join failure is returned.
    pub fn shutdown(&mut self) -> Result<(), CadenceError> {
        if self.state != RuntimeState::Running {
            return Ok(());
        }
        self.state = RuntimeState::Stopped;
        info!("Runtime shutting down");

        self.render.interrupt();
        self.loader.interrupt();
        self.audio.interrupt();

        let mut first_error = None;

        self.render.allow_teardown();
        record(&mut first_error, "render", self.render.join());
        self.loader.allow_teardown();
        record(&mut first_error, "loader", self.loader.join());

        if self.attached {
            self.audio.handle().detach_context_from_calling_thread();
            self.attached = false;
        }

        self.audio.allow_teardown();
        record(&mut first_error, "audio", self.audio.join());

        match first_error {
            Some(err) => Err(err.into()),
            None => {
                info!("Runtime stopped");
                Ok(())
            }
        }
    }

    /// Open `path` on the loader, build a stream for it on the audio owner and
    /// start playing
    pub fn stream_file(
        &self,
        path: impl Into<PathBuf>,
        looping: bool,
    ) -> Result<Arc<Music>, CadenceError> {
        let decoder = self.loader.handle().load_wav(path).wait()??;
        let music = self.audio.handle().init_music(decoder).wait()??;
        music.set_looping(looping);
        if music.play().wait()?.is_none() {
            warn!("Stream voice was busy");
        }
        Ok(music)
    }

    /// Decode `path` completely into a clip
    pub fn load_sound(&self, path: impl Into<PathBuf>) -> Result<Arc<Sound>, CadenceError> {
        let decoder = self.loader.handle().load_wav(path).wait()??;
        Ok(self.audio.handle().init_sound(decoder).wait()??)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Runtime shutdown failed: {}", e);
        }
    }
}

fn record(first: &mut Option<ThreadError>, owner: &str, result: Result<(), ThreadError>) {
    match result {
        Ok(()) | Err(ThreadError::NotStarted(_)) => {}
        Err(e) => {
            warn!("Failed to join {} owner: {}", owner, e);
            first.get_or_insert(e);
        }
    }
}
