//! Asset loader executor

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cd_audio::{Decoder, WavDecoder};
use cd_core::error::{AssetError, ThreadError};
use cd_core::resource::ResourceHandle;
use cd_thread::{Affinity, ExecutionPolicy, ExecutorHandle, Pending, Phase, QueueExecutor};

use crate::image::{decode_image, PixelBuffer};

/// Thread name of the asset loader
pub const LOADER_THREAD_NAME: &str = "AssetThread";

/// Loader thread draining every queued load each tick
pub struct AssetLoader {
    executor: QueueExecutor,
}

impl AssetLoader {
    pub fn new() -> Self {
        Self {
            executor: QueueExecutor::new(LOADER_THREAD_NAME, ExecutionPolicy::DrainAll, true, ()),
        }
    }

    /// Hold `affinity` (usually the audio context) while the loader runs
    pub fn with_affinity(mut self, affinity: Arc<dyn Affinity>) -> Self {
        self.executor = self.executor.with_affinity(affinity);
        self
    }

    pub fn start(&mut self) -> Result<(), ThreadError> {
        self.executor.start()
    }

    pub fn handle(&self) -> LoaderHandle {
        LoaderHandle {
            executor: self.executor.handle(),
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

impl Default for AssetLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable access to the loader from any thread
#[derive(Clone)]
pub struct LoaderHandle {
    executor: ExecutorHandle,
}

impl LoaderHandle {
    /// Run a blocking load on the loader thread
    pub fn load<T, F>(&self, f: F) -> Pending<Result<T, AssetError>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, AssetError> + Send + 'static,
    {
        self.executor.submit(f)
    }

    pub fn load_image(&self, path: impl Into<PathBuf>) -> Pending<Result<PixelBuffer, AssetError>> {
        let path = path.into();
        self.load(move || decode_image(&path))
    }

    /// Open a WAV file for streaming, as an owned handle ready to hand to the
    /// audio owner
    pub fn load_wav(
        &self,
        path: impl Into<PathBuf>,
    ) -> Pending<Result<ResourceHandle<Box<dyn Decoder>>, AssetError>> {
        let path = path.into();
        self.load(move || open_wav(&path))
    }

    /// Block until everything submitted so far has been processed
    pub fn wait_for_drain(&self) -> bool {
        self.executor.wait_for_drain()
    }

    /// Loads queued but not yet started
    pub fn pending_len(&self) -> usize {
        self.executor.pending_len()
    }
}

fn open_wav(path: &Path) -> Result<ResourceHandle<Box<dyn Decoder>>, AssetError> {
    let decoder = WavDecoder::open(path)?;
    cd_core::audio_debug!(
        "Opened '{}': {} channels at {} Hz, {} frames",
        path.display(),
        decoder.channels(),
        decoder.sample_rate(),
        decoder.total_samples()
    );
    let decoder: Box<dyn Decoder> = Box::new(decoder);
    Ok(ResourceHandle::owned(decoder))
}
