//! Audio backends
//!
//! An [`AudioBackend`] owns the output device and is only touched by the audio
//! owner thread. The [`AudioContext`] it opens exposes the voice/buffer API; it
//! is shared, but callers only use it from a thread with context affinity.

use std::sync::Arc;

use anyhow::Result;
use bitflags::bitflags;

pub mod cpal_backend;
pub mod null;
pub mod voices;

pub use cpal_backend::CpalBackend;
pub use null::NullBackend;
pub use voices::{SoftContext, VoiceTable};

/// Device-side buffer name
pub type BufferId = u32;
/// Device-side voice (source) name
pub type VoiceId = u32;

bitflags! {
    /// Optional context features probed after opening the device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextCaps: u32 {
        /// Threads other than the owner may attach the context
        const THREAD_LOCAL_CONTEXT = 1 << 0;
        /// Offsets can be read against the device clock
        const DEVICE_CLOCK = 1 << 1;
        /// Offsets can be read with output latency accounted for
        const SOURCE_LATENCY = 1 << 2;
    }
}

/// Voice playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// PCM layout of buffer data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Mono16,
    Stereo16,
}

impl SampleFormat {
    pub fn from_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(Self::Mono16),
            2 => Some(Self::Stereo16),
            _ => None,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            Self::Mono16 => 1,
            Self::Stereo16 => 2,
        }
    }
}

/// Precision of a sample offset query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetQuery {
    DeviceClock,
    Latency,
    Plain,
}

/// Output device owner
pub trait AudioBackend: Send {
    /// Get backend name
    fn name(&self) -> &str;

    /// Open the device and create its context
    fn open(&mut self) -> Result<Arc<dyn AudioContext>>;

    /// Destroy the context, then close the device
    fn close(&mut self);
}

/// Voice and buffer API of an open device.
///
/// Invalid names are ignored, matching how audio libraries treat them.
pub trait AudioContext: Send + Sync {
    fn capabilities(&self) -> ContextCaps;

    /// Make this the process-wide current context
    fn make_current(&self) -> bool;

    /// Clear the process-wide current context
    fn clear_current(&self);

    /// Attach the context to the calling thread. Fails without
    /// [`ContextCaps::THREAD_LOCAL_CONTEXT`].
    fn attach_thread(&self) -> bool;

    fn detach_thread(&self);

    /// Whether the calling thread may issue calls on this context
    fn is_current(&self) -> bool;

    fn gen_buffers(&self, count: usize) -> Vec<BufferId>;
    fn delete_buffers(&self, buffers: &[BufferId]);
    fn gen_voices(&self, count: usize) -> Vec<VoiceId>;
    fn delete_voices(&self, voices: &[VoiceId]);

    /// Upload interleaved PCM into a buffer
    fn buffer_data(&self, buffer: BufferId, format: SampleFormat, pcm: &[i16], sample_rate: u32);

    /// Attach a single static buffer, replacing the voice's queue
    fn set_voice_buffer(&self, voice: VoiceId, buffer: Option<BufferId>);

    fn queue_buffers(&self, voice: VoiceId, buffers: &[BufferId]);

    /// Remove the oldest processed buffer from a voice queue
    fn unqueue_buffer(&self, voice: VoiceId) -> Option<BufferId>;

    fn buffers_processed(&self, voice: VoiceId) -> usize;

    fn state(&self, voice: VoiceId) -> PlaybackState;

    fn play(&self, voice: VoiceId);
    fn pause(&self, voice: VoiceId);
    fn stop(&self, voice: VoiceId);

    /// Frame offset into the voice's current queue, `None` if the query kind
    /// is not supported
    fn sample_offset(&self, voice: VoiceId, query: OffsetQuery) -> Option<i64>;

    /// Offset into the current queue in seconds
    fn seconds_offset(&self, voice: VoiceId) -> f64;
}
