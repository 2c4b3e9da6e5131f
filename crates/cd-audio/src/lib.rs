//! Audio owner thread, streaming music and one-shot clips

pub mod backend;
pub mod decoder;
pub mod mixer;
pub mod music;
pub mod sound;
pub mod thread;
pub mod voice;

pub use backend::{
    AudioBackend, AudioContext, ContextCaps, CpalBackend, NullBackend, PlaybackState,
};
pub use decoder::{Decoder, PcmDecoder, WavDecoder};
pub use mixer::Mixer;
pub use music::Music;
pub use sound::Sound;
pub use thread::{AudioHandle, AudioThread, Dispatch};
pub use voice::{Playback, VoiceSet};
