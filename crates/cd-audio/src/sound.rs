//! Fully decoded one-shot clips

use std::sync::{Arc, Weak};

use cd_core::error::AudioError;
use cd_core::resource::ResourceHandle;
use parking_lot::Mutex;

use crate::backend::{BufferId, SampleFormat};
use crate::decoder::{decode_all, Decoder};
use crate::thread::AudioHandle;
use crate::voice::{Playback, VoiceSet};

/// A clip decoded into one device buffer shared by several voices, so the
/// same sound can overlap itself.
pub struct Sound {
    this: Weak<Sound>,
    voices: VoiceSet,
    buffer: BufferId,
    decoder: Mutex<Option<ResourceHandle<Box<dyn Decoder>>>>,
    channels: u16,
    sample_rate: u32,
    frames: usize,
}

impl Sound {
    /// Decode and upload the clip. Runs on the audio owner.
    pub(crate) fn create(
        audio: &AudioHandle,
        mut decoder: ResourceHandle<Box<dyn Decoder>>,
    ) -> Result<Arc<Self>, AudioError> {
        let Some(context) = audio.context() else {
            decoder.close();
            return Err(AudioError::NotReady);
        };

        let (channels, sample_rate, pcm) =
            decoder.with(|d| (d.channels(), d.sample_rate(), decode_all(d.as_mut())));
        let Some(format) = SampleFormat::from_channels(channels) else {
            decoder.close();
            return Err(AudioError::Backend(format!("{channels} channel clips are not supported")));
        };
        if pcm.is_empty() {
            decoder.close();
            return Err(AudioError::EmptySource);
        }

        let buffer = context.gen_buffers(1)[0];
        context.buffer_data(buffer, format, &pcm, sample_rate);
        let voices = VoiceSet::new(audio, context.clone(), audio.config().clip_voices);
        for &voice in voices.voices() {
            context.set_voice_buffer(voice, Some(buffer));
        }
        let frames = pcm.len() / channels as usize;
        cd_core::audio_debug!(
            "Sound of {} frames on {} voices",
            frames,
            voices.voices().len()
        );

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            voices,
            buffer,
            decoder: Mutex::new(Some(decoder)),
            channels,
            sample_rate,
            frames,
        }))
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clip length in frames
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Release the source and delete device objects on the audio owner
    pub fn close(&self) -> cd_thread::Pending<()> {
        if let Some(decoder) = self.decoder.lock().take() {
            decoder.close();
        }
        let Some(this) = self.shared() else {
            return cd_thread::Pending::ready(());
        };
        self.voices.audio().submit(move || {
            this.voices.delete();
            this.voices.context().delete_buffers(&[this.buffer]);
        })
    }
}

impl Playback for Sound {
    fn voice_set(&self) -> &VoiceSet {
        &self.voices
    }

    fn shared(&self) -> Option<Arc<Self>> {
        self.this.upgrade()
    }
}
