//! cpal audio backend

use std::cell::RefCell;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use super::{AudioBackend, AudioContext, ContextCaps, SoftContext};

thread_local! {
    // cpal streams are not Send; the stream lives on the thread that opened it
    static STREAM: RefCell<Option<cpal::Stream>> = const { RefCell::new(None) };
}

/// Output through the default cpal device, mixing the software voice table
/// from the device callback.
pub struct CpalBackend {
    context: Option<Arc<SoftContext>>,
    sample_rate: Option<u32>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            context: None,
            sample_rate: None,
        }
    }

    /// Output sample rate once the device is open
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&mut self) -> Result<Arc<dyn AudioContext>> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No audio output device available"))?;
        let config = device
            .default_output_config()
            .context("Failed to get default output config")?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let stream_config: cpal::StreamConfig = config.clone().into();
        let context = Arc::new(SoftContext::new(ContextCaps::THREAD_LOCAL_CONTEXT));

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                let context = context.clone();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        context.render(data, channels, sample_rate);
                    },
                    |err| error!("Audio stream error: {}", err),
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let context = context.clone();
                let mut scratch: Vec<f32> = vec![0.0; 4096];
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        if scratch.len() < data.len() {
                            scratch.resize(data.len(), 0.0);
                        }
                        let mixed = &mut scratch[..data.len()];
                        context.render(mixed, channels, sample_rate);
                        for (out, &f) in data.iter_mut().zip(mixed.iter()) {
                            *out = (f * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        }
                    },
                    |err| error!("Audio stream error: {}", err),
                    None,
                )
            }
            cpal::SampleFormat::U16 => {
                let context = context.clone();
                let mut scratch: Vec<f32> = vec![0.0; 4096];
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        if scratch.len() < data.len() {
                            scratch.resize(data.len(), 0.0);
                        }
                        let mixed = &mut scratch[..data.len()];
                        context.render(mixed, channels, sample_rate);
                        for (out, &f) in data.iter_mut().zip(mixed.iter()) {
                            *out = (f * 32767.0 + 32768.0).clamp(0.0, 65535.0) as u16;
                        }
                    },
                    |err| error!("Audio stream error: {}", err),
                    None,
                )
            }
            other => bail!("Unsupported sample format: {:?}", other),
        }
        .context("Failed to build audio stream")?;

        stream.play().context("Failed to play audio stream")?;
        STREAM.with(|slot| *slot.borrow_mut() = Some(stream));

        info!(
            "cpal output on '{}' at {}Hz, {} channels",
            device.name().unwrap_or_else(|_| "unknown".into()),
            sample_rate,
            channels
        );

        self.sample_rate = Some(sample_rate);
        self.context = Some(context.clone());
        Ok(context)
    }

    fn close(&mut self) {
        if let Some(context) = self.context.take() {
            context.close();
        }
        STREAM.with(|slot| slot.borrow_mut().take());
        self.sample_rate = None;
    }
}
