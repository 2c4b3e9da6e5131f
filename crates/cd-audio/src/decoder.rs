//! PCM sources feeding clips and streams

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use cd_core::error::AssetError;
use cd_core::resource::Release;

/// Incremental PCM decoder.
///
/// Positions and counts are in frames (one sample per channel). Only
/// [`decode_into`](Self::decode_into) is restricted to the audio owner thread.
pub trait Decoder: Release + Send {
    fn channels(&self) -> u16;

    fn sample_rate(&self) -> u32;

    /// Length of the whole source in frames
    fn total_samples(&self) -> usize;

    /// Decode interleaved samples into `out`, returning frames written.
    /// Zero means the source is exhausted.
    fn decode_into(&mut self, out: &mut [i16]) -> usize;

    /// Move the read position to `frame`
    fn seek(&mut self, frame: usize);
}

/// Decode everything from the current position to the end
pub fn decode_all(decoder: &mut dyn Decoder) -> Vec<i16> {
    let channels = decoder.channels().max(1) as usize;
    let mut pcm = vec![0i16; decoder.total_samples() * channels];
    let mut filled = 0;
    while filled < pcm.len() {
        let frames = decoder.decode_into(&mut pcm[filled..]);
        if frames == 0 {
            break;
        }
        filled += frames * channels;
    }
    pcm.truncate(filled);
    pcm
}

/// In-memory interleaved PCM
pub struct PcmDecoder {
    pcm: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    position: usize,
}

impl PcmDecoder {
    pub fn new(pcm: Vec<i16>, channels: u16, sample_rate: u32) -> Self {
        Self {
            pcm,
            channels: channels.max(1),
            sample_rate,
            position: 0,
        }
    }

    /// Mono ramp 0, 1, 2, .. useful to check which frames were played
    pub fn ramp(frames: usize, sample_rate: u32) -> Self {
        Self::new((0..frames).map(|i| i as i16).collect(), 1, sample_rate)
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl Release for PcmDecoder {
    fn release(&mut self) -> anyhow::Result<()> {
        self.pcm = Vec::new();
        self.position = 0;
        Ok(())
    }
}

impl Decoder for PcmDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_samples(&self) -> usize {
        self.pcm.len() / self.channels as usize
    }

    fn decode_into(&mut self, out: &mut [i16]) -> usize {
        let channels = self.channels as usize;
        let frames = (out.len() / channels).min(self.total_samples().saturating_sub(self.position));
        let start = self.position * channels;
        let end = start + frames * channels;
        out[..frames * channels].copy_from_slice(&self.pcm[start..end]);
        self.position += frames;
        frames
    }

    fn seek(&mut self, frame: usize) {
        self.position = frame.min(self.total_samples());
    }
}

/// Streaming WAV reader. Any integer or float WAV is converted to 16 bit.
pub struct WavDecoder {
    path: PathBuf,
    reader: Option<hound::WavReader<BufReader<File>>>,
    spec: hound::WavSpec,
    total: usize,
}

impl WavDecoder {
    pub fn open(path: &Path) -> Result<Self, AssetError> {
        let reader = hound::WavReader::open(path).map_err(|e| AssetError::Audio {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let spec = reader.spec();
        if !(1..=2).contains(&spec.channels) {
            return Err(AssetError::UnsupportedFormat(format!(
                "{} channels in '{}'",
                spec.channels,
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            total: reader.duration() as usize,
            reader: Some(reader),
            spec,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Release for WavDecoder {
    fn release(&mut self) -> anyhow::Result<()> {
        self.reader = None;
        Ok(())
    }
}

impl Decoder for WavDecoder {
    fn channels(&self) -> u16 {
        self.spec.channels
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn total_samples(&self) -> usize {
        self.total
    }

    fn decode_into(&mut self, out: &mut [i16]) -> usize {
        let Some(reader) = self.reader.as_mut() else {
            return 0;
        };
        let channels = self.spec.channels as usize;
        let wanted = out.len() / channels * channels;
        let bits = self.spec.bits_per_sample as u32;

        let mut written = 0;
        match self.spec.sample_format {
            hound::SampleFormat::Int => {
                for sample in reader.samples::<i32>().take(wanted) {
                    let Ok(sample) = sample else { break };
                    out[written] = if bits > 16 {
                        (sample >> (bits - 16)) as i16
                    } else {
                        (sample << (16 - bits)) as i16
                    };
                    written += 1;
                }
            }
            hound::SampleFormat::Float => {
                for sample in reader.samples::<f32>().take(wanted) {
                    let Ok(sample) = sample else { break };
                    out[written] = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    written += 1;
                }
            }
        }
        written / channels
    }

    fn seek(&mut self, frame: usize) {
        if let Some(reader) = self.reader.as_mut() {
            let frame = frame.min(self.total) as u32;
            if let Err(e) = reader.seek(frame) {
                tracing::warn!("Seek to frame {} in '{}' failed: {}", frame, self.path.display(), e);
            }
        }
    }
}
