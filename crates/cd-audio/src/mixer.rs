//! Voice mixer

/// Sums voices into an interleaved f32 output buffer and applies a master
/// volume. Samples are expected in the range [-1.0, 1.0].
#[derive(Debug, Clone)]
pub struct Mixer {
    volume: f32,
}

impl Mixer {
    /// Create a new mixer with unity volume.
    pub fn new() -> Self {
        Self { volume: 1.0 }
    }

    /// Set master volume (clamped between 0.0 and 1.0).
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    /// Get the current volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Add one voice frame to the output frame at `out`.
    ///
    /// `frame` holds the voice's channels; mono voices are spread to every
    /// output channel and stereo voices are downmixed for mono output.
    pub fn accumulate(&self, out: &mut [f32], frame: &[i16]) {
        let to_f32 = |s: i16| s as f32 / 32768.0;
        match (frame.len(), out.len()) {
            (1, _) => {
                let s = to_f32(frame[0]);
                out.iter_mut().for_each(|o| *o += s);
            }
            (_, 1) => {
                let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
                out[0] += sum / frame.len() as f32;
            }
            _ => {
                for (o, &s) in out.iter_mut().zip(frame.iter().cycle()) {
                    *o += to_f32(s);
                }
            }
        }
    }

    /// Scale by the master volume and clamp to the valid range.
    pub fn finish(&self, output: &mut [f32]) {
        for sample in output {
            *sample = (*sample * self.volume).clamp(-1.0, 1.0);
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixes_and_scales() {
        let mut mixer = Mixer::new();
        mixer.set_volume(0.5);

        let mut out = [0.0f32; 2];
        mixer.accumulate(&mut out, &[16384, 16384]);
        mixer.accumulate(&mut out, &[-16384, 16384]);
        mixer.finish(&mut out);

        assert!(out[0].abs() < f32::EPSILON);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_clamps_and_spreads_mono() {
        let mixer = Mixer::new();
        let mut out = [0.0f32; 2];
        for _ in 0..4 {
            mixer.accumulate(&mut out, &[i16::MAX]);
        }
        mixer.finish(&mut out);
        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn test_volume_clamped() {
        let mut mixer = Mixer::new();
        mixer.set_volume(3.0);
        assert_eq!(mixer.volume(), 1.0);
        mixer.set_volume(-1.0);
        assert_eq!(mixer.volume(), 0.0);
    }
}
