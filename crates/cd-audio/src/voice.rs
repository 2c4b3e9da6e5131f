//! Voice operations shared by clips and streams

use std::sync::Arc;
use std::time::Instant;

use cd_thread::Pending;
use parking_lot::Mutex;

use crate::backend::{AudioContext, PlaybackState, VoiceId};
use crate::thread::AudioHandle;

/// Last device time and the wall-clock time it was observed at
#[derive(Debug, Default, Clone, Copy)]
struct TimeAnchor {
    device: f64,
    wall: f64,
}

impl TimeAnchor {
    fn reconcile(&mut self, device: f64, wall: f64, state: PlaybackState) -> f64 {
        if device - self.device < DEVICE_TIME_RESOLUTION && state != PlaybackState::Paused {
            device + (wall - self.wall)
        } else {
            *self = TimeAnchor { device, wall };
            device
        }
    }
}

/// Device position must advance at least this much before it is trusted
/// over wall-clock extrapolation
const DEVICE_TIME_RESOLUTION: f64 = 1e-3;

/// A set of device voices belonging to one clip or stream
pub struct VoiceSet {
    audio: AudioHandle,
    context: Arc<dyn AudioContext>,
    voices: Vec<VoiceId>,
    anchor: Mutex<TimeAnchor>,
    select: Mutex<()>,
    epoch: Instant,
}

impl VoiceSet {
    /// Generate `count` voices. Must run with context affinity.
    pub(crate) fn new(audio: &AudioHandle, context: Arc<dyn AudioContext>, count: usize) -> Self {
        let voices = context.gen_voices(count);
        Self {
            audio: audio.clone(),
            context,
            voices,
            anchor: Mutex::new(TimeAnchor::default()),
            select: Mutex::new(()),
            epoch: Instant::now(),
        }
    }

    pub fn audio(&self) -> &AudioHandle {
        &self.audio
    }

    pub fn context(&self) -> &Arc<dyn AudioContext> {
        &self.context
    }

    pub fn voices(&self) -> &[VoiceId] {
        &self.voices
    }

    /// Start the first voice that is neither playing nor paused
    pub fn play_first_idle(&self) -> Option<VoiceId> {
        let _select = self.select.lock();
        let voice = self.voices.iter().copied().find(|&voice| {
            !matches!(
                self.context.state(voice),
                PlaybackState::Playing | PlaybackState::Paused
            )
        })?;
        self.context.play(voice);
        Some(voice)
    }

    pub fn pause(&self, voice: VoiceId) {
        self.context.pause(voice);
    }

    pub fn stop(&self, voice: VoiceId) {
        self.context.stop(voice);
    }

    pub fn state(&self, voice: VoiceId) -> PlaybackState {
        self.context.state(voice)
    }

    /// Device play position in seconds, smoothed against wall-clock time so
    /// coarse device updates still give a steadily advancing value
    pub fn device_time(&self, voice: VoiceId) -> f64 {
        let state = self.state(voice);
        if matches!(state, PlaybackState::Stopped | PlaybackState::Initial) {
            return 0.0;
        }
        let device = self.context.seconds_offset(voice);
        let wall = self.epoch.elapsed().as_secs_f64();
        self.anchor.lock().reconcile(device, wall, state)
    }

    /// Delete the voices. Must run with context affinity.
    pub(crate) fn delete(&self) {
        for &voice in &self.voices {
            self.context.stop(voice);
        }
        self.context.delete_voices(&self.voices);
    }
}

/// Playback control shared by [`Sound`](crate::Sound) and [`Music`](crate::Music).
///
/// `*_in_context` methods must run on a thread with context affinity; the
/// other methods may be called from anywhere and go through
/// [`AudioHandle::submit_quick`].
pub trait Playback: Send + Sync + Sized + 'static {
    fn voice_set(&self) -> &VoiceSet;

    /// Strong reference to `self`, `None` once it is being dropped
    fn shared(&self) -> Option<Arc<Self>>;

    fn play_in_context(&self) -> Option<VoiceId> {
        self.voice_set().play_first_idle()
    }

    fn pause_in_context(&self, voice: VoiceId) {
        self.voice_set().pause(voice);
    }

    fn stop_in_context(&self, voice: VoiceId) {
        self.voice_set().stop(voice);
    }

    fn playback_state_in_context(&self, voice: VoiceId) -> PlaybackState {
        self.voice_set().state(voice)
    }

    fn current_time_in_context(&self, voice: VoiceId) -> f64 {
        self.voice_set().device_time(voice)
    }

    /// Start an idle voice, returning it or `None` when every voice is busy
    fn play(&self) -> Pending<Option<VoiceId>> {
        match self.shared() {
            Some(this) => self.voice_set().audio().submit_quick(move || this.play_in_context()),
            None => Pending::ready(None),
        }
    }

    fn pause(&self, voice: VoiceId) -> Pending<()> {
        match self.shared() {
            Some(this) => self
                .voice_set()
                .audio()
                .submit_quick(move || this.pause_in_context(voice)),
            None => Pending::ready(()),
        }
    }

    fn stop(&self, voice: VoiceId) -> Pending<()> {
        match self.shared() {
            Some(this) => self
                .voice_set()
                .audio()
                .submit_quick(move || this.stop_in_context(voice)),
            None => Pending::ready(()),
        }
    }

    fn playback_state(&self, voice: VoiceId) -> Pending<PlaybackState> {
        match self.shared() {
            Some(this) => self
                .voice_set()
                .audio()
                .submit_quick(move || this.playback_state_in_context(voice)),
            None => Pending::ready(PlaybackState::Stopped),
        }
    }

    fn current_time(&self, voice: VoiceId) -> Pending<f64> {
        match self.shared() {
            Some(this) => self
                .voice_set()
                .audio()
                .submit_quick(move || this.current_time_in_context(voice)),
            None => Pending::ready(0.0),
        }
    }
}
