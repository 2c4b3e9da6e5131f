//! Double-buffered streaming playback
//!
//! A [`Music`] keeps a small ring of device buffers queued on a single voice.
//! Each audio owner tick, [`Music::update`] unqueues the buffers the device has
//! finished, refills them from the decoder and queues them again. The sample
//! cursor is rebuilt every tick from the frames of every unqueued buffer plus
//! the device offset into the buffers still queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use cd_core::error::AudioError;
use cd_core::resource::ResourceHandle;
use cd_thread::Pending;
use parking_lot::Mutex;

use crate::backend::{AudioContext, BufferId, OffsetQuery, PlaybackState, SampleFormat, VoiceId};
use crate::decoder::Decoder;
use crate::thread::AudioHandle;
use crate::voice::{Playback, VoiceSet};

/// Offset queries from most to least precise
const OFFSET_QUERIES: [OffsetQuery; 3] = [
    OffsetQuery::DeviceClock,
    OffsetQuery::Latency,
    OffsetQuery::Plain,
];

struct StreamState {
    decoder: Option<ResourceHandle<Box<dyn Decoder>>>,
    buffers: Vec<BufferId>,
    /// Frames held by each queued buffer, oldest first
    queued: VecDeque<usize>,
    pcm: Vec<i16>,
    /// Frames of every buffer unqueued since the last restart
    buffer_offset: i64,
    audio_offset: i64,
    last_offset: i64,
    closed: bool,
}

/// A streaming voice fed incrementally from a [`Decoder`]
pub struct Music {
    this: Weak<Music>,
    voices: VoiceSet,
    stream: Mutex<StreamState>,
    looping: AtomicBool,
    /// Cleared by stop; an inactive stream drops out of the update list
    active: AtomicBool,
    cursor: AtomicI64,
    format: SampleFormat,
    channels: u16,
    sample_rate: u32,
    total_samples: usize,
}

impl Music {
    /// Create the stream and fill its buffers. Runs on the audio owner.
    pub(crate) fn create(
        audio: &AudioHandle,
        mut decoder: ResourceHandle<Box<dyn Decoder>>,
    ) -> Result<Arc<Self>, AudioError> {
        let Some(context) = audio.context() else {
            decoder.close();
            return Err(AudioError::NotReady);
        };

        let (channels, sample_rate, total_samples) =
            decoder.with(|d| (d.channels(), d.sample_rate(), d.total_samples()));
        let Some(format) = SampleFormat::from_channels(channels) else {
            decoder.close();
            return Err(AudioError::Backend(format!("{channels} channel streams are not supported")));
        };

        let config = audio.config();
        let channel_count = channels as usize;
        // Buffers always hold whole frames
        let buffer_size = (config.stream_buffer_size / channel_count).max(1) * channel_count;
        let buffers = context.gen_buffers(config.stream_num_buffers);
        let voices = VoiceSet::new(audio, context, 1);

        let music = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            voices,
            stream: Mutex::new(StreamState {
                decoder: Some(decoder),
                buffers,
                queued: VecDeque::new(),
                pcm: vec![0; buffer_size],
                buffer_offset: 0,
                audio_offset: 0,
                last_offset: 0,
                closed: false,
            }),
            looping: AtomicBool::new(false),
            active: AtomicBool::new(false),
            cursor: AtomicI64::new(0),
            format,
            channels,
            sample_rate,
            total_samples,
        });
        music.prime();
        Ok(music)
    }

    /// Fill and queue buffers until the decoder runs dry
    fn prime(&self) {
        let mut st = self.stream.lock();
        let voice = self.voice();
        let buffers = st.buffers.clone();
        for buffer in buffers {
            let frames = self.stream_into(&mut st, buffer);
            if frames == 0 {
                break;
            }
            self.context().queue_buffers(voice, &[buffer]);
            st.queued.push_back(frames);
        }
        cd_core::audio_debug!(
            "Stream primed with {} of {} buffers",
            st.queued.len(),
            st.buffers.len()
        );
    }

    fn context(&self) -> &Arc<dyn AudioContext> {
        self.voices.context()
    }

    /// The single streaming voice
    pub fn voice(&self) -> VoiceId {
        self.voices.voices()[0]
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Source length in frames
    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::SeqCst);
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    /// Reconciled play position in frames, as of the last update
    pub fn sample_cursor(&self) -> i64 {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Decode up to one buffer of samples and upload them. Returns frames.
    fn stream_into(&self, st: &mut StreamState, buffer: BufferId) -> usize {
        let channels = self.channels as usize;
        let StreamState { decoder, pcm, .. } = st;
        let Some(decoder) = decoder.as_mut() else {
            return 0;
        };

        let mut filled = 0;
        while filled < pcm.len() {
            let frames = decoder.with(|d| d.decode_into(&mut pcm[filled..]));
            if frames == 0 {
                break;
            }
            filled += frames * channels;
        }

        if filled > 0 {
            self.context()
                .buffer_data(buffer, self.format, &pcm[..filled], self.sample_rate);
        }
        filled / channels
    }

    /// Refill finished buffers. Returns `false` once the stream is done and
    /// should leave the update list; buffers already queued keep playing.
    ///
    /// Must run on the audio owner thread.
    pub fn update(&self) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        let mut st = self.stream.lock();
        // A stop may have landed while waiting for the lock
        if st.closed || !self.active.load(Ordering::SeqCst) {
            return false;
        }

        let voice = self.voice();
        let context = self.context().clone();
        let in_flight = st.queued.len();
        let processed = context.buffers_processed(voice);
        let mut finished = false;

        for _ in 0..processed {
            let Some(buffer) = context.unqueue_buffer(voice) else {
                break;
            };
            st.buffer_offset += st.queued.pop_front().unwrap_or(0) as i64;

            let mut frames = self.stream_into(&mut st, buffer);
            if frames == 0 && self.is_looping() {
                self.seek_locked(&mut st, 0);
                st.buffer_offset = 0;
                st.audio_offset = 0;
                st.last_offset = 0;
                frames = self.stream_into(&mut st, buffer);
            }
            if frames == 0 {
                finished = true;
                break;
            }

            context.queue_buffers(voice, &[buffer]);
            st.queued.push_back(frames);
        }

        // Every buffer ran dry before this tick: the voice stopped on its own
        if in_flight > 0 && processed >= in_flight && !st.queued.is_empty() {
            cd_core::audio_debug!("Underrun on voice {}, restarting", voice);
            context.play(voice);
        }

        if finished {
            cd_core::audio_debug!("Stream on voice {} finished", voice);
            self.active.store(false, Ordering::SeqCst);
            return false;
        }

        self.update_cursor(&mut st);
        true
    }

    fn device_offset(&self) -> i64 {
        let voice = self.voice();
        OFFSET_QUERIES
            .iter()
            .find_map(|&query| self.context().sample_offset(voice, query))
            .unwrap_or(0)
    }

    fn update_cursor(&self, st: &mut StreamState) {
        st.audio_offset = st.buffer_offset + self.device_offset();
        self.cursor
            .fetch_add(st.audio_offset - st.last_offset, Ordering::SeqCst);
        st.last_offset = st.audio_offset;
    }

    fn seek_locked(&self, st: &mut StreamState, frame: i64) -> i64 {
        let last = self.total_samples.saturating_sub(1) as i64;
        let frame = frame.clamp(0, last);
        if let Some(decoder) = st.decoder.as_mut() {
            decoder.with(|d| d.seek(frame as usize));
        }
        self.cursor.store(frame, Ordering::SeqCst);
        frame
    }

    /// Move the decoder and cursor to `frame`, clamped to the source. Already
    /// queued buffers still play out. Returns the clamped frame.
    pub fn seek(&self, frame: i64) -> i64 {
        let mut st = self.stream.lock();
        self.seek_locked(&mut st, frame)
    }

    pub fn seek_forward(&self, seconds: f32) -> i64 {
        let delta = (seconds as f64 * self.sample_rate as f64) as i64;
        let mut st = self.stream.lock();
        let target = self.cursor.load(Ordering::SeqCst) + delta;
        self.seek_locked(&mut st, target)
    }

    pub fn seek_backward(&self, seconds: f32) -> i64 {
        self.seek_forward(-seconds)
    }

    pub fn rewind(&self) -> i64 {
        self.seek(0)
    }

    /// Release the decoder, drop out of the update list and delete the
    /// device objects on the audio owner
    pub fn close(&self) -> Pending<()> {
        let buffers = {
            let mut st = self.stream.lock();
            if st.closed {
                return Pending::ready(());
            }
            st.closed = true;
            if let Some(decoder) = st.decoder.take() {
                decoder.close();
            }
            std::mem::take(&mut st.buffers)
        };
        self.active.store(false, Ordering::SeqCst);

        let Some(this) = self.shared() else {
            return Pending::ready(());
        };
        let audio = self.voices.audio().clone();
        audio.unregister_stream(&this);
        audio.submit(move || {
            this.voices.delete();
            this.context().delete_buffers(&buffers);
        })
    }

    pub fn is_closed(&self) -> bool {
        self.stream.lock().closed
    }
}

impl Playback for Music {
    fn voice_set(&self) -> &VoiceSet {
        &self.voices
    }

    fn shared(&self) -> Option<Arc<Self>> {
        self.this.upgrade()
    }

    fn play_in_context(&self) -> Option<VoiceId> {
        let voice = {
            let st = self.stream.lock();
            if st.closed {
                return None;
            }
            let voice = self.voices.play_first_idle();
            self.active.store(true, Ordering::SeqCst);
            voice
        };
        // The update list is locked around every update, so register unlocked
        if let Some(this) = self.shared() {
            self.voices.audio().register_stream(this);
        }
        voice
    }

    fn stop_in_context(&self, voice: VoiceId) {
        {
            let _st = self.stream.lock();
            self.voices.stop(voice);
            self.active.store(false, Ordering::SeqCst);
        }
        if let Some(this) = self.shared() {
            self.voices.audio().unregister_stream(&this);
        }
    }

    fn current_time_in_context(&self, voice: VoiceId) -> f64 {
        if matches!(
            self.voices.state(voice),
            PlaybackState::Stopped | PlaybackState::Initial
        ) {
            return 0.0;
        }
        let mut st = self.stream.lock();
        self.update_cursor(&mut st);
        self.cursor.load(Ordering::SeqCst) as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioBackend, ContextCaps, NullBackend, SoftContext};
    use crate::decoder::PcmDecoder;
    use crate::thread::AudioThread;
    use cd_core::config::AudioConfig;
    use std::thread;
    use std::time::Duration;

    fn config() -> AudioConfig {
        AudioConfig {
            stream_buffer_size: 100,
            stream_num_buffers: 2,
            update_interval_ms: 1,
            clip_voices: 2,
        }
    }

    #[test]
    fn test_buffer_size_rounds_to_frames() {
        let backend = NullBackend::new();
        let context = backend.context();
        let mut config = config();
        config.stream_buffer_size = 101;
        let mut thread = AudioThread::new(&config, Box::new(backend));
        thread.start().unwrap();
        thread.wait_for_ready();

        let decoder: Box<dyn Decoder> = Box::new(PcmDecoder::new(vec![0; 1000], 2, 1000));
        let music = thread
            .handle()
            .init_music(ResourceHandle::owned(decoder))
            .wait()
            .unwrap()
            .unwrap();

        assert_eq!(music.stream.lock().pcm.len(), 100);
        assert_eq!(music.stream.lock().queued, VecDeque::from([50, 50]));
        assert_eq!(context.inspect(|t| t.buffer_count()), 2);

        music.close().wait().unwrap();
        assert_eq!(context.inspect(|t| (t.buffer_count(), t.voice_count())), (0, 0));

        shutdown(thread);
    }

    fn shutdown(mut thread: AudioThread) {
        thread.interrupt();
        thread.allow_teardown();
        thread.join().unwrap();
    }

    /// Owner that creates one stream on its first tick and then sleeps, so
    /// the test drives every update. Work queued on it only runs at shutdown.
    fn manual(backend: Box<dyn AudioBackend>, frames: usize) -> (AudioThread, Arc<Music>) {
        let mut config = config();
        config.update_interval_ms = 60_000;
        let mut thread = AudioThread::new(&config, backend);
        let decoder: Box<dyn Decoder> = Box::new(PcmDecoder::ramp(frames, 1000));
        let music = thread.handle().init_music(ResourceHandle::owned(decoder));
        thread.start().unwrap();
        thread.wait_for_ready();
        let music = music.wait().unwrap().unwrap();
        (thread, music)
    }

    /// Software context whose offset queries disagree, so the query that won
    /// shows up in the cursor
    struct SkewedContext {
        inner: Arc<SoftContext>,
    }

    impl SkewedContext {
        fn skew(query: OffsetQuery) -> i64 {
            match query {
                OffsetQuery::DeviceClock => 3000,
                OffsetQuery::Latency => 2000,
                OffsetQuery::Plain => 1000,
            }
        }
    }

    impl AudioContext for SkewedContext {
        fn capabilities(&self) -> ContextCaps {
            self.inner.capabilities()
        }
        fn make_current(&self) -> bool {
            self.inner.make_current()
        }
        fn clear_current(&self) {
            self.inner.clear_current()
        }
        fn attach_thread(&self) -> bool {
            self.inner.attach_thread()
        }
        fn detach_thread(&self) {
            self.inner.detach_thread()
        }
        fn is_current(&self) -> bool {
            self.inner.is_current()
        }
        fn gen_buffers(&self, count: usize) -> Vec<BufferId> {
            self.inner.gen_buffers(count)
        }
        fn delete_buffers(&self, buffers: &[BufferId]) {
            self.inner.delete_buffers(buffers)
        }
        fn gen_voices(&self, count: usize) -> Vec<VoiceId> {
            self.inner.gen_voices(count)
        }
        fn delete_voices(&self, voices: &[VoiceId]) {
            self.inner.delete_voices(voices)
        }
        fn buffer_data(&self, buffer: BufferId, format: SampleFormat, pcm: &[i16], sample_rate: u32) {
            self.inner.buffer_data(buffer, format, pcm, sample_rate)
        }
        fn set_voice_buffer(&self, voice: VoiceId, buffer: Option<BufferId>) {
            self.inner.set_voice_buffer(voice, buffer)
        }
        fn queue_buffers(&self, voice: VoiceId, buffers: &[BufferId]) {
            self.inner.queue_buffers(voice, buffers)
        }
        fn unqueue_buffer(&self, voice: VoiceId) -> Option<BufferId> {
            self.inner.unqueue_buffer(voice)
        }
        fn buffers_processed(&self, voice: VoiceId) -> usize {
            self.inner.buffers_processed(voice)
        }
        fn state(&self, voice: VoiceId) -> PlaybackState {
            self.inner.state(voice)
        }
        fn play(&self, voice: VoiceId) {
            self.inner.play(voice)
        }
        fn pause(&self, voice: VoiceId) {
            self.inner.pause(voice)
        }
        fn stop(&self, voice: VoiceId) {
            self.inner.stop(voice)
        }
        fn sample_offset(&self, voice: VoiceId, query: OffsetQuery) -> Option<i64> {
            self.inner
                .sample_offset(voice, query)
                .map(|offset| offset + Self::skew(query))
        }
        fn seconds_offset(&self, voice: VoiceId) -> f64 {
            self.inner.seconds_offset(voice)
        }
    }

    struct SkewedBackend {
        context: Arc<SkewedContext>,
    }

    impl AudioBackend for SkewedBackend {
        fn name(&self) -> &str {
            "Skewed"
        }

        fn open(&mut self) -> anyhow::Result<Arc<dyn AudioContext>> {
            Ok(self.context.clone())
        }

        fn close(&mut self) {
            self.context.inner.close();
        }
    }

    fn cursor_with_caps(caps: ContextCaps) -> i64 {
        let inner = Arc::new(SoftContext::new(caps | ContextCaps::THREAD_LOCAL_CONTEXT));
        let backend = SkewedBackend {
            context: Arc::new(SkewedContext {
                inner: inner.clone(),
            }),
        };
        let (thread, music) = manual(Box::new(backend), 1000);
        music.play().wait().unwrap().unwrap();

        inner.advance(30);
        assert!(music.update());
        let cursor = music.sample_cursor();

        shutdown(thread);
        cursor
    }

    #[test]
    fn test_offset_prefers_device_clock_then_latency() {
        let all = ContextCaps::DEVICE_CLOCK | ContextCaps::SOURCE_LATENCY;
        assert_eq!(cursor_with_caps(all), 3030);
        assert_eq!(cursor_with_caps(ContextCaps::SOURCE_LATENCY), 2030);
        assert_eq!(cursor_with_caps(ContextCaps::empty()), 1030);
    }

    #[test]
    fn test_stop_is_not_undone_by_pending_update() {
        let backend = NullBackend::new();
        let context = backend.context();
        let (thread, music) = manual(Box::new(backend), 10_000);
        let voice = music.play().wait().unwrap().unwrap();

        // Starve the voice so the next update would restart it
        context.advance(250);
        assert_eq!(context.state(voice), PlaybackState::Stopped);

        // Hold the stream so the update passes its first check and then
        // blocks, and the stop lands behind it
        let guard = music.stream.lock();
        let updater = {
            let music = music.clone();
            thread::spawn(move || music.update())
        };
        thread::sleep(Duration::from_millis(50));
        let stopper = {
            let music = music.clone();
            thread::spawn(move || music.stop_in_context(voice))
        };
        thread::sleep(Duration::from_millis(50));
        drop(guard);
        updater.join().unwrap();
        stopper.join().unwrap();

        assert_eq!(context.state(voice), PlaybackState::Stopped);
        assert!(!music.update());

        shutdown(thread);
    }

    #[test]
    fn test_final_partial_buffer_plays_after_underrun() {
        let backend = NullBackend::new();
        let context = backend.context();
        let (thread, music) = manual(Box::new(backend), 250);
        let voice = music.play().wait().unwrap().unwrap();

        context.advance(250);
        assert_eq!(context.state(voice), PlaybackState::Stopped);

        // The source runs dry in this tick, but the 50 frames refilled first
        // still play
        assert!(!music.update());
        assert_eq!(context.state(voice), PlaybackState::Playing);
        assert_eq!(context.inspect(|t| t.buffers_processed(voice)), 0);

        context.advance(50);
        assert_eq!(context.state(voice), PlaybackState::Stopped);

        shutdown(thread);
    }
}
