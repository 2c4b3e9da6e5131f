//! Software voice engine shared by the null and cpal backends

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::{
    AudioContext, BufferId, ContextCaps, OffsetQuery, PlaybackState, SampleFormat, VoiceId,
};
use crate::mixer::Mixer;

struct BufferData {
    pcm: Vec<i16>,
    channels: usize,
    sample_rate: u32,
}

impl BufferData {
    fn frames(&self) -> usize {
        self.pcm.len() / self.channels
    }
}

#[derive(Default)]
struct Voice {
    state: PlaybackState,
    queue: VecDeque<BufferId>,
    /// Index of the buffer being played; everything before it is processed
    current: usize,
    /// Frame position inside the current buffer
    position: f64,
}

impl Voice {
    fn rewind(&mut self) {
        self.current = 0;
        self.position = 0.0;
    }
}

/// Voices and buffers with queue semantics of a hardware mixer:
///
/// - playing a stopped or initial voice rewinds to the head of its queue
/// - a voice that runs out of queued data stops, with every buffer processed
/// - only processed buffers can be unqueued
/// - offsets of a stopped or initial voice read 0
#[derive(Default)]
pub struct VoiceTable {
    next_name: u32,
    buffers: HashMap<BufferId, BufferData>,
    voices: HashMap<VoiceId, Voice>,
    mixer: Mixer,
}

impl VoiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }

    pub fn gen_buffers(&mut self, count: usize) -> Vec<BufferId> {
        (0..count)
            .map(|_| {
                let id = self.next_name();
                self.buffers.insert(
                    id,
                    BufferData {
                        pcm: Vec::new(),
                        channels: 1,
                        sample_rate: 44_100,
                    },
                );
                id
            })
            .collect()
    }

    pub fn delete_buffers(&mut self, buffers: &[BufferId]) {
        for id in buffers {
            self.buffers.remove(id);
        }
    }

    pub fn gen_voices(&mut self, count: usize) -> Vec<VoiceId> {
        (0..count)
            .map(|_| {
                let id = self.next_name();
                self.voices.insert(id, Voice::default());
                id
            })
            .collect()
    }

    pub fn delete_voices(&mut self, voices: &[VoiceId]) {
        for id in voices {
            self.voices.remove(id);
        }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer_data(&mut self, buffer: BufferId, format: SampleFormat, pcm: &[i16], rate: u32) {
        if let Some(data) = self.buffers.get_mut(&buffer) {
            data.channels = format.channels();
            data.sample_rate = rate.max(1);
            data.pcm.clear();
            data.pcm.extend_from_slice(pcm);
        }
    }

    pub fn set_voice_buffer(&mut self, voice: VoiceId, buffer: Option<BufferId>) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.queue.clear();
            v.queue.extend(buffer);
            v.state = PlaybackState::Initial;
            v.rewind();
        }
    }

    pub fn queue_buffers(&mut self, voice: VoiceId, buffers: &[BufferId]) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.queue.extend(buffers.iter().copied());
        }
    }

    pub fn buffers_processed(&self, voice: VoiceId) -> usize {
        self.voices.get(&voice).map_or(0, |v| match v.state {
            PlaybackState::Initial => 0,
            PlaybackState::Stopped => v.queue.len(),
            _ => v.current.min(v.queue.len()),
        })
    }

    pub fn unqueue_buffer(&mut self, voice: VoiceId) -> Option<BufferId> {
        let processed = self.buffers_processed(voice);
        let v = self.voices.get_mut(&voice)?;
        if processed == 0 {
            return None;
        }
        let buffer = v.queue.pop_front()?;
        v.current = v.current.saturating_sub(1);
        if v.state == PlaybackState::Stopped {
            v.current = v.queue.len();
        }
        Some(buffer)
    }

    pub fn state(&self, voice: VoiceId) -> PlaybackState {
        self.voices.get(&voice).map_or(PlaybackState::Stopped, |v| v.state)
    }

    pub fn play(&mut self, voice: VoiceId) {
        let Some(v) = self.voices.get_mut(&voice) else {
            return;
        };
        if v.state != PlaybackState::Paused {
            v.rewind();
        }
        v.state = if v.queue.is_empty() {
            v.current = 0;
            PlaybackState::Stopped
        } else {
            PlaybackState::Playing
        };
    }

    pub fn pause(&mut self, voice: VoiceId) {
        if let Some(v) = self.voices.get_mut(&voice) {
            if v.state == PlaybackState::Playing {
                v.state = PlaybackState::Paused;
            }
        }
    }

    pub fn stop(&mut self, voice: VoiceId) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.state = PlaybackState::Stopped;
            v.current = v.queue.len();
            v.position = 0.0;
        }
    }

    /// Frames from the head of the voice queue to the play cursor
    pub fn sample_offset(&self, voice: VoiceId) -> i64 {
        let Some(v) = self.voices.get(&voice) else {
            return 0;
        };
        if matches!(v.state, PlaybackState::Initial | PlaybackState::Stopped) {
            return 0;
        }
        let committed: usize = v
            .queue
            .iter()
            .take(v.current)
            .filter_map(|id| self.buffers.get(id))
            .map(BufferData::frames)
            .sum();
        (committed + v.position as usize) as i64
    }

    pub fn seconds_offset(&self, voice: VoiceId) -> f64 {
        let Some(v) = self.voices.get(&voice) else {
            return 0.0;
        };
        if matches!(v.state, PlaybackState::Initial | PlaybackState::Stopped) {
            return 0.0;
        }
        let mut seconds = 0.0;
        for (index, id) in v.queue.iter().enumerate().take(v.current + 1) {
            let Some(data) = self.buffers.get(id) else {
                continue;
            };
            let frames = if index == v.current {
                v.position
            } else {
                data.frames() as f64
            };
            seconds += frames / data.sample_rate as f64;
        }
        seconds
    }

    /// Move every playing voice forward by `frames` of its own sample rate
    pub fn advance(&mut self, frames: usize) {
        for v in self.voices.values_mut() {
            if v.state != PlaybackState::Playing {
                continue;
            }
            let mut remaining = frames as f64;
            loop {
                let Some(length) = v
                    .queue
                    .get(v.current)
                    .map(|id| self.buffers.get(id).map_or(0, BufferData::frames))
                else {
                    v.state = PlaybackState::Stopped;
                    v.position = 0.0;
                    break;
                };
                let left = length as f64 - v.position;
                if remaining < left {
                    v.position += remaining;
                    break;
                }
                remaining -= left;
                v.current += 1;
                v.position = 0.0;
            }
        }
    }

    /// Mix every playing voice into interleaved output at `out_rate`,
    /// resampling by nearest neighbour
    pub fn render(&mut self, out: &mut [f32], channels: usize, out_rate: u32) {
        out.fill(0.0);
        if channels == 0 || out_rate == 0 {
            return;
        }

        for v in self.voices.values_mut() {
            if v.state != PlaybackState::Playing {
                continue;
            }
            for frame in out.chunks_exact_mut(channels) {
                let data = loop {
                    let Some(data) = v.queue.get(v.current).and_then(|id| self.buffers.get(id))
                    else {
                        break None;
                    };
                    if (v.position as usize) < data.frames() {
                        break Some(data);
                    }
                    v.position -= data.frames() as f64;
                    v.current += 1;
                };
                let Some(data) = data else {
                    v.state = PlaybackState::Stopped;
                    v.position = 0.0;
                    break;
                };

                let index = v.position as usize * data.channels;
                self.mixer
                    .accumulate(frame, &data.pcm[index..index + data.channels]);
                v.position += data.sample_rate as f64 / out_rate as f64;
            }
        }

        self.mixer.finish(out);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.mixer.set_volume(volume);
    }
}

/// [`AudioContext`] over a [`VoiceTable`]
pub struct SoftContext {
    caps: ContextCaps,
    table: Mutex<VoiceTable>,
    current: AtomicBool,
    attached: Mutex<HashSet<ThreadId>>,
    closed: AtomicBool,
}

impl SoftContext {
    pub fn new(caps: ContextCaps) -> Self {
        Self {
            caps,
            table: Mutex::new(VoiceTable::new()),
            current: AtomicBool::new(false),
            attached: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Advance the device clock by `frames`
    pub fn advance(&self, frames: usize) {
        self.table.lock().advance(frames);
    }

    /// Fill an output buffer. Outputs silence rather than block when the table
    /// is busy.
    pub fn render(&self, out: &mut [f32], channels: usize, out_rate: u32) {
        match self.table.try_lock() {
            Some(mut table) => table.render(out, channels, out_rate),
            None => out.fill(0.0),
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.table.lock().set_volume(volume);
    }

    /// Run `f` against the voice table
    pub fn inspect<R>(&self, f: impl FnOnce(&VoiceTable) -> R) -> R {
        f(&self.table.lock())
    }

    /// Number of threads holding a thread-local attachment
    pub fn attached_threads(&self) -> usize {
        self.attached.lock().len()
    }

    pub fn is_thread_attached(&self, thread: ThreadId) -> bool {
        self.attached.lock().contains(&thread)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.current.store(false, Ordering::SeqCst);
        self.attached.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AudioContext for SoftContext {
    fn capabilities(&self) -> ContextCaps {
        self.caps
    }

    fn make_current(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.current.store(true, Ordering::SeqCst);
        true
    }

    fn clear_current(&self) {
        self.current.store(false, Ordering::SeqCst);
    }

    fn attach_thread(&self) -> bool {
        if !self.caps.contains(ContextCaps::THREAD_LOCAL_CONTEXT) || self.is_closed() {
            return false;
        }
        self.attached.lock().insert(thread::current().id());
        true
    }

    fn detach_thread(&self) {
        self.attached.lock().remove(&thread::current().id());
    }

    fn is_current(&self) -> bool {
        !self.is_closed()
            && (self.current.load(Ordering::SeqCst)
                || self.is_thread_attached(thread::current().id()))
    }

    fn gen_buffers(&self, count: usize) -> Vec<BufferId> {
        self.table.lock().gen_buffers(count)
    }

    fn delete_buffers(&self, buffers: &[BufferId]) {
        self.table.lock().delete_buffers(buffers);
    }

    fn gen_voices(&self, count: usize) -> Vec<VoiceId> {
        self.table.lock().gen_voices(count)
    }

    fn delete_voices(&self, voices: &[VoiceId]) {
        self.table.lock().delete_voices(voices);
    }

    fn buffer_data(&self, buffer: BufferId, format: SampleFormat, pcm: &[i16], sample_rate: u32) {
        self.table.lock().buffer_data(buffer, format, pcm, sample_rate);
    }

    fn set_voice_buffer(&self, voice: VoiceId, buffer: Option<BufferId>) {
        self.table.lock().set_voice_buffer(voice, buffer);
    }

    fn queue_buffers(&self, voice: VoiceId, buffers: &[BufferId]) {
        self.table.lock().queue_buffers(voice, buffers);
    }

    fn unqueue_buffer(&self, voice: VoiceId) -> Option<BufferId> {
        self.table.lock().unqueue_buffer(voice)
    }

    fn buffers_processed(&self, voice: VoiceId) -> usize {
        self.table.lock().buffers_processed(voice)
    }

    fn state(&self, voice: VoiceId) -> PlaybackState {
        self.table.lock().state(voice)
    }

    fn play(&self, voice: VoiceId) {
        self.table.lock().play(voice);
    }

    fn pause(&self, voice: VoiceId) {
        self.table.lock().pause(voice);
    }

    fn stop(&self, voice: VoiceId) {
        self.table.lock().stop(voice);
    }

    fn sample_offset(&self, voice: VoiceId, query: OffsetQuery) -> Option<i64> {
        let supported = match query {
            OffsetQuery::DeviceClock => self.caps.contains(ContextCaps::DEVICE_CLOCK),
            OffsetQuery::Latency => self.caps.contains(ContextCaps::SOURCE_LATENCY),
            OffsetQuery::Plain => true,
        };
        supported.then(|| self.table.lock().sample_offset(voice))
    }

    fn seconds_offset(&self, voice: VoiceId) -> f64 {
        self.table.lock().seconds_offset(voice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_queue(frames: &[usize]) -> (VoiceTable, VoiceId, Vec<BufferId>) {
        let mut table = VoiceTable::new();
        let buffers = table.gen_buffers(frames.len());
        for (&id, &len) in buffers.iter().zip(frames) {
            table.buffer_data(id, SampleFormat::Mono16, &vec![1000; len], 1000);
        }
        let voice = table.gen_voices(1)[0];
        table.queue_buffers(voice, &buffers);
        (table, voice, buffers)
    }

    #[test]
    fn test_queue_processing() {
        let (mut table, voice, buffers) = table_with_queue(&[100, 100]);
        assert_eq!(table.state(voice), PlaybackState::Initial);
        assert_eq!(table.buffers_processed(voice), 0);

        table.play(voice);
        table.advance(150);
        assert_eq!(table.buffers_processed(voice), 1);
        assert_eq!(table.sample_offset(voice), 150);

        assert_eq!(table.unqueue_buffer(voice), Some(buffers[0]));
        assert_eq!(table.unqueue_buffer(voice), None);
        assert_eq!(table.sample_offset(voice), 50);
    }

    #[test]
    fn test_voice_stops_when_starved() {
        let (mut table, voice, _) = table_with_queue(&[100, 100]);
        table.play(voice);
        table.advance(500);

        assert_eq!(table.state(voice), PlaybackState::Stopped);
        assert_eq!(table.buffers_processed(voice), 2);
        assert_eq!(table.sample_offset(voice), 0);
        assert_eq!(table.seconds_offset(voice), 0.0);
    }

    #[test]
    fn test_play_rewinds_stopped_voice() {
        let (mut table, voice, _) = table_with_queue(&[100]);
        table.play(voice);
        table.advance(40);
        table.pause(voice);
        table.advance(40);
        assert_eq!(table.sample_offset(voice), 40);

        table.play(voice);
        assert_eq!(table.sample_offset(voice), 40);

        table.stop(voice);
        assert_eq!(table.buffers_processed(voice), 1);
        table.play(voice);
        assert_eq!(table.state(voice), PlaybackState::Playing);
        assert_eq!(table.buffers_processed(voice), 0);
    }

    #[test]
    fn test_render_mixes_playing_voices() {
        let (mut table, voice, _) = table_with_queue(&[4]);
        table.play(voice);

        let mut out = [0.0f32; 8];
        table.render(&mut out, 1, 1000);
        assert!(out[..4].iter().all(|&s| s > 0.0));
        assert!(out[4..].iter().all(|&s| s == 0.0));
        assert_eq!(table.state(voice), PlaybackState::Stopped);
    }

    #[test]
    fn test_thread_attachment_requires_capability() {
        let plain = SoftContext::new(ContextCaps::empty());
        assert!(!plain.attach_thread());
        assert!(!plain.is_current());
        assert!(plain.make_current());
        assert!(plain.is_current());

        let threaded = SoftContext::new(ContextCaps::THREAD_LOCAL_CONTEXT);
        assert!(threaded.attach_thread());
        assert!(threaded.is_current());
        assert_eq!(threaded.attached_threads(), 1);
        threaded.detach_thread();
        assert!(!threaded.is_current());

        assert_eq!(threaded.sample_offset(1, OffsetQuery::DeviceClock), None);
        assert_eq!(threaded.sample_offset(1, OffsetQuery::Plain), Some(0));
    }
}
