//! Per-worker-thread scratch buffers and the process-wide checkout pool.

use crate::types::{ChanCount, MidiEvent};
use parking_lot::Mutex;

/// A bundle of audio channel buffers plus MIDI event buffers.
#[derive(Debug, Default)]
pub struct BufferSet {
    audio: Vec<Vec<f32>>,
    midi: Vec<Vec<MidiEvent>>,
    frames: usize,
}

impl BufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow to hold at least `count` channels of `frames` samples each.
    /// Never shrinks.
    pub fn ensure(&mut self, count: ChanCount, frames: usize) {
        self.frames = self.frames.max(frames);
        while self.audio.len() < count.audio {
            self.audio.push(vec![0.0; self.frames]);
        }
        for chan in &mut self.audio {
            if chan.len() < self.frames {
                chan.resize(self.frames, 0.0);
            }
        }
        while self.midi.len() < count.midi {
            self.midi.push(Vec::with_capacity(256));
        }
    }

    pub fn count(&self) -> ChanCount {
        ChanCount::new(self.audio.len(), self.midi.len())
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn audio(&self, channel: usize) -> &[f32] {
        &self.audio[channel]
    }

    pub fn audio_mut(&mut self, channel: usize) -> &mut [f32] {
        &mut self.audio[channel]
    }

    pub fn midi(&self, stream: usize) -> &[MidiEvent] {
        &self.midi[stream]
    }

    pub fn midi_mut(&mut self, stream: usize) -> &mut Vec<MidiEvent> {
        &mut self.midi[stream]
    }

    /// Zero all audio channels and clear all MIDI buffers.
    pub fn silence(&mut self) {
        for chan in &mut self.audio {
            chan.fill(0.0);
        }
        for stream in &mut self.midi {
            stream.clear();
        }
    }
}

/// One worker thread's complement of scratch buffers, leased for the
/// duration of a process cycle.
pub struct ThreadBuffers {
    pub silent: BufferSet,
    pub scratch: BufferSet,
    pub noinplace: BufferSet,
    pub route: BufferSet,
    pub mix: BufferSet,
    pub gain_automation: Vec<f32>,
    pub trim_automation: Vec<f32>,
    pub send_gain_automation: Vec<f32>,
    pub scratch_automation: Vec<f32>,
    pub pan_automation: Vec<Vec<f32>>,
}

impl ThreadBuffers {
    pub fn new() -> Self {
        Self {
            silent: BufferSet::new(),
            scratch: BufferSet::new(),
            noinplace: BufferSet::new(),
            route: BufferSet::new(),
            mix: BufferSet::new(),
            gain_automation: Vec::new(),
            trim_automation: Vec::new(),
            send_gain_automation: Vec::new(),
            scratch_automation: Vec::new(),
            pan_automation: Vec::new(),
        }
    }

    pub fn ensure_buffers(&mut self, count: ChanCount, frames: usize) {
        self.silent.ensure(count, frames);
        self.scratch.ensure(count, frames);
        self.noinplace.ensure(count, frames);
        self.route.ensure(count, frames);
        self.mix.ensure(count, frames);

        for buf in [
            &mut self.gain_automation,
            &mut self.trim_automation,
            &mut self.send_gain_automation,
            &mut self.scratch_automation,
        ] {
            if buf.len() < frames {
                buf.resize(frames, 0.0);
            }
        }

        self.allocate_pan_automation(frames, count.audio);
        self.silent.silence();
    }

    fn allocate_pan_automation(&mut self, frames: usize, howmany: usize) {
        while self.pan_automation.len() < howmany {
            self.pan_automation.push(vec![0.0; frames]);
        }
        for buf in &mut self.pan_automation {
            if buf.len() < frames {
                buf.resize(frames, 0.0);
            }
        }
    }
}

impl Default for ThreadBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide pool of [`ThreadBuffers`].
///
/// Sized at init for the worker thread count plus slack. Checkout happens
/// at worker thread registration, not per cycle, so the mutex is off the
/// audio path.
pub struct BufferManager {
    available: Mutex<Vec<ThreadBuffers>>,
    required_count: Mutex<(ChanCount, usize)>,
}

/// Extra buffer sets beyond the worker count, covering butler and
/// control threads that occasionally need scratch space.
const SLACK: usize = 4;

impl BufferManager {
    pub fn new(worker_threads: usize) -> Self {
        let total = worker_threads + SLACK;
        let mut list = Vec::with_capacity(total);
        for _ in 0..total {
            list.push(ThreadBuffers::new());
        }
        Self {
            available: Mutex::new(list),
            required_count: Mutex::new((ChanCount::ZERO, 0)),
        }
    }

    /// Record the channel/frame requirement and grow every pooled buffer
    /// set to match. Checked-out sets are grown on return.
    pub fn ensure_buffers(&self, count: ChanCount, frames: usize) {
        let mut required = self.required_count.lock();
        required.0 = required.0.max(count);
        required.1 = required.1.max(frames);
        let (count, frames) = *required;
        drop(required);

        let mut list = self.available.lock();
        for tb in list.iter_mut() {
            tb.ensure_buffers(count, frames);
        }
    }

    pub fn get_thread_buffers(&self) -> Option<ThreadBuffers> {
        let mut tb = self.available.lock().pop()?;
        let (count, frames) = *self.required_count.lock();
        if frames > 0 {
            tb.ensure_buffers(count, frames);
        }
        Some(tb)
    }

    pub fn put_thread_buffers(&self, mut tb: ThreadBuffers) {
        let (count, frames) = *self.required_count.lock();
        if frames > 0 {
            tb.ensure_buffers(count, frames);
        }
        self.available.lock().push(tb);
    }

    pub fn available_count(&self) -> usize {
        self.available.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_set_ensure_grows_never_shrinks() {
        let mut bs = BufferSet::new();
        bs.ensure(ChanCount::new(2, 1), 512);
        assert_eq!(bs.count(), ChanCount::new(2, 1));
        assert_eq!(bs.audio(0).len(), 512);

        bs.ensure(ChanCount::new(1, 0), 256);
        assert_eq!(bs.count(), ChanCount::new(2, 1));
        assert_eq!(bs.audio(1).len(), 512);
    }

    #[test]
    fn test_buffer_set_silence() {
        let mut bs = BufferSet::new();
        bs.ensure(ChanCount::new(1, 1), 16);
        bs.audio_mut(0).fill(0.7);
        bs.midi_mut(0).push(MidiEvent::new(0, &[0x90, 60, 100]));

        bs.silence();
        assert!(bs.audio(0).iter().all(|&s| s == 0.0));
        assert!(bs.midi(0).is_empty());
    }

    #[test]
    fn test_manager_checkout_cycle() {
        let mgr = BufferManager::new(2);
        assert_eq!(mgr.available_count(), 2 + SLACK);

        let tb = mgr.get_thread_buffers().unwrap();
        assert_eq!(mgr.available_count(), 1 + SLACK);

        mgr.put_thread_buffers(tb);
        assert_eq!(mgr.available_count(), 2 + SLACK);
    }

    #[test]
    fn test_manager_exhaustion() {
        let mgr = BufferManager::new(0);
        let mut held = Vec::new();
        for _ in 0..SLACK {
            held.push(mgr.get_thread_buffers().unwrap());
        }
        assert!(mgr.get_thread_buffers().is_none());
    }

    #[test]
    fn test_manager_applies_requirement_on_checkout() {
        let mgr = BufferManager::new(1);
        mgr.ensure_buffers(ChanCount::new(2, 0), 1024);

        let tb = mgr.get_thread_buffers().unwrap();
        assert_eq!(tb.scratch.count().audio, 2);
        assert_eq!(tb.scratch.audio(0).len(), 1024);
        assert_eq!(tb.gain_automation.len(), 1024);
    }
}
