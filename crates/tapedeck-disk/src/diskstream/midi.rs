//! MIDI diskstream: event-granular capture and playback.

use super::{
    AlignStyle, CaptureInfo, CaptureTransition, DiskConfig, DiskstreamFlags, ProcessContext,
    RecordStatusChange, RecordWindow,
};
use crate::error::Result;
use crate::source::MidiSource;
use crate::store::AudioStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tapedeck_core::{
    spsc_ring, DiskstreamId, MidiEvent, RingReader, RingWriter, SampleCnt, SamplePos, SampleRange,
};
use tracing::{debug, warn};

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

/// Remembers sounding notes so loops and stops can close them.
#[derive(Default)]
struct NoteTracker {
    active: Vec<(u8, u8)>,
}

impl NoteTracker {
    fn track(&mut self, ev: &MidiEvent) {
        let data = ev.data();
        if data.len() < 3 {
            return;
        }
        let status = data[0] & 0xf0;
        let channel = data[0] & 0x0f;
        let note = data[1];
        if status == NOTE_ON && data[2] > 0 {
            if !self.active.contains(&(channel, note)) {
                self.active.push((channel, note));
            }
        } else if status == NOTE_OFF || (status == NOTE_ON && data[2] == 0) {
            self.active.retain(|&(c, n)| !(c == channel && n == note));
        }
    }

    /// Emit note-offs for everything still sounding.
    fn flush(&mut self, at: i64, out: &mut Vec<MidiEvent>) {
        for &(channel, note) in &self.active {
            out.push(MidiEvent::new(at, &[NOTE_OFF | channel, note, 0]));
        }
        self.active.clear();
    }
}

pub struct MidiDiskstream {
    id: DiskstreamId,
    name: String,
    flags: DiskstreamFlags,
    store: Arc<AudioStore>,
    config: DiskConfig,

    playback_w: RingWriter<MidiEvent>,
    playback_r: RingReader<MidiEvent>,
    capture_w: RingWriter<MidiEvent>,
    capture_r: RingReader<MidiEvent>,
    transitions_w: RingWriter<CaptureTransition>,
    transitions_r: RingReader<CaptureTransition>,

    /// Event held back because it lies beyond the current cycle.
    pending_playback: Option<MidiEvent>,

    rec_enabled: Arc<AtomicBool>,
    record: RecordWindow,
    was_recording: bool,
    captured_events: SampleCnt,
    capture_info: Mutex<Vec<CaptureInfo>>,
    notes: NoteTracker,

    playback_source: Option<Arc<MidiSource>>,
    write_source: Option<Arc<MidiSource>>,

    capture_offset: SampleCnt,
    roll_delay: SampleCnt,

    playback_sample: SamplePos,
    file_sample: SamplePos,
    loop_range: Option<SampleRange>,
}

impl MidiDiskstream {
    pub fn new(
        id: DiskstreamId,
        name: &str,
        flags: DiskstreamFlags,
        store: Arc<AudioStore>,
        config: DiskConfig,
    ) -> Self {
        let (playback_w, playback_r) = spsc_ring(config.midi_buf_events);
        let (capture_w, capture_r) = spsc_ring(config.midi_buf_events);
        let (transitions_w, transitions_r) = spsc_ring(256);

        let mut ds = Self {
            id,
            name: name.to_owned(),
            flags,
            store,
            config,
            playback_w,
            playback_r,
            capture_w,
            capture_r,
            transitions_w,
            transitions_r,
            pending_playback: None,
            rec_enabled: Arc::new(AtomicBool::new(false)),
            record: RecordWindow::new(),
            was_recording: false,
            captured_events: 0,
            capture_info: Mutex::new(Vec::new()),
            notes: NoteTracker::default(),
            playback_source: None,
            write_source: None,
            capture_offset: 0,
            roll_delay: 0,
            playback_sample: 0,
            file_sample: 0,
            loop_range: None,
        };
        if ds.recordable() {
            ds.reset_write_source();
        }
        ds
    }

    pub fn id(&self) -> DiskstreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn recordable(&self) -> bool {
        self.flags.contains(DiskstreamFlags::RECORDABLE)
    }

    pub fn record_enabled(&self) -> bool {
        self.rec_enabled.load(Ordering::Acquire)
    }

    pub fn set_record_enabled(&self, yn: bool) {
        if self.recordable() {
            self.rec_enabled.store(yn, Ordering::Release);
        }
    }

    pub fn record_enable_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.rec_enabled)
    }

    pub fn set_capture_offset(&mut self, offset: SampleCnt) {
        self.capture_offset = offset;
    }

    pub fn set_roll_delay(&mut self, delay: SampleCnt) {
        self.roll_delay = delay;
    }

    pub fn use_playback_source(&mut self, source: Arc<MidiSource>) {
        self.playback_source = Some(source);
        self.pending_playback = None;
        self.playback_r.clear();
    }

    pub fn write_source(&self) -> Option<Arc<MidiSource>> {
        self.write_source.clone()
    }

    pub fn set_loop(&mut self, range: Option<SampleRange>) -> Result<()> {
        if let Some(r) = range {
            if r.start >= r.end {
                return Err(crate::error::Error::InvalidLoop {
                    start: r.start,
                    end: r.end,
                });
            }
        }
        self.loop_range = range;
        Ok(())
    }

    pub fn playback_sample(&self) -> SamplePos {
        self.playback_sample
    }

    // ----- audio thread -----

    /// One cycle. `input` events carry cycle-relative times; `output`
    /// receives playback events, also cycle-relative.
    pub fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &[MidiEvent],
        output: &mut Vec<MidiEvent>,
    ) -> usize {
        let change = self.record.check_record_status(
            ctx,
            self.record_enabled(),
            // MIDI has no meaningful output-latency alignment.
            AlignStyle::CaptureTime,
            self.capture_offset,
            self.roll_delay,
        );

        if let RecordStatusChange::Starting(capture_val) = change {
            if self.recordable() {
                if self
                    .transitions_w
                    .push(CaptureTransition::Start { capture_val })
                    .is_err()
                {
                    warn!(stream = %self.id, "capture transition ring full on rec start");
                    self.record.reset();
                }
            }
        }

        if ctx.nframes == 0 {
            return 0;
        }

        let mut captured = 0;
        let recording = self.record_enabled() && ctx.can_record;
        if recording && self.recordable() {
            for ev in input {
                let absolute = ctx.transport_sample + ev.time;
                if absolute >= self.record.first_recordable
                    && absolute < self.record.last_recordable
                {
                    self.was_recording = true;
                    let mut stamped = *ev;
                    stamped.time = absolute;
                    if self.capture_w.push(stamped).is_err() {
                        warn!(stream = %self.id, "MIDI capture ring overrun");
                        self.rec_enabled.store(false, Ordering::Release);
                        break;
                    }
                    captured += 1;
                }
            }
        } else if self.was_recording && self.record.window_closed(ctx.transport_sample) {
            self.close_capture_window();
        }

        self.collect_playback(ctx, output);
        self.captured_events += captured as SampleCnt;
        captured
    }

    fn collect_playback(&mut self, ctx: &ProcessContext, output: &mut Vec<MidiEvent>) {
        if ctx.speed == 0.0 {
            return;
        }
        let window_end = ctx.transport_sample + ctx.nframes as SamplePos;

        loop {
            let ev = match self.pending_playback.take() {
                Some(ev) => ev,
                None => match self.playback_r.pop() {
                    Some(ev) => ev,
                    None => break,
                },
            };

            if ev.time >= window_end {
                // Beyond this cycle; hold it back.
                self.pending_playback = Some(ev);
                break;
            }
            if ev.time < ctx.transport_sample {
                // Stale event from before a locate; drop it.
                continue;
            }

            let mut relative = ev;
            relative.time = ev.time - ctx.transport_sample;
            self.notes.track(&relative);
            output.push(relative);
        }
    }

    /// Advance position; returns true if the butler should run.
    pub fn commit(&mut self, ctx: &ProcessContext) -> bool {
        if ctx.speed != 0.0 {
            self.playback_sample = ctx.transport_sample + ctx.nframes as SamplePos;
        }
        let playback_low =
            self.playback_r.read_space() < self.config.midi_buf_events / 4 && self.playback_source.is_some();
        let capture_high = self.capture_r.read_space() >= self.config.midi_buf_events / 4;
        playback_low || capture_high
    }

    /// Close sounding notes at a loop wrap or stop.
    pub fn flush_notes(&mut self, at_cycle_offset: i64, output: &mut Vec<MidiEvent>) {
        self.notes.flush(at_cycle_offset, output);
    }

    pub fn loop_wrap(&mut self, range: SampleRange) {
        if self.playback_sample >= range.end {
            self.playback_sample = range.start + (self.playback_sample - range.end);
        }
    }

    fn close_capture_window(&mut self) {
        if self.recordable() {
            let _ = self.transitions_w.push(CaptureTransition::End);
        }
        let info = CaptureInfo {
            start: self.record.capture_start_sample,
            frames: self.captured_events,
        };
        if info.frames > 0 {
            self.capture_info.lock().push(info);
        }
        debug!(stream = %self.id, start = info.start, events = info.frames, "MIDI capture window closed");
        self.captured_events = 0;
        self.was_recording = false;
        self.record.reset();
    }

    // ----- butler thread -----

    /// Pull upcoming events from the playback source into the ring.
    pub fn do_refill(&mut self) -> Result<bool> {
        let Some(source) = self.playback_source.clone() else {
            return Ok(false);
        };
        if self.playback_w.write_space() < self.config.midi_buf_events / 2 {
            return Ok(false);
        }

        let span = self.config.chunk_frames as SamplePos;
        let mut read_end = self.file_sample + span;
        let mut wrap_to = None;

        if let Some(range) = self.loop_range {
            if self.file_sample >= range.end {
                self.file_sample = range.start;
                read_end = self.file_sample + span;
            }
            if read_end >= range.end {
                read_end = range.end;
                wrap_to = Some(range.start);
            }
        }

        for ev in source.read(self.file_sample, read_end) {
            if self.playback_w.push(ev).is_err() {
                break;
            }
        }

        self.file_sample = match wrap_to {
            Some(start) => start,
            None => read_end,
        };

        Ok(wrap_to.is_some())
    }

    /// Drain captured events to the write source.
    pub fn do_flush(&mut self, force: bool) -> Result<bool> {
        while let Some(transition) = self.transitions_r.pop() {
            if let CaptureTransition::Start { capture_val } = transition {
                if let Some(src) = &self.write_source {
                    src.set_natural_position(capture_val);
                }
            }
        }

        let threshold = if force { 1 } else { self.config.midi_buf_events / 4 };
        if self.capture_r.read_space() < threshold {
            return Ok(false);
        }

        let mut batch = Vec::with_capacity(self.capture_r.read_space());
        while let Some(ev) = self.capture_r.pop() {
            batch.push(ev);
        }
        if let Some(src) = &self.write_source {
            src.write(&batch);
        }
        Ok(false)
    }

    /// Finalize capture at transport stop.
    pub fn transport_stopped(&mut self, abort: bool) -> Result<()> {
        if self.was_recording {
            self.close_capture_window();
        }
        self.do_flush(true)?;

        let captures: Vec<CaptureInfo> = std::mem::take(&mut *self.capture_info.lock());

        if let Some(src) = self.write_source.take() {
            src.mark_streaming_write_completed();
            if abort || captures.is_empty() {
                self.store.finalize_source(src.id());
            }
        }
        self.reset_write_source();
        Ok(())
    }

    pub fn reset_write_source(&mut self) {
        if self.recordable() {
            self.write_source = Some(self.store.create_midi_source(&format!("{}-midi", self.name)));
        }
    }

    pub fn seek(&mut self, sample: SamplePos) {
        self.playback_r.clear();
        self.pending_playback = None;
        self.file_sample = sample;
        self.playback_sample = sample;
    }

    pub fn capture_window_count(&self) -> usize {
        self.capture_info.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(transport: SamplePos, nframes: usize, speed: f64, can_record: bool) -> ProcessContext {
        ProcessContext::new(transport, nframes, speed, can_record)
    }

    fn make_stream() -> MidiDiskstream {
        MidiDiskstream::new(
            DiskstreamId(7),
            "keys",
            DiskstreamFlags::RECORDABLE,
            Arc::new(AudioStore::new()),
            DiskConfig::default(),
        )
    }

    fn note_on(time: i64, note: u8) -> MidiEvent {
        MidiEvent::new(time, &[NOTE_ON, note, 100])
    }

    fn note_off(time: i64, note: u8) -> MidiEvent {
        MidiEvent::new(time, &[NOTE_OFF, note, 0])
    }

    #[test]
    fn test_capture_stamps_absolute_times() {
        let mut ds = make_stream();
        ds.set_record_enabled(true);

        let input = vec![note_on(10, 60), note_off(500, 60)];
        let mut output = Vec::new();
        let captured = ds.process(&ctx(48_000, 1024, 1.0, true), &input, &mut output);
        assert_eq!(captured, 2);

        ds.do_flush(true).unwrap();
        let src = ds.write_source().unwrap();
        let events = src.read(0, i64::MAX);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].time, 48_010);
        assert_eq!(events[1].time, 48_500);
    }

    #[test]
    fn test_events_before_window_not_captured() {
        let mut ds = make_stream();
        ds.set_record_enabled(true);
        ds.set_capture_offset(100);

        // Window opens at transport + 100; the first event misses it.
        let input = vec![note_on(50, 60), note_on(200, 62)];
        let mut output = Vec::new();
        let captured = ds.process(&ctx(1000, 1024, 1.0, true), &input, &mut output);
        assert_eq!(captured, 1);
    }

    #[test]
    fn test_playback_within_cycle_window() {
        let mut ds = make_stream();
        let store = Arc::new(AudioStore::new());
        let source = store.create_midi_source("clip");
        source.write(&[note_on(100, 60), note_on(2000, 64), note_on(9000, 67)]);
        ds.use_playback_source(source);

        ds.do_refill().unwrap();

        let mut output = Vec::new();
        ds.process(&ctx(0, 1024, 1.0, false), &[], &mut output);
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].time, 100);

        // Next cycle picks up the held-back event.
        output.clear();
        ds.process(&ctx(1024, 1024, 1.0, false), &[], &mut output);
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].time, 2000 - 1024);
    }

    #[test]
    fn test_note_tracker_flushes_hanging_notes() {
        let mut ds = make_stream();
        let store = Arc::new(AudioStore::new());
        let source = store.create_midi_source("clip");
        source.write(&[note_on(10, 60), note_on(20, 64)]);
        ds.use_playback_source(source);
        ds.do_refill().unwrap();

        let mut output = Vec::new();
        ds.process(&ctx(0, 1024, 1.0, false), &[], &mut output);
        assert_eq!(output.len(), 2);

        // Stop with notes sounding: the flush closes both.
        output.clear();
        ds.flush_notes(0, &mut output);
        assert_eq!(output.len(), 2);
        assert!(output.iter().all(|ev| ev.data()[0] & 0xf0 == NOTE_OFF));

        // Nothing left to flush.
        output.clear();
        ds.flush_notes(0, &mut output);
        assert!(output.is_empty());
    }

    #[test]
    fn test_refill_wraps_at_loop() {
        let mut ds = make_stream();
        let store = Arc::new(AudioStore::new());
        let source = store.create_midi_source("clip");
        source.write(&[note_on(100, 60), note_on(5000, 64)]);
        ds.use_playback_source(source);
        ds.set_loop(Some(SampleRange::new(0, 1000))).unwrap();

        let wrapped = ds.do_refill().unwrap();
        assert!(wrapped);
        assert_eq!(ds.file_sample, 0, "cursor wrapped to loop start");
    }

    #[test]
    fn test_capture_window_records_event_count() {
        let mut ds = make_stream();
        ds.set_record_enabled(true);

        let input = vec![note_on(0, 60), note_off(100, 60), note_on(200, 62)];
        let mut output = Vec::new();
        ds.process(&ctx(0, 1024, 1.0, true), &input, &mut output);

        ds.set_record_enabled(false);
        ds.process(&ctx(1024, 1024, 1.0, true), &[], &mut output);

        assert_eq!(ds.capture_window_count(), 1);
        let info = ds.capture_info.lock()[0];
        assert_eq!(info.frames, 3);
    }
}
