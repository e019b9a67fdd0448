//! Audio diskstream: per-track capture/playback streaming.
//!
//! The audio thread writes captured input into per-channel rings and
//! reads playback material out of them; the butler keeps the playback
//! rings filled from the playlist and drains the capture rings to the
//! write sources. Neither side ever blocks on the other.

use super::{
    AlignStyle, CaptureInfo, CaptureTransition, DiskConfig, DiskstreamFlags, ProcessContext,
    RecordStatusChange, RecordWindow,
};
use crate::destructive::{DestructiveSource, XfadeCurves};
use crate::error::Result;
use crate::source::{capture_source_flags, AudioFileSource};
use crate::store::AudioStore;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tapedeck_core::{
    spsc_ring, DiskstreamId, PlaylistId, RingReader, RingWriter, SampleCnt, SamplePos, SampleRange,
};
use tracing::{debug, warn};

/// Fixed-point fractional bits of the varispeed phase accumulator.
const PHI_BITS: u64 = 24;
const PHI_ONE: u64 = 1 << PHI_BITS;

enum WriteSource {
    File(Arc<AudioFileSource>),
    Tape(Arc<DestructiveSource>),
}

impl WriteSource {
    fn write(&self, data: &[f32]) -> Result<usize> {
        match self {
            WriteSource::File(s) => s.write(data),
            WriteSource::Tape(s) => s.write(data),
        }
    }
}

struct ChannelInfo {
    playback_w: RingWriter<f32>,
    playback_r: RingReader<f32>,
    capture_w: RingWriter<f32>,
    capture_r: RingReader<f32>,
    write_source: Option<WriteSource>,
}

impl ChannelInfo {
    fn new(config: &DiskConfig) -> Self {
        let (playback_w, playback_r) = spsc_ring(config.playback_buf_frames);
        let (capture_w, capture_r) = spsc_ring(config.capture_buf_frames);
        Self {
            playback_w,
            playback_r,
            capture_w,
            capture_r,
            write_source: None,
        }
    }
}

/// What one process call decided to do; consumed by `commit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessResult {
    pub rec_offset: usize,
    pub rec_nframes: usize,
    pub playback_distance: SampleCnt,
}

pub struct AudioDiskstream {
    id: DiskstreamId,
    name: String,
    flags: DiskstreamFlags,
    playlist: PlaylistId,
    store: Arc<AudioStore>,
    config: DiskConfig,
    sample_rate: f64,
    sound_dir: PathBuf,
    curves: Arc<XfadeCurves>,

    channels: Vec<ChannelInfo>,
    transitions_w: RingWriter<CaptureTransition>,
    transitions_r: RingReader<CaptureTransition>,

    alignment: AlignStyle,
    persistent_alignment: AlignStyle,
    capture_offset: SampleCnt,
    roll_delay: SampleCnt,

    rec_enabled: Arc<AtomicBool>,
    record: RecordWindow,
    was_recording: bool,
    capture_captured: SampleCnt,
    capture_info: Mutex<Vec<CaptureInfo>>,
    capture_failed: AtomicBool,
    take_count: u32,

    // Playback state, audio thread side.
    playback_sample: SamplePos,
    visible_speed: f64,
    actual_speed: f64,
    phi: u64,
    last_phase: u64,
    speed_buffer: Vec<f32>,
    buffer_reallocation_required: AtomicBool,
    seek_required: AtomicBool,
    underruns: AtomicU64,
    overruns: AtomicU64,

    // Butler side.
    file_sample: SamplePos,
    loop_range: Option<SampleRange>,
    pending_overwrite: AtomicBool,
}

impl AudioDiskstream {
    pub fn new(
        id: DiskstreamId,
        name: &str,
        n_channels: usize,
        flags: DiskstreamFlags,
        store: Arc<AudioStore>,
        playlist: PlaylistId,
        sound_dir: PathBuf,
        sample_rate: f64,
        config: DiskConfig,
    ) -> Result<Self> {
        let channels = (0..n_channels).map(|_| ChannelInfo::new(&config)).collect();
        let (transitions_w, transitions_r) = spsc_ring(256);
        let curves = XfadeCurves::standard(config.xfade_frames);

        let mut ds = Self {
            id,
            name: name.to_owned(),
            flags,
            playlist,
            store,
            config,
            sample_rate,
            sound_dir,
            curves,
            channels,
            transitions_w,
            transitions_r,
            alignment: AlignStyle::ExistingMaterial,
            persistent_alignment: AlignStyle::ExistingMaterial,
            capture_offset: 0,
            roll_delay: 0,
            rec_enabled: Arc::new(AtomicBool::new(false)),
            record: RecordWindow::new(),
            was_recording: false,
            capture_captured: 0,
            capture_info: Mutex::new(Vec::new()),
            capture_failed: AtomicBool::new(false),
            take_count: 0,
            playback_sample: 0,
            visible_speed: 1.0,
            actual_speed: 1.0,
            phi: PHI_ONE,
            last_phase: 0,
            speed_buffer: Vec::new(),
            buffer_reallocation_required: AtomicBool::new(false),
            seek_required: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            file_sample: 0,
            loop_range: None,
            pending_overwrite: AtomicBool::new(false),
        };
        if ds.recordable() {
            ds.reset_write_sources()?;
        }
        Ok(ds)
    }

    pub fn id(&self) -> DiskstreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn playlist(&self) -> PlaylistId {
        self.playlist
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn recordable(&self) -> bool {
        self.flags.contains(DiskstreamFlags::RECORDABLE)
    }

    pub fn destructive(&self) -> bool {
        self.flags.contains(DiskstreamFlags::DESTRUCTIVE)
    }

    pub fn record_enabled(&self) -> bool {
        self.rec_enabled.load(Ordering::Acquire)
    }

    pub fn set_record_enabled(&self, yn: bool) {
        if self.recordable() {
            self.rec_enabled.store(yn, Ordering::Release);
        }
    }

    /// Shared handle for the route graph's rec-enable ordering.
    pub fn record_enable_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.rec_enabled)
    }

    pub fn alignment_style(&self) -> AlignStyle {
        self.alignment
    }

    /// Explicit alignment choice; ignored mid-capture.
    pub fn set_align_style(&mut self, style: AlignStyle) {
        if self.was_recording {
            return;
        }
        self.persistent_alignment = style;
        self.alignment = style;
    }

    /// The alignment explicitly chosen for this stream, surviving input
    /// reconnections.
    pub fn persistent_alignment_style(&self) -> AlignStyle {
        self.persistent_alignment
    }

    /// Derive alignment from input connections: physical inputs carry
    /// existing material, virtual ones are capture-aligned.
    pub fn set_align_style_from_io(&mut self, physical_inputs: bool) {
        let style = if physical_inputs {
            AlignStyle::ExistingMaterial
        } else {
            AlignStyle::CaptureTime
        };
        if !self.was_recording {
            self.alignment = style;
        }
    }

    /// Capture offset from input latency.
    pub fn set_capture_offset(&mut self, offset: SampleCnt) {
        self.capture_offset = offset;
    }

    pub fn capture_offset(&self) -> SampleCnt {
        self.capture_offset
    }

    pub fn set_roll_delay(&mut self, delay: SampleCnt) {
        self.roll_delay = delay;
    }

    pub fn playback_sample(&self) -> SamplePos {
        self.playback_sample
    }

    pub fn capture_failed(&self) -> bool {
        self.capture_failed.load(Ordering::Acquire)
    }

    /// Read and clear the capture-failure flag, so the failure is
    /// reported exactly once.
    pub fn take_capture_failed(&self) -> bool {
        self.capture_failed.swap(false, Ordering::AcqRel)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
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

    pub fn loop_range(&self) -> Option<SampleRange> {
        self.loop_range
    }

    /// Queue a butler rebuffer after a playlist change.
    pub fn request_overwrite(&self) {
        self.pending_overwrite.store(true, Ordering::Release);
    }

    pub fn pending_overwrite(&self) -> bool {
        self.pending_overwrite.load(Ordering::Acquire)
    }

    // ----- audio thread -----

    /// Change speed from the audio thread. Returns true if non-realtime
    /// work (buffer reallocation or a seek) is now required.
    pub fn realtime_set_speed(&mut self, sp: f64, global: bool) -> bool {
        let mut changed = false;

        if self.visible_speed != sp {
            self.visible_speed = sp;
            changed = true;
        }

        let new_speed = sp;
        if new_speed != self.actual_speed {
            let required = (self.config.chunk_frames as f64 * new_speed.abs()).floor() as usize + 1;
            if required > self.speed_buffer.len() {
                self.buffer_reallocation_required.store(true, Ordering::Release);
            }
            self.actual_speed = new_speed;
            self.phi = (PHI_ONE as f64 * new_speed.abs()) as u64;
        }

        if changed && !global {
            self.seek_required.store(true, Ordering::Release);
        }

        self.buffer_reallocation_required.load(Ordering::Acquire)
            || self.seek_required.load(Ordering::Acquire)
    }

    pub fn speed(&self) -> f64 {
        self.actual_speed
    }

    /// Speed as requested for this stream, before any global scaling.
    pub fn visible_speed(&self) -> f64 {
        self.visible_speed
    }

    /// Non-RT counterpart: grow the varispeed buffer and perform any
    /// deferred seek.
    pub fn non_realtime_set_speed(&mut self) {
        if self.buffer_reallocation_required.swap(false, Ordering::AcqRel) {
            let required =
                (self.config.chunk_frames as f64 * self.actual_speed.abs()).floor() as usize + 1;
            self.speed_buffer.resize(required.max(self.config.chunk_frames), 0.0);
        }
        if self.seek_required.swap(false, Ordering::AcqRel) {
            self.flush_playback();
        }
    }

    /// One cycle of capture/playback against the provided input buffers.
    /// `output` receives playback material (one slice per channel).
    pub fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &[&[f32]],
        output: &mut [Vec<f32>],
    ) -> ProcessResult {
        let mut result = ProcessResult::default();

        let change = self.record.check_record_status(
            ctx,
            self.record_enabled(),
            self.alignment,
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
                    // Ring full means the butler has fallen impossibly
                    // far behind; drop the window rather than corrupt it.
                    warn!(stream = %self.id, "capture transition ring full on rec start");
                    self.record.reset();
                }
            }
        }

        if ctx.nframes == 0 {
            return result;
        }

        let (rec_offset, rec_nframes) = self.record.cycle_overlap(ctx.transport_sample, ctx.nframes);
        result.rec_offset = rec_offset;
        result.rec_nframes = rec_nframes;

        if rec_nframes > 0 && self.recordable() {
            self.was_recording = true;
            for (chan, input) in self.channels.iter_mut().zip(inputs) {
                let slice = &input[rec_offset..rec_offset + rec_nframes];
                let written = chan.capture_w.write_slice(slice);
                if written < rec_nframes {
                    // Capture overrun: data lost, stop recording here.
                    self.overruns.fetch_add(1, Ordering::Relaxed);
                    self.capture_failed.store(true, Ordering::Release);
                    self.rec_enabled.store(false, Ordering::Release);
                }
            }
        } else if self.was_recording && self.record.window_closed(ctx.transport_sample) {
            self.close_capture_window();
        }

        // Collect playback whenever the cycle is not fully recording.
        if rec_nframes < ctx.nframes {
            result.playback_distance = self.collect_playback(ctx.nframes, output);
        } else {
            result.playback_distance = rec_nframes as SampleCnt;
        }

        result
    }

    fn close_capture_window(&mut self) {
        if self.recordable() {
            let _ = self.transitions_w.push(CaptureTransition::End);
        }
        let info = CaptureInfo {
            start: self.record.capture_start_sample,
            frames: self.capture_captured,
        };
        if info.frames > 0 {
            self.capture_info.lock().push(info);
        }
        debug!(stream = %self.id, start = info.start, frames = info.frames, "capture window closed");
        self.capture_captured = 0;
        self.was_recording = false;
        self.record.reset();
    }

    fn collect_playback(&mut self, nframes: usize, output: &mut [Vec<f32>]) -> SampleCnt {
        if self.actual_speed == 0.0 {
            for out in output.iter_mut() {
                out[..nframes].fill(0.0);
            }
            return 0;
        }

        if (self.actual_speed - 1.0).abs() < f64::EPSILON {
            for (chan, out) in self.channels.iter_mut().zip(output.iter_mut()) {
                let got = chan.playback_r.read_slice(&mut out[..nframes]);
                if got < nframes {
                    out[got..nframes].fill(0.0);
                    self.underruns.fetch_add(1, Ordering::Relaxed);
                }
            }
            return nframes as SampleCnt;
        }

        // Varispeed: consume `distance` ring frames, interpolate to
        // nframes of output.
        let end_phase = self.last_phase + self.phi * nframes as u64;
        let mut distance = (end_phase >> PHI_BITS) as usize;
        if self.speed_buffer.len() < distance + 1 {
            // Wrap buffer not grown yet; degrade this cycle and let the
            // butler resize it. No allocation on the audio thread.
            self.buffer_reallocation_required.store(true, Ordering::Release);
            if self.speed_buffer.len() < 2 {
                for out in output.iter_mut() {
                    out[..nframes].fill(0.0);
                }
                return 0;
            }
            distance = self.speed_buffer.len() - 1;
        }

        for (chan, out) in self.channels.iter_mut().zip(output.iter_mut()) {
            let got = chan.playback_r.read_slice(&mut self.speed_buffer[..distance]);
            if got < distance {
                self.speed_buffer[got..distance].fill(0.0);
                self.underruns.fetch_add(1, Ordering::Relaxed);
            }
            // Guard sample for the interpolator at the block edge.
            self.speed_buffer[distance] = *self
                .speed_buffer
                .get(distance.saturating_sub(1))
                .unwrap_or(&0.0);

            let mut phase = self.last_phase;
            for sample in out[..nframes].iter_mut() {
                let idx = (phase >> PHI_BITS) as usize;
                let frac = (phase & (PHI_ONE - 1)) as f32 / PHI_ONE as f32;
                let a = self.speed_buffer[idx.min(distance)];
                let b = self.speed_buffer[(idx + 1).min(distance)];
                *sample = a + (b - a) * frac;
                phase += self.phi;
            }
        }

        self.last_phase = end_phase & (PHI_ONE - 1);
        distance as SampleCnt
    }

    /// Advance counters for the cycle just processed. Returns true when
    /// the butler should be woken.
    pub fn commit(&mut self, result: &ProcessResult) -> bool {
        if result.rec_nframes > 0 {
            self.capture_captured += result.rec_nframes as SampleCnt;
        }

        if self.actual_speed >= 0.0 {
            self.playback_sample += result.playback_distance;
        } else {
            self.playback_sample -= result.playback_distance;
        }

        let playback_low = self
            .channels
            .iter()
            .map(|c| c.playback_r.read_space())
            .min()
            .unwrap_or(0)
            < self.config.chunk_frames;
        let capture_high = self
            .channels
            .iter()
            .map(|c| c.capture_r.read_space())
            .max()
            .unwrap_or(0)
            >= self.config.chunk_frames;

        playback_low || capture_high || self.pending_overwrite()
    }

    /// True if the playback rings already hold `distance` frames, so a
    /// short seek can happen without butler help.
    pub fn can_internal_playback_seek(&self, distance: SampleCnt) -> bool {
        distance >= 0
            && self
                .channels
                .iter()
                .all(|c| c.playback_r.read_space() >= distance as usize)
    }

    /// Advance the playback read pointers in place.
    pub fn internal_playback_seek(&mut self, distance: SampleCnt) {
        let mut skip = [0.0f32; 256];
        for chan in &mut self.channels {
            let mut remaining = distance as usize;
            while remaining > 0 {
                let n = remaining.min(skip.len());
                let got = chan.playback_r.read_slice(&mut skip[..n]);
                if got == 0 {
                    break;
                }
                remaining -= got;
            }
        }
        self.playback_sample += distance;
    }

    /// Rewrap the playback position across a loop boundary without
    /// touching the rings; the butler wrote the loop contiguously.
    pub fn loop_wrap(&mut self, range: SampleRange) {
        if self.playback_sample >= range.end {
            self.playback_sample = range.start + (self.playback_sample - range.end);
        }
    }

    // ----- butler thread -----

    /// Refill the playback rings from the playlist. Returns true when
    /// another pass should run promptly.
    pub fn do_refill(&mut self) -> Result<bool> {
        let chunk = self.config.chunk_frames;

        if self.pending_overwrite.swap(false, Ordering::AcqRel) {
            self.flush_playback();
        }

        let min_space = self
            .channels
            .iter()
            .map(|c| c.playback_w.write_space())
            .min()
            .unwrap_or(0);

        if min_space == 0 {
            return Ok(false);
        }
        // Only bother the disk for full chunks unless varispeed is
        // consuming faster than realtime.
        if min_space < chunk && self.actual_speed.abs() <= 2.0 {
            return Ok(false);
        }

        let mut to_read = min_space.min(chunk);
        let mut wrap_to: Option<SamplePos> = None;

        if self.actual_speed >= 0.0 {
            if let Some(range) = self.loop_range {
                if self.file_sample >= range.end {
                    self.file_sample = range.start;
                }
                if self.file_sample + to_read as SamplePos >= range.end {
                    to_read = (range.end - self.file_sample) as usize;
                    wrap_to = Some(range.start);
                }
            }
        }

        let mut staging = vec![0.0f32; to_read];
        let reverse = self.actual_speed < 0.0;
        let read_from = if reverse {
            (self.file_sample - to_read as SamplePos).max(0)
        } else {
            self.file_sample
        };

        for (n, chan) in self.channels.iter_mut().enumerate() {
            self.store.read_playlist(self.playlist, &mut staging, read_from, n);
            if reverse {
                staging.reverse();
            }
            chan.playback_w.write_slice(&staging);
        }

        if reverse {
            self.file_sample = read_from;
        } else {
            self.file_sample += to_read as SamplePos;
            if let Some(start) = wrap_to {
                self.file_sample = start;
            }
        }

        // A loop truncation or a still-hungry ring wants another pass.
        Ok(wrap_to.is_some() || min_space - to_read >= chunk)
    }

    /// Drain the capture rings to the write sources. Returns true when
    /// more flushing work remains.
    pub fn do_flush(&mut self, force: bool) -> Result<bool> {
        let chunk = self.config.chunk_frames;

        // Apply window boundary tokens before moving data.
        while let Some(transition) = self.transitions_r.pop() {
            match transition {
                CaptureTransition::Start { capture_val } => {
                    for chan in &self.channels {
                        match &chan.write_source {
                            Some(WriteSource::Tape(tape)) => tape.mark_capture_start(capture_val),
                            Some(WriteSource::File(file)) => {
                                if !file.have_natural_position() {
                                    file.update_header(capture_val, SystemTime::now());
                                }
                            }
                            None => {}
                        }
                    }
                }
                CaptureTransition::End => {
                    for chan in &self.channels {
                        if let Some(WriteSource::Tape(tape)) = &chan.write_source {
                            tape.mark_capture_end();
                        }
                    }
                }
                CaptureTransition::None => {}
            }
        }

        let mut work_remaining = false;
        let mut staging = vec![0.0f32; chunk];

        for chan in &mut self.channels {
            loop {
                let pending = chan.capture_r.read_space();
                let to_write = if force {
                    pending.min(chunk)
                } else if pending >= chunk {
                    chunk
                } else {
                    0
                };
                if to_write == 0 {
                    break;
                }

                let got = chan.capture_r.read_slice(&mut staging[..to_write]);
                if let Some(source) = &chan.write_source {
                    if let Err(err) = source.write(&staging[..got]) {
                        warn!(stream = %self.id, %err, "capture write failed");
                        self.capture_failed.store(true, Ordering::Release);
                        self.rec_enabled.store(false, Ordering::Release);
                        return Err(err);
                    }
                }

                if !force {
                    work_remaining |= chan.capture_r.read_space() >= chunk;
                    break;
                }
            }
        }

        Ok(work_remaining)
    }

    /// End-of-transport capture handling: drain everything, finalize the
    /// write sources and turn completed capture windows into regions.
    pub fn transport_stopped(&mut self, abort: bool) -> Result<()> {
        // A window can still be open if the stop beat the punch-out.
        if self.was_recording {
            self.close_capture_window();
        }

        self.do_flush(true)?;

        let captures: Vec<CaptureInfo> = std::mem::take(&mut *self.capture_info.lock());

        if abort || captures.is_empty() {
            self.reset_write_sources()?;
            return Ok(());
        }

        if self.destructive() {
            // Tape mode keeps one fixed source; no new regions per pass.
            for chan in &self.channels {
                if let Some(WriteSource::Tape(tape)) = &chan.write_source {
                    tape.mark_streaming_write_completed()?;
                }
            }
            return Ok(());
        }

        let sources: SmallVec<[Arc<AudioFileSource>; 2]> = self
            .channels
            .iter()
            .filter_map(|c| match &c.write_source {
                Some(WriteSource::File(f)) => Some(Arc::clone(f)),
                _ => None,
            })
            .collect();

        for source in &sources {
            source.set_captured_for(&self.name);
            source.mark_streaming_write_completed()?;
        }

        // One region per capture window; offsets walk through the
        // concatenated source material. All windows land in one edit.
        let source_ids: Vec<_> = sources.iter().map(|s| s.id()).collect();
        let mut source_offset: SamplePos = 0;
        self.take_count += 1;
        let mut new_regions = Vec::with_capacity(captures.len());
        for (n, info) in captures.iter().enumerate() {
            let region = crate::region::Region::new(
                self.store.next_region_id(),
                &format!("{}-take{}.{}", self.name, self.take_count, n + 1),
                source_ids.clone(),
                info.start,
                source_offset,
                info.frames,
            );
            new_regions.push((region, info.start));
            source_offset += info.frames;
        }
        self.store
            .add_regions_to_playlist(self.playlist, new_regions)?;

        self.reset_write_sources()?;
        Ok(())
    }

    /// Create fresh write sources for the next capture pass.
    pub fn reset_write_sources(&mut self) -> Result<()> {
        if !self.recordable() {
            return Ok(());
        }

        let destructive = self.destructive();
        for (n, chan) in self.channels.iter_mut().enumerate() {
            if destructive {
                // Tape source persists across passes.
                if chan.write_source.is_none() {
                    let path = self
                        .sound_dir
                        .join(format!("{}-tape-ch{}.wav", self.name, n + 1));
                    let tape = self.store.create_destructive_source(
                        &format!("{}-tape-ch{}", self.name, n + 1),
                        &path,
                        self.sample_rate,
                        0,
                        Arc::clone(&self.curves),
                    )?;
                    chan.write_source = Some(WriteSource::Tape(tape));
                }
            } else {
                let take = self.take_count + 1;
                let stem = format!("{}-take{}-ch{}", self.name, take, n + 1);
                let path = self.sound_dir.join(format!("{stem}.wav"));
                let file = self.store.create_audio_source(
                    &stem,
                    &path,
                    self.sample_rate,
                    capture_source_flags(),
                )?;
                chan.write_source = Some(WriteSource::File(file));
            }
        }
        Ok(())
    }

    /// Recreate the playback rings at a new size. Non-RT; buffered
    /// playback is dropped and the butler must refill.
    pub fn adjust_playback_buffering(&mut self, frames: usize) {
        self.config.playback_buf_frames = frames;
        for chan in &mut self.channels {
            let (w, r) = spsc_ring(frames);
            chan.playback_w = w;
            chan.playback_r = r;
        }
        self.file_sample = self.playback_sample;
    }

    /// Recreate the capture rings at a new size. Refused mid-capture.
    pub fn adjust_capture_buffering(&mut self, frames: usize) {
        if self.was_recording {
            warn!(stream = %self.id, "ignoring capture buffer resize while recording");
            return;
        }
        self.config.capture_buf_frames = frames;
        for chan in &mut self.channels {
            let (w, r) = spsc_ring(frames);
            chan.capture_w = w;
            chan.capture_r = r;
        }
    }

    /// Seek the butler read cursor and drop buffered playback.
    pub fn seek(&mut self, sample: SamplePos) {
        self.flush_playback();
        self.file_sample = sample;
        self.playback_sample = sample;
        self.last_phase = 0;
    }

    fn flush_playback(&mut self) {
        for chan in &mut self.channels {
            chan.playback_r.clear();
        }
    }

    /// Capture start of window `n`, or of the current one.
    pub fn get_capture_start_sample(&self, n: usize) -> SamplePos {
        let info = self.capture_info.lock();
        info.get(n)
            .map(|i| i.start)
            .unwrap_or(self.record.capture_start_sample)
    }

    /// Captured frame count of window `n`, or of the current one.
    pub fn get_captured_frames(&self, n: usize) -> SampleCnt {
        let info = self.capture_info.lock();
        info.get(n).map(|i| i.frames).unwrap_or(self.capture_captured)
    }

    pub fn capture_window_count(&self) -> usize {
        self.capture_info.lock().len()
    }

    /// Read space currently buffered for playback, worst channel.
    pub fn playback_buffered(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.playback_r.read_space())
            .min()
            .unwrap_or(0)
    }

    /// Frames of captured data awaiting flush, worst channel.
    pub fn capture_pending(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.capture_r.read_space())
            .max()
            .unwrap_or(0)
    }
}
