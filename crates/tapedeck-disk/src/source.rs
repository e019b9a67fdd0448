//! Audio and MIDI sources: typed streams of recorded material.

use crate::error::{Error, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::SystemTime;
use tapedeck_core::{MidiEvent, SamplePos, SourceId};
use tracing::warn;

/// Source behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceFlags(u32);

impl SourceFlags {
    pub const WRITABLE: SourceFlags = SourceFlags(0x1);
    pub const CAN_RENAME: SourceFlags = SourceFlags(0x2);
    pub const BROADCAST: SourceFlags = SourceFlags(0x4);
    pub const REMOVABLE: SourceFlags = SourceFlags(0x8);
    pub const REMOVABLE_IF_EMPTY: SourceFlags = SourceFlags(0x10);
    pub const REMOVE_AT_DESTROY: SourceFlags = SourceFlags(0x20);
    pub const NO_PEAK_FILE: SourceFlags = SourceFlags(0x40);
    pub const EMPTY: SourceFlags = SourceFlags(0x100);

    pub fn contains(self, other: SourceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SourceFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: SourceFlags) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> SourceFlags {
        SourceFlags(bits)
    }
}

impl std::ops::BitOr for SourceFlags {
    type Output = SourceFlags;
    fn bitor(self, rhs: SourceFlags) -> SourceFlags {
        SourceFlags(self.0 | rhs.0)
    }
}

/// Flags given to a fresh capture file.
pub fn capture_source_flags() -> SourceFlags {
    SourceFlags::WRITABLE
        | SourceFlags::REMOVABLE
        | SourceFlags::REMOVABLE_IF_EMPTY
        | SourceFlags::REMOVE_AT_DESTROY
        | SourceFlags::CAN_RENAME
}

/// A mono audio file source backed by a WAV file.
///
/// One capture pass produces one of these per channel. While being
/// written it holds an open writer; once streaming completes the header
/// is finalized and the source becomes read-only material.
pub struct AudioFileSource {
    id: SourceId,
    name: Mutex<String>,
    path: Mutex<PathBuf>,
    sample_rate: f64,
    flags: AtomicU32,
    length: AtomicI64,
    natural_position: AtomicI64,
    have_natural_position: AtomicBool,
    use_count: AtomicU32,
    timestamp: Mutex<Option<SystemTime>>,
    take_id: Mutex<String>,
    captured_for: Mutex<String>,
    analysed: AtomicBool,
    transients: Mutex<Vec<SamplePos>>,
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
}

impl AudioFileSource {
    /// Create a new writable capture source at `path`.
    pub fn create(
        id: SourceId,
        name: &str,
        path: &Path,
        sample_rate: f64,
        flags: SourceFlags,
    ) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: sample_rate as u32,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)?;

        let mut flags = flags;
        flags.insert(SourceFlags::WRITABLE);

        Ok(Self {
            id,
            name: Mutex::new(name.to_owned()),
            path: Mutex::new(path.to_owned()),
            sample_rate,
            flags: AtomicU32::new(flags.bits()),
            length: AtomicI64::new(0),
            natural_position: AtomicI64::new(0),
            have_natural_position: AtomicBool::new(false),
            use_count: AtomicU32::new(0),
            timestamp: Mutex::new(None),
            take_id: Mutex::new(String::new()),
            captured_for: Mutex::new(String::new()),
            analysed: AtomicBool::new(false),
            transients: Mutex::new(Vec::new()),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Open an existing file as a read-only source.
    pub fn open(id: SourceId, path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let length = reader.duration() as i64;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            id,
            name: Mutex::new(name),
            path: Mutex::new(path.to_owned()),
            sample_rate: spec.sample_rate as f64,
            flags: AtomicU32::new(SourceFlags::default().bits()),
            length: AtomicI64::new(length),
            natural_position: AtomicI64::new(0),
            have_natural_position: AtomicBool::new(false),
            use_count: AtomicU32::new(0),
            timestamp: Mutex::new(None),
            take_id: Mutex::new(String::new()),
            captured_for: Mutex::new(String::new()),
            analysed: AtomicBool::new(false),
            transients: Mutex::new(Vec::new()),
            writer: Mutex::new(None),
        })
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn path(&self) -> PathBuf {
        self.path.lock().clone()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn flags(&self) -> SourceFlags {
        SourceFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flag(&self, flag: SourceFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub fn clear_flag(&self, flag: SourceFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    pub fn writable(&self) -> bool {
        self.flags().contains(SourceFlags::WRITABLE)
    }

    /// Length in frames.
    pub fn length(&self) -> i64 {
        self.length.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn natural_position(&self) -> SamplePos {
        self.natural_position.load(Ordering::Acquire)
    }

    pub fn set_natural_position(&self, pos: SamplePos) {
        self.natural_position.store(pos, Ordering::Release);
        self.have_natural_position.store(true, Ordering::Release);
    }

    pub fn have_natural_position(&self) -> bool {
        self.have_natural_position.load(Ordering::Acquire)
    }

    pub fn use_count(&self) -> u32 {
        self.use_count.load(Ordering::Acquire)
    }

    pub fn used(&self) -> bool {
        self.use_count() > 0
    }

    pub fn inc_use_count(&self) {
        self.use_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_use_count(&self) {
        let prev = self.use_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "use count underflow on source {}", self.id);
    }

    pub fn set_take_id(&self, take: &str) {
        *self.take_id.lock() = take.to_owned();
    }

    pub fn take_id(&self) -> String {
        self.take_id.lock().clone()
    }

    pub fn set_captured_for(&self, what: &str) {
        *self.captured_for.lock() = what.to_owned();
    }

    pub fn captured_for(&self) -> String {
        self.captured_for.lock().clone()
    }

    pub fn stamp(&self, when: SystemTime) {
        *self.timestamp.lock() = Some(when);
    }

    pub fn timestamp(&self) -> Option<SystemTime> {
        *self.timestamp.lock()
    }

    /// Append frames. Butler thread only. Returns frames written.
    pub fn write(&self, data: &[f32]) -> Result<usize> {
        if !self.writable() {
            return Err(Error::NotWritable(self.id));
        }
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return Err(Error::NotWritable(self.id));
        };
        for &sample in data {
            writer.write_sample(sample)?;
        }
        self.length.fetch_add(data.len() as i64, Ordering::AcqRel);
        Ok(data.len())
    }

    /// Record the capture origin ahead of header finalization.
    pub fn update_header(&self, position: SamplePos, when: SystemTime) {
        self.set_natural_position(position);
        self.stamp(when);
    }

    /// Finalize the file: flush samples, rewrite the header, drop the
    /// writer. After this the source is fixed-length material.
    pub fn mark_streaming_write_completed(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().take() {
            writer.finalize()?;
        }
        self.clear_flag(SourceFlags::WRITABLE);
        Ok(())
    }

    /// Read frames starting at `pos`. Used by the butler and the
    /// analyser; not valid while the source is still being written.
    pub fn read(&self, buf: &mut [f32], pos: SamplePos) -> Result<usize> {
        if pos < 0 {
            return Ok(0);
        }
        let length = self.length();
        if pos >= length {
            return Ok(0);
        }

        let mut reader = WavReader::open(self.path())?;
        reader.seek(pos as u32)?;

        let want = buf.len().min((length - pos) as usize);
        let mut got = 0;
        for sample in reader.samples::<f32>().take(want) {
            buf[got] = sample?;
            got += 1;
        }
        Ok(got)
    }

    pub fn has_been_analysed(&self) -> bool {
        self.analysed.load(Ordering::Acquire)
    }

    pub fn set_been_analysed(&self, yn: bool) {
        self.analysed.store(yn, Ordering::Release);
    }

    pub fn transients(&self) -> Vec<SamplePos> {
        self.transients.lock().clone()
    }

    /// Delete the backing file. Called by the store at finalization when
    /// removal policy says so.
    pub fn remove_file(&self) {
        let path = self.path();
        if let Err(err) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), %err, "could not remove source file");
        }
    }
}

impl tapedeck_analysis::Analysable for AudioFileSource {
    fn name(&self) -> String {
        AudioFileSource::name(self)
    }

    fn can_be_analysed(&self) -> bool {
        // A file still being captured has no stable header to read.
        !self.writable() && !self.is_empty()
    }

    fn has_been_analysed(&self) -> bool {
        AudioFileSource::has_been_analysed(self)
    }

    fn set_been_analysed(&self, yn: bool) {
        AudioFileSource::set_been_analysed(self, yn)
    }

    fn sample_rate(&self) -> f64 {
        AudioFileSource::sample_rate(self)
    }

    fn length_samples(&self) -> i64 {
        self.length()
    }

    fn read_at(&self, buf: &mut [f32], pos: i64) -> std::io::Result<usize> {
        self.read(buf, pos)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    fn set_transients(&self, positions: Vec<i64>) {
        *self.transients.lock() = positions;
    }
}

/// An append-only MIDI source: a time-ordered event log.
pub struct MidiSource {
    id: SourceId,
    name: Mutex<String>,
    flags: AtomicU32,
    natural_position: AtomicI64,
    use_count: AtomicU32,
    events: Mutex<Vec<MidiEvent>>,
    write_complete: AtomicBool,
}

impl MidiSource {
    pub fn new(id: SourceId, name: &str) -> Self {
        let mut flags = SourceFlags::WRITABLE;
        flags.insert(SourceFlags::EMPTY);
        Self {
            id,
            name: Mutex::new(name.to_owned()),
            flags: AtomicU32::new(flags.bits()),
            natural_position: AtomicI64::new(0),
            use_count: AtomicU32::new(0),
            events: Mutex::new(Vec::new()),
            write_complete: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn flags(&self) -> SourceFlags {
        SourceFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    /// Length in events.
    pub fn length(&self) -> i64 {
        self.events.lock().len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn natural_position(&self) -> SamplePos {
        self.natural_position.load(Ordering::Acquire)
    }

    pub fn set_natural_position(&self, pos: SamplePos) {
        self.natural_position.store(pos, Ordering::Release);
    }

    pub fn inc_use_count(&self) {
        self.use_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_use_count(&self) {
        self.use_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn use_count(&self) -> u32 {
        self.use_count.load(Ordering::Acquire)
    }

    /// Append events. Event times are absolute timeline samples.
    pub fn write(&self, events: &[MidiEvent]) -> usize {
        if self.write_complete.load(Ordering::Acquire) {
            return 0;
        }
        let mut log = self.events.lock();
        log.extend_from_slice(events);
        if !events.is_empty() {
            self.flags
                .fetch_and(!SourceFlags::EMPTY.bits(), Ordering::AcqRel);
        }
        events.len()
    }

    /// Events with times in `[start, end)`.
    pub fn read(&self, start: SamplePos, end: SamplePos) -> Vec<MidiEvent> {
        self.events
            .lock()
            .iter()
            .filter(|ev| ev.time >= start && ev.time < end)
            .copied()
            .collect()
    }

    pub fn mark_streaming_write_completed(&self) {
        self.write_complete.store(true, Ordering::Release);
    }
}
