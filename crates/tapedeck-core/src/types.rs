//! Shared vocabulary types: sample positions, channel counts, range overlap.

use serde::{Deserialize, Serialize};

/// Signed count of audio frames from the session origin.
pub type SamplePos = i64;

/// Count of audio frames.
pub type SampleCnt = i64;

/// Largest representable sample position, used as "not yet known".
pub const MAX_SAMPLE: SamplePos = SamplePos::MAX;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

id_newtype!(
    /// Identifies a route in the process graph.
    RouteId
);
id_newtype!(
    /// Identifies a diskstream (one per track).
    DiskstreamId
);
id_newtype!(
    /// Identifies a source in the session's audio store.
    SourceId
);
id_newtype!(
    /// Identifies a region in the session's audio store.
    RegionId
);
id_newtype!(
    /// Identifies a playlist in the session's audio store.
    PlaylistId
);

/// Half-open range of timeline samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRange {
    pub start: SamplePos,
    pub end: SamplePos,
}

impl SampleRange {
    pub fn new(start: SamplePos, end: SamplePos) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> SampleCnt {
        (self.end - self.start).max(0)
    }

    pub fn contains(&self, pos: SamplePos) -> bool {
        pos >= self.start && pos < self.end
    }
}

/// A short MIDI event stamped with its offset inside the current cycle.
///
/// Three data bytes cover all channel voice messages; longer messages
/// (sysex) are outside the core's capture path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MidiEvent {
    /// Sample offset. Within a cycle this is relative to the cycle start;
    /// in a capture ring it is the absolute timeline sample.
    pub time: i64,
    pub size: u8,
    pub bytes: [u8; 3],
}

impl MidiEvent {
    pub fn new(time: i64, bytes: &[u8]) -> Self {
        let mut ev = MidiEvent {
            time,
            size: bytes.len().min(3) as u8,
            bytes: [0; 3],
        };
        ev.bytes[..ev.size as usize].copy_from_slice(&bytes[..ev.size as usize]);
        ev
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.size as usize]
    }
}

/// Audio and MIDI channel counts for a port set or buffer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChanCount {
    pub audio: usize,
    pub midi: usize,
}

impl ChanCount {
    pub const ZERO: ChanCount = ChanCount { audio: 0, midi: 0 };

    pub fn new(audio: usize, midi: usize) -> Self {
        Self { audio, midi }
    }

    /// Per-type maximum of the two counts.
    pub fn max(self, other: ChanCount) -> ChanCount {
        ChanCount {
            audio: self.audio.max(other.audio),
            midi: self.midi.max(other.midi),
        }
    }
}

/// How a probe range overlaps a reference range.
///
/// Both ranges are half-open. The variants describe the probe range
/// relative to the reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapType {
    /// No samples in common.
    None,
    /// Probe lies entirely within the reference.
    Internal,
    /// Probe begins before the reference and ends inside it.
    Start,
    /// Probe begins inside the reference and ends after it.
    End,
    /// Probe covers the reference entirely.
    External,
}

/// Classify how `[probe_start, probe_end)` overlaps `[ref_start, ref_end)`.
pub fn coverage(
    ref_start: SamplePos,
    ref_end: SamplePos,
    probe_start: SamplePos,
    probe_end: SamplePos,
) -> OverlapType {
    if ref_start >= ref_end || probe_start >= probe_end {
        return OverlapType::None;
    }
    if probe_end <= ref_start || probe_start >= ref_end {
        return OverlapType::None;
    }
    if probe_start < ref_start {
        if probe_end > ref_end {
            return OverlapType::External;
        }
        return OverlapType::Start;
    }
    if probe_end > ref_end {
        return OverlapType::End;
    }
    OverlapType::Internal
}
