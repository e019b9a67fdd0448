//! Per-track streaming endpoints bridging ring buffers and disk.

pub mod audio;
pub mod midi;

pub use audio::AudioDiskstream;
pub use midi::MidiDiskstream;

use serde::{Deserialize, Serialize};
use tapedeck_core::{coverage, OverlapType, SampleCnt, SamplePos, MAX_SAMPLE};

/// How captured material is aligned against the transport.
///
/// Physical inputs carry existing (already audible) material, so capture
/// is delayed by the worst output latency; virtual inputs are aligned to
/// the time the signal actually arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignStyle {
    #[default]
    ExistingMaterial,
    CaptureTime,
}

/// Diskstream behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiskstreamFlags(u32);

impl DiskstreamFlags {
    pub const RECORDABLE: DiskstreamFlags = DiskstreamFlags(0x1);
    pub const HIDDEN: DiskstreamFlags = DiskstreamFlags(0x2);
    pub const DESTRUCTIVE: DiskstreamFlags = DiskstreamFlags(0x4);

    pub fn contains(self, other: DiskstreamFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for DiskstreamFlags {
    type Output = DiskstreamFlags;
    fn bitor(self, rhs: DiskstreamFlags) -> DiskstreamFlags {
        DiskstreamFlags(self.0 | rhs.0)
    }
}

/// One contiguous captured range, appended as record windows close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub start: SamplePos,
    pub frames: SampleCnt,
}

/// Control tokens interleaved with capture data so the butler learns
/// exact window boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureTransition {
    #[default]
    None,
    Start {
        capture_val: SamplePos,
    },
    End,
}

/// Transport context for one process cycle.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub transport_sample: SamplePos,
    pub nframes: usize,
    pub speed: f64,
    /// Global record enable combined with any punch window.
    pub can_record: bool,
    /// Auto punch-in is configured (affects alignment on the roll).
    pub punch_in: bool,
    pub worst_output_latency: SampleCnt,
    /// Exact sample of a punch-in that fired inside this cycle; keeps
    /// the record window sample-accurate across a cycle boundary.
    pub record_window_opens: Option<SamplePos>,
    /// Exact sample of a punch-out that fired inside this cycle.
    pub record_window_closes: Option<SamplePos>,
}

impl ProcessContext {
    pub fn new(transport_sample: SamplePos, nframes: usize, speed: f64, can_record: bool) -> Self {
        Self {
            transport_sample,
            nframes,
            speed,
            can_record,
            punch_in: false,
            worst_output_latency: 0,
            record_window_opens: None,
            record_window_closes: None,
        }
    }
}

/// Sizing for a diskstream's rings and the butler's disk chunks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Frames per disk read/write pass.
    pub chunk_frames: usize,
    pub playback_buf_frames: usize,
    pub capture_buf_frames: usize,
    /// Destructive punch crossfade length.
    pub xfade_frames: usize,
    pub midi_buf_events: usize,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 8192,
            playback_buf_frames: 1 << 16,
            capture_buf_frames: 1 << 16,
            xfade_frames: 64,
            midi_buf_events: 4096,
        }
    }
}

const TRANSPORT_ROLLING: u8 = 0x4;
const TRACK_REC_ENABLED: u8 = 0x2;
const GLOBAL_REC_ENABLED: u8 = 0x1;
const ALL_RECORDING: u8 = TRANSPORT_ROLLING | TRACK_REC_ENABLED | GLOBAL_REC_ENABLED;

/// Outcome of a record-status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordStatusChange {
    None,
    /// Recording begins; the value is the capture start sample for the
    /// transition token.
    Starting(SamplePos),
    /// Recording will end once the window closes.
    Stopping,
}

/// The recordable window shared by both diskstream variants.
#[derive(Debug)]
pub(crate) struct RecordWindow {
    pub first_recordable: SamplePos,
    pub last_recordable: SamplePos,
    pub capture_start_sample: SamplePos,
    last_possibly_recording: u8,
}

impl RecordWindow {
    pub fn new() -> Self {
        Self {
            first_recordable: MAX_SAMPLE,
            last_recordable: MAX_SAMPLE,
            capture_start_sample: 0,
            last_possibly_recording: 0,
        }
    }

    /// Merge the three factors affecting record status and compute what
    /// changed. Must run once per cycle before the overlap calculation.
    pub fn check_record_status(
        &mut self,
        ctx: &ProcessContext,
        rec_enabled: bool,
        align: AlignStyle,
        capture_offset: SampleCnt,
        roll_delay: SampleCnt,
    ) -> RecordStatusChange {
        let rolling = ctx.speed != 0.0;
        let possibly = ((rolling as u8) << 2) | ((rec_enabled as u8) << 1) | ctx.can_record as u8;
        let was = self.last_possibly_recording;

        if possibly == was {
            return RecordStatusChange::None;
        }
        self.last_possibly_recording = possibly;

        if possibly == ALL_RECORDING {
            // Recording just became possible: compute the window. The
            // first recordable frame absorbs the capture offset plus the
            // alignment delay. A punch that fired mid-cycle opens the
            // window at its exact sample.
            let open_at = ctx
                .record_window_opens
                .map_or(ctx.transport_sample, |s| s.max(ctx.transport_sample));
            self.first_recordable = open_at + capture_offset;
            self.last_recordable = MAX_SAMPLE;

            match align {
                AlignStyle::ExistingMaterial => {
                    self.first_recordable += ctx.worst_output_latency;
                }
                AlignStyle::CaptureTime => {
                    self.first_recordable += roll_delay;
                }
            }

            self.capture_start_sample = self.first_recordable;
            let punched_on_the_roll = was & TRANSPORT_ROLLING != 0;
            if punched_on_the_roll && align == AlignStyle::CaptureTime && !ctx.punch_in {
                // Manual punch: backdate the region so the material
                // lands where the user actually hit the button.
                self.capture_start_sample -= roll_delay;
            }

            return RecordStatusChange::Starting(self.capture_start_sample);
        }

        if was == ALL_RECORDING && (possibly & (TRACK_REC_ENABLED | GLOBAL_REC_ENABLED)) != (TRACK_REC_ENABLED | GLOBAL_REC_ENABLED)
        {
            // Rec-enable went away: close the window with alignment.
            let close_at = ctx
                .record_window_closes
                .map_or(ctx.transport_sample, |s| s.max(ctx.transport_sample));
            self.last_recordable = close_at + capture_offset;
            match align {
                AlignStyle::ExistingMaterial => {
                    self.last_recordable += ctx.worst_output_latency;
                }
                AlignStyle::CaptureTime => {
                    self.last_recordable += roll_delay;
                }
            }
            return RecordStatusChange::Stopping;
        }

        RecordStatusChange::None
    }

    /// Overlap of the record window with this cycle, as
    /// (offset into the cycle, frames to record).
    pub fn cycle_overlap(&self, transport_sample: SamplePos, nframes: usize) -> (usize, usize) {
        let cycle_end = transport_sample + nframes as SamplePos;
        match coverage(
            self.first_recordable,
            self.last_recordable,
            transport_sample,
            cycle_end,
        ) {
            OverlapType::None => (0, 0),
            OverlapType::Internal => (0, nframes),
            OverlapType::Start => {
                let offset = (self.first_recordable - transport_sample) as usize;
                (offset, nframes - offset)
            }
            OverlapType::End => (0, (self.last_recordable - transport_sample) as usize),
            OverlapType::External => {
                let offset = (self.first_recordable - transport_sample) as usize;
                (offset, (self.last_recordable - self.first_recordable) as usize)
            }
        }
    }

    /// True once the cycle has moved entirely past the window.
    pub fn window_closed(&self, transport_sample: SamplePos) -> bool {
        self.last_recordable != MAX_SAMPLE && transport_sample >= self.last_recordable
    }

    pub fn reset(&mut self) {
        self.first_recordable = MAX_SAMPLE;
        self.last_recordable = MAX_SAMPLE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(transport: SamplePos, nframes: usize, speed: f64, can_record: bool) -> ProcessContext {
        let mut c = ProcessContext::new(transport, nframes, speed, can_record);
        c.worst_output_latency = 512;
        c
    }

    #[test]
    fn test_rec_start_from_stop_existing_material() {
        let mut win = RecordWindow::new();

        // Rec-enabled but transport stopped: nothing yet.
        let change = win.check_record_status(
            &ctx(0, 1024, 0.0, true),
            true,
            AlignStyle::ExistingMaterial,
            128,
            0,
        );
        assert_eq!(change, RecordStatusChange::None);

        // Transport starts at sample 48000; the captured material lands
        // at the first recordable frame.
        let change = win.check_record_status(
            &ctx(48_000, 1024, 1.0, true),
            true,
            AlignStyle::ExistingMaterial,
            128,
            0,
        );
        // capture_offset + worst_output_latency applied.
        assert_eq!(change, RecordStatusChange::Starting(48_000 + 128 + 512));
        assert_eq!(win.first_recordable, 48_000 + 128 + 512);
        assert_eq!(win.last_recordable, MAX_SAMPLE);
    }

    #[test]
    fn test_rec_start_capture_time_uses_roll_delay() {
        let mut win = RecordWindow::new();
        let change = win.check_record_status(
            &ctx(1000, 1024, 1.0, true),
            true,
            AlignStyle::CaptureTime,
            128,
            64,
        );
        assert_eq!(change, RecordStatusChange::Starting(1000 + 128 + 64));
        assert_eq!(win.first_recordable, 1000 + 128 + 64);
    }

    #[test]
    fn test_punch_out_sets_last_recordable() {
        let mut win = RecordWindow::new();
        win.check_record_status(
            &ctx(0, 1024, 1.0, true),
            true,
            AlignStyle::ExistingMaterial,
            128,
            0,
        );

        let change = win.check_record_status(
            &ctx(96_000, 1024, 1.0, true),
            false,
            AlignStyle::ExistingMaterial,
            128,
            0,
        );
        assert_eq!(change, RecordStatusChange::Stopping);
        assert_eq!(win.last_recordable, 96_000 + 128 + 512);
    }

    #[test]
    fn test_manual_punch_backdates_capture_time() {
        let mut win = RecordWindow::new();
        // Rolling without rec first.
        win.check_record_status(&ctx(0, 1024, 1.0, true), false, AlignStyle::CaptureTime, 0, 64);

        // Punch in on the roll, no auto punch configured: the window
        // opens after the roll delay but the region is backdated.
        let change =
            win.check_record_status(&ctx(10_000, 1024, 1.0, true), true, AlignStyle::CaptureTime, 0, 64);
        assert_eq!(change, RecordStatusChange::Starting(10_000));
        assert_eq!(win.first_recordable, 10_064);
    }

    #[test]
    fn test_cycle_overlap_cases() {
        let mut win = RecordWindow::new();
        win.first_recordable = 1_000_000;
        win.last_recordable = 1_001_024;

        // Cycle straddles window start.
        assert_eq!(win.cycle_overlap(999_500, 1024), (500, 524));
        // Cycle entirely inside the window.
        assert_eq!(win.cycle_overlap(1_000_100, 512), (0, 512));
        // Cycle straddles window end.
        assert_eq!(win.cycle_overlap(1_000_900, 512), (0, 124));
        // Cycle misses the window.
        assert_eq!(win.cycle_overlap(999_000, 512), (0, 0));
        assert_eq!(win.cycle_overlap(1_001_024, 512), (0, 0));
        // Window entirely inside one cycle.
        win.first_recordable = 1_000_100;
        win.last_recordable = 1_000_200;
        assert_eq!(win.cycle_overlap(1_000_000, 1024), (100, 100));
    }

    #[test]
    fn test_no_change_without_all_three_factors() {
        let mut win = RecordWindow::new();

        // Rolling but no rec-enable.
        let c = win.check_record_status(
            &ctx(0, 1024, 1.0, true),
            false,
            AlignStyle::ExistingMaterial,
            0,
            0,
        );
        assert_eq!(c, RecordStatusChange::None);

        // Rec-enable but global record off.
        let c = win.check_record_status(
            &ctx(1024, 1024, 1.0, false),
            true,
            AlignStyle::ExistingMaterial,
            0,
            0,
        );
        assert_eq!(c, RecordStatusChange::None);
        assert_eq!(win.first_recordable, MAX_SAMPLE);
    }
}
