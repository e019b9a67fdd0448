//! Destructive ("tape mode") capture source.
//!
//! A destructive source owns a fixed region of a file and overwrites it
//! in place. Each punch is blended with the existing material over a
//! short equal-power crossfade so repeated passes never leave clicks at
//! the punch points.
//!
//! The backing file is raw 32-bit float WAV written with positioned I/O;
//! an append-only writer cannot express in-place rewrites.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tapedeck_core::{SamplePos, SourceId};

const WAV_HEADER_LEN: u64 = 44;

/// Precomputed equal-power fade curves, shared by every destructive
/// source in a session.
pub struct XfadeCurves {
    frames: usize,
    fade_in: Vec<f32>,
    fade_out: Vec<f32>,
}

impl XfadeCurves {
    /// Build curves of `frames` length. `fade_in[i]^2 + fade_out[i]^2 == 1`
    /// for every sample, so crossfaded material keeps constant power.
    pub fn standard(frames: usize) -> Arc<XfadeCurves> {
        let (fade_in, fade_out) = compute_equal_power_fades(frames);
        Arc::new(XfadeCurves {
            frames,
            fade_in,
            fade_out,
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn fade_in(&self) -> &[f32] {
        &self.fade_in
    }

    pub fn fade_out(&self) -> &[f32] {
        &self.fade_out
    }
}

pub(crate) fn compute_equal_power_fades(frames: usize) -> (Vec<f32>, Vec<f32>) {
    let mut fade_in = Vec::with_capacity(frames);
    let mut fade_out = Vec::with_capacity(frames);
    for i in 0..frames {
        let t = i as f32 / frames as f32;
        fade_in.push(t.sqrt());
        fade_out.push((1.0 - t).sqrt());
    }
    (fade_in, fade_out)
}

struct WriteCursor {
    file_pos: SamplePos,
    capture_start: bool,
    capture_end: bool,
    capture_start_frame: SamplePos,
}

pub struct DestructiveSource {
    id: SourceId,
    name: String,
    path: PathBuf,
    sample_rate: f64,
    /// Timeline sample corresponding to file offset zero.
    timeline_position: SamplePos,
    file: Mutex<File>,
    cursor: Mutex<WriteCursor>,
    length: AtomicI64,
    use_count: AtomicU32,
    curves: Arc<XfadeCurves>,
}

impl DestructiveSource {
    pub fn create(
        id: SourceId,
        name: &str,
        path: &Path,
        sample_rate: f64,
        timeline_position: SamplePos,
        curves: Arc<XfadeCurves>,
    ) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        write_wav_header(&mut file, sample_rate as u32, 0)?;

        Ok(Self {
            id,
            name: name.to_owned(),
            path: path.to_owned(),
            sample_rate,
            timeline_position,
            file: Mutex::new(file),
            cursor: Mutex::new(WriteCursor {
                file_pos: 0,
                capture_start: false,
                capture_end: false,
                capture_start_frame: 0,
            }),
            length: AtomicI64::new(0),
            use_count: AtomicU32::new(0),
            curves,
        })
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn length(&self) -> i64 {
        self.length.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn timeline_position(&self) -> SamplePos {
        self.timeline_position
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

    /// Arm a fade-in at timeline sample `pos`.
    ///
    /// A position before the source's own origin cannot be punched; the
    /// mark is dropped in that case.
    pub fn mark_capture_start(&self, pos: SamplePos) {
        let mut cursor = self.cursor.lock();
        if pos < self.timeline_position {
            cursor.capture_start = false;
        } else {
            cursor.capture_start = true;
            cursor.capture_start_frame = pos;
        }
    }

    /// Arm a fade-out inside the next write.
    pub fn mark_capture_end(&self) {
        self.cursor.lock().capture_end = true;
    }

    pub fn clear_capture_marks(&self) {
        let mut cursor = self.cursor.lock();
        cursor.capture_start = false;
        cursor.capture_end = false;
    }

    pub fn last_capture_start_frame(&self) -> SamplePos {
        self.cursor.lock().capture_start_frame
    }

    /// Write a block at the current cursor, applying any armed fades.
    /// Returns frames written.
    pub fn write(&self, data: &[f32]) -> Result<usize> {
        let mut cursor = self.cursor.lock();
        let cnt = data.len();

        if cursor.capture_start && cursor.capture_end {
            // Punch fits inside this one block: fade in over the first
            // half, fade out over the second.
            cursor.capture_start = false;
            cursor.capture_end = false;
            cursor.file_pos = cursor.capture_start_frame - self.timeline_position;

            let half = cnt / 2;
            let origin = cursor.file_pos;

            self.crossfade(&mut cursor, &data[..half], true)?;
            cursor.file_pos += half as SamplePos;
            self.crossfade(&mut cursor, &data[half..], false)?;
            cursor.file_pos = origin;
        } else if cursor.capture_start {
            cursor.capture_start = false;
            cursor.capture_end = false;
            cursor.file_pos = cursor.capture_start_frame - self.timeline_position;
            self.crossfade(&mut cursor, data, true)?;
        } else if cursor.capture_end {
            cursor.capture_start = false;
            cursor.capture_end = false;
            self.crossfade(&mut cursor, data, false)?;
        } else {
            self.write_frames(data, cursor.file_pos)?;
        }

        let end = cursor.file_pos + cnt as SamplePos;
        self.length.fetch_max(end, Ordering::AcqRel);
        cursor.file_pos = end;
        Ok(cnt)
    }

    /// Blend `data` with the existing material.
    ///
    /// For a fade-in the crossfade covers the head of the block and the
    /// tail is written straight; for a fade-out the other way round.
    fn crossfade(&self, cursor: &mut WriteCursor, data: &[f32], fade_in: bool) -> Result<()> {
        let cnt = data.len();
        let xfade = self.curves.frames().min(cnt);
        let nofade = cnt - xfade;

        let (fade_position, fade_data) = if fade_in {
            (cursor.file_pos, &data[..xfade])
        } else {
            (cursor.file_pos + nofade as SamplePos, &data[nofade..])
        };

        // Existing material under the fade window; zero where the file
        // has not been written yet.
        let mut existing = vec![0.0f32; xfade];
        let length = self.length();
        if fade_position < length {
            let readable = ((length - fade_position) as usize).min(xfade);
            self.read_frames(&mut existing[..readable], fade_position)?;
        }

        if !fade_in && nofade > 0 {
            self.write_frames(&data[..nofade], cursor.file_pos)?;
        }

        let mixed: Vec<f32> = if xfade == self.curves.frames() {
            let (fi, fo) = (self.curves.fade_in(), self.curves.fade_out());
            mix_fade(&existing, fade_data, fi, fo, fade_in)
        } else if xfade > 0 {
            // Short fade at a block edge: compute a one-off curve.
            let (fi, fo) = compute_equal_power_fades(xfade);
            mix_fade(&existing, fade_data, &fi, &fo, fade_in)
        } else {
            Vec::new()
        };

        if !mixed.is_empty() {
            self.write_frames(&mixed, fade_position)?;
        }

        if fade_in && nofade > 0 {
            self.write_frames(&data[xfade..], cursor.file_pos + xfade as SamplePos)?;
        }

        Ok(())
    }

    fn write_frames(&self, data: &[f32], pos: SamplePos) -> Result<()> {
        if pos < 0 {
            return Err(Error::Io(std::io::Error::other(
                "write before start of destructive source",
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(WAV_HEADER_LEN + pos as u64 * 4))?;
        let mut bytes = Vec::with_capacity(data.len() * 4);
        for &sample in data {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        file.write_all(&bytes)?;
        Ok(())
    }

    fn read_frames(&self, buf: &mut [f32], pos: SamplePos) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(WAV_HEADER_LEN + pos as u64 * 4))?;
        let mut bytes = vec![0u8; buf.len() * 4];
        file.read_exact(&mut bytes)?;
        for (sample, chunk) in buf.iter_mut().zip(bytes.chunks_exact(4)) {
            *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    /// Read frames starting at file offset `pos`.
    pub fn read(&self, buf: &mut [f32], pos: SamplePos) -> Result<usize> {
        if pos < 0 {
            return Ok(0);
        }
        let length = self.length();
        if pos >= length {
            return Ok(0);
        }
        let want = buf.len().min((length - pos) as usize);
        self.read_frames(&mut buf[..want], pos)?;
        Ok(want)
    }

    /// Rewrite the header with the final data size and flush.
    pub fn mark_streaming_write_completed(&self) -> Result<()> {
        let frames = self.length() as u32;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        write_wav_header(&mut *file, self.sample_rate as u32, frames)?;
        file.flush()?;
        Ok(())
    }

    pub fn remove_file(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn write_wav_header(file: &mut File, sample_rate: u32, frames: u32) -> std::io::Result<()> {
    let data_bytes = frames * 4;
    let mut header = Vec::with_capacity(WAV_HEADER_LEN as usize);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(36 + data_bytes).to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&3u16.to_le_bytes()); // IEEE float
    header.extend_from_slice(&1u16.to_le_bytes()); // mono
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&(sample_rate * 4).to_le_bytes());
    header.extend_from_slice(&4u16.to_le_bytes());
    header.extend_from_slice(&32u16.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_bytes.to_le_bytes());
    file.write_all(&header)
}

fn mix_fade(
    existing: &[f32],
    incoming: &[f32],
    fade_in_curve: &[f32],
    fade_out_curve: &[f32],
    fade_in: bool,
) -> Vec<f32> {
    existing
        .iter()
        .zip(incoming)
        .enumerate()
        .map(|(n, (&old, &new))| {
            if fade_in {
                old * fade_out_curve[n] + new * fade_in_curve[n]
            } else {
                old * fade_in_curve[n] + new * fade_out_curve[n]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const XFADE: usize = 64;

    fn make_source(dir: &tempfile::TempDir) -> DestructiveSource {
        DestructiveSource::create(
            SourceId(1),
            "tape-1",
            &dir.path().join("tape-1.wav"),
            48000.0,
            0,
            XfadeCurves::standard(XFADE),
        )
        .unwrap()
    }

    #[test]
    fn test_equal_power_curves() {
        let curves = XfadeCurves::standard(256);
        for i in 0..256 {
            let power = curves.fade_in()[i].powi(2) + curves.fade_out()[i].powi(2);
            approx::assert_abs_diff_eq!(power, 1.0, epsilon = 1e-5);
        }
        assert_eq!(curves.fade_in()[0], 0.0);
        assert_eq!(curves.fade_out()[0], 1.0);
    }

    #[test]
    fn test_first_pass_writes_through() {
        let dir = tempdir().unwrap();
        let src = make_source(&dir);

        // First pass over virgin tape: existing material is silence, so
        // the fade-in blends with zeros.
        src.mark_capture_start(0);
        let block: Vec<f32> = vec![1.0; 512];
        src.write(&block).unwrap();
        assert_eq!(src.length(), 512);

        let mut out = vec![0.0f32; 512];
        src.read(&mut out, 0).unwrap();

        let curves = XfadeCurves::standard(XFADE);
        for i in 0..XFADE {
            assert!((out[i] - curves.fade_in()[i]).abs() < 1e-5, "sample {i}");
        }
        for (i, &sample) in out.iter().enumerate().skip(XFADE) {
            assert!((sample - 1.0).abs() < 1e-6, "sample {i}");
        }
    }

    #[test]
    fn test_punch_crossfades_with_existing() {
        let dir = tempdir().unwrap();
        let src = make_source(&dir);

        // Lay down a known bed.
        let bed: Vec<f32> = vec![0.25; 2048];
        src.write(&bed).unwrap();

        // Punch over the middle of it.
        src.mark_capture_start(1000);
        let take: Vec<f32> = vec![0.75; 512];
        src.write(&take).unwrap();

        let mut out = vec![0.0f32; 512];
        src.read(&mut out, 1000).unwrap();

        let curves = XfadeCurves::standard(XFADE);
        for i in 0..XFADE {
            let expected = 0.25 * curves.fade_out()[i] + 0.75 * curves.fade_in()[i];
            assert!((out[i] - expected).abs() < 1e-5, "fade sample {i}");
        }
        for (i, &sample) in out.iter().enumerate().skip(XFADE) {
            assert!((sample - 0.75).abs() < 1e-6, "body sample {i}");
        }

        // Material before the punch is untouched.
        let mut before = vec![0.0f32; 100];
        src.read(&mut before, 900).unwrap();
        assert!(before.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_capture_end_fades_out() {
        let dir = tempdir().unwrap();
        let src = make_source(&dir);

        let bed: Vec<f32> = vec![0.5; 4096];
        src.write(&bed).unwrap();

        // Second pass: start at 0, end partway through.
        src.mark_capture_start(0);
        src.write(&vec![1.0; 1024]).unwrap();
        src.mark_capture_end();
        src.write(&vec![1.0; 512]).unwrap();

        let mut out = vec![0.0f32; 512];
        src.read(&mut out, 1024).unwrap();

        let curves = XfadeCurves::standard(XFADE);
        // Body of the final block before the fade-out window.
        for (i, &sample) in out.iter().enumerate().take(512 - XFADE) {
            assert!((sample - 1.0).abs() < 1e-6, "body sample {i}");
        }
        // The fade-out window blends back toward the bed.
        for i in 0..XFADE {
            let n = 512 - XFADE + i;
            let expected = 0.5 * curves.fade_in()[i] + 1.0 * curves.fade_out()[i];
            assert!((out[n] - expected).abs() < 1e-5, "fade sample {n}");
        }

        // Past the punch the bed survives.
        let mut after = vec![0.0f32; 256];
        src.read(&mut after, 2000).unwrap();
        assert!(after.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_capture_start_before_origin_is_dropped() {
        let dir = tempdir().unwrap();
        let src = DestructiveSource::create(
            SourceId(2),
            "tape-2",
            &dir.path().join("tape-2.wav"),
            48000.0,
            10_000,
            XfadeCurves::standard(XFADE),
        )
        .unwrap();

        src.mark_capture_start(5_000);
        assert!(!src.cursor.lock().capture_start);

        src.mark_capture_start(12_000);
        assert!(src.cursor.lock().capture_start);
        assert_eq!(src.last_capture_start_frame(), 12_000);
    }

    #[test]
    fn test_header_finalize_readable_by_hound() {
        let dir = tempdir().unwrap();
        let src = make_source(&dir);
        src.write(&vec![0.5; 1000]).unwrap();
        src.mark_streaming_write_completed().unwrap();

        let reader = hound::WavReader::open(dir.path().join("tape-1.wav")).unwrap();
        assert_eq!(reader.duration(), 1000);
        assert_eq!(reader.spec().sample_rate, 48000);
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
    }
}
