//! Transient (onset) detection via half-wave rectified spectral flux.

use crate::analyser::Analysable;
use rustfft::{num_complex::Complex, FftPlanner};

const FFT_SIZE: usize = 1024;
const HOP_SIZE: usize = 512;

/// Frames of source audio pulled per read while scanning a source.
const READ_CHUNK: usize = 64 * 1024;

/// Detects onsets in audio material.
///
/// Each analysis frame is Hann-windowed and transformed; the detection
/// function is the sum of positive magnitude differences against the
/// previous frame. Peaks above an adaptive threshold become transients,
/// thinned to a minimum gap.
pub struct TransientDetector {
    sample_rate: f64,
    threshold: f32,
    sensitivity: f32,
    min_gap: usize,
    planner: FftPlanner<f32>,
    window: Vec<f32>,
    prev_magnitudes: Vec<f32>,
}

impl TransientDetector {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            threshold: 0.3,
            sensitivity: 1.0,
            min_gap: (sample_rate * 0.05) as usize,
            planner: FftPlanner::new(),
            window: hann(FFT_SIZE),
            prev_magnitudes: vec![0.0; FFT_SIZE / 2],
        }
    }

    /// General-purpose sensitivity scale; higher finds more onsets.
    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity.clamp(0.1, 10.0);
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.prev_magnitudes.fill(0.0);
    }

    /// Detect onsets in a block of samples. Returned positions are
    /// relative to the start of `samples`.
    pub fn detect(&mut self, samples: &[f32]) -> Vec<i64> {
        if samples.len() < FFT_SIZE {
            return Vec::new();
        }

        let num_frames = (samples.len() - FFT_SIZE) / HOP_SIZE + 1;
        let mut detection: Vec<(usize, f32)> = Vec::with_capacity(num_frames);

        for frame_idx in 0..num_frames {
            let start = frame_idx * HOP_SIZE;
            let flux = self.spectral_flux(&samples[start..start + FFT_SIZE]);
            detection.push((start, flux));
        }

        self.pick_peaks(&detection)
    }

    /// Scan an entire source in chunks, overlapping reads by one frame so
    /// no onset is lost at a chunk seam.
    pub fn run(&mut self, src: &dyn Analysable) -> std::io::Result<Vec<i64>> {
        self.reset();

        let length = src.length_samples();
        let mut transients: Vec<i64> = Vec::new();
        let mut buf = vec![0.0f32; READ_CHUNK];
        let mut pos: i64 = 0;

        while pos < length {
            let got = src.read_at(&mut buf, pos)?;
            if got < FFT_SIZE {
                break;
            }
            for onset in self.detect(&buf[..got]) {
                let absolute = pos + onset;
                if transients
                    .last()
                    .map_or(true, |&last| absolute >= last + self.min_gap as i64)
                {
                    transients.push(absolute);
                }
            }
            pos += (got - (FFT_SIZE - HOP_SIZE)) as i64;
        }

        Ok(transients)
    }

    fn spectral_flux(&mut self, frame: &[f32]) -> f32 {
        let mut buffer: Vec<Complex<f32>> = frame
            .iter()
            .zip(self.window.iter())
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();

        let fft = self.planner.plan_fft_forward(FFT_SIZE);
        fft.process(&mut buffer);

        let mut flux = 0.0;
        for (prev, c) in self.prev_magnitudes.iter_mut().zip(&buffer[..FFT_SIZE / 2]) {
            let mag = c.norm();
            let diff = mag - *prev;
            if diff > 0.0 {
                flux += diff;
            }
            *prev = mag;
        }

        flux * self.sensitivity
    }

    fn pick_peaks(&self, detection: &[(usize, f32)]) -> Vec<i64> {
        if detection.len() < 3 {
            return Vec::new();
        }

        let len = detection.len() as f32;
        let (sum, sum_sq, max_val) =
            detection
                .iter()
                .fold((0.0f32, 0.0f32, 0.0f32), |(s, sq, mx), &(_, v)| {
                    (s + v, sq + v * v, mx.max(v))
                });
        let mean = sum / len;
        let std_dev = (sum_sq / len - mean * mean).max(0.0).sqrt();
        let adaptive = mean + std_dev * self.threshold * 3.0;

        if max_val <= 0.0 {
            return Vec::new();
        }

        let mut onsets = Vec::new();
        let mut last: Option<usize> = None;
        for w in detection.windows(3) {
            let (pos, val) = w[1];
            if val > w[0].1 && val > w[2].1 && val > adaptive {
                if last.map_or(true, |l| pos >= l + self.min_gap) {
                    onsets.push(pos as i64);
                    last = Some(pos);
                }
            }
        }
        onsets
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

fn hann(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let angle = 2.0 * core::f32::consts::PI * i as f32 / (size - 1) as f32;
            0.5 * (1.0 - angle.cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_signal(sample_rate: f64, duration: f64, click_times: &[f64]) -> Vec<f32> {
        let num_samples = (sample_rate * duration) as usize;
        let mut samples = vec![0.0f32; num_samples];
        for &time in click_times {
            let pos = (time * sample_rate) as usize;
            for i in 0..60.min(num_samples.saturating_sub(pos)) {
                samples[pos + i] += (-0.1 * i as f32).exp() * 0.8;
            }
        }
        samples
    }

    #[test]
    fn test_detects_clicks() {
        let sample_rate = 48000.0;
        let samples = click_signal(sample_rate, 1.0, &[0.2, 0.5, 0.8]);

        let mut detector = TransientDetector::new(sample_rate);
        detector.set_threshold(0.2);
        detector.set_sensitivity(2.0);

        let onsets = detector.detect(&samples);
        assert!(!onsets.is_empty());
        for &pos in &onsets {
            assert!(pos >= 0 && (pos as usize) < samples.len());
        }
    }

    #[test]
    fn test_silence_has_no_onsets() {
        let mut detector = TransientDetector::new(48000.0);
        let silence = vec![0.0f32; 48000];
        assert!(detector.detect(&silence).is_empty());
    }

    #[test]
    fn test_min_gap_thins_doubles() {
        let sample_rate = 48000.0;
        // Two clicks 10ms apart, well under the 50ms minimum gap.
        let samples = click_signal(sample_rate, 0.5, &[0.2, 0.21]);

        let mut detector = TransientDetector::new(sample_rate);
        detector.set_threshold(0.1);
        detector.set_sensitivity(3.0);

        let onsets = detector.detect(&samples);
        for pair in onsets.windows(2) {
            assert!(pair[1] - pair[0] >= (sample_rate * 0.05) as i64);
        }
    }

    #[test]
    fn test_short_input_is_empty() {
        let mut detector = TransientDetector::new(48000.0);
        assert!(detector.detect(&[0.0; 100]).is_empty());
    }
}
