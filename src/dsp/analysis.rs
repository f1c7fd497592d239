//! Analysis tap: a non-destructive monitoring point for level and spectrum.
//!
//! The render side pushes a mono mix into a shared ring and only ever
//! `try_lock`s it, skipping a quantum when a reader holds the lock. The
//! control side computes spectra from a snapshot of that ring.

use std::f32::consts::PI;
use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::dsp::block::AudioBlock;

/// Temporal smoothing between successive spectra.
pub const SMOOTHING_TIME_CONSTANT: f32 = 0.8;
/// Reported floor for silent bins.
pub const MIN_DECIBELS: f32 = -100.0;

#[derive(Debug)]
struct AnalysisRing {
    samples: Vec<f32>,
    write_pos: usize,
}

impl AnalysisRing {
    /// Copy out the ring oldest-first.
    fn snapshot_into(&self, out: &mut [f32]) {
        let (newer, older) = self.samples.split_at(self.write_pos);
        out[..older.len()].copy_from_slice(older);
        out[older.len()..].copy_from_slice(newer);
    }
}

/// Render-side handle.
#[derive(Debug, Clone)]
pub struct AnalysisWriter {
    ring: Arc<Mutex<AnalysisRing>>,
}

impl AnalysisWriter {
    /// Append the channel average of `block`; skipped if a reader holds the ring.
    pub fn write(&self, block: &AudioBlock) {
        let Some(mut ring) = self.ring.try_lock() else {
            return;
        };
        let channels = block.num_channels();
        if channels == 0 {
            return;
        }
        let scale = 1.0 / channels as f32;
        let len = ring.samples.len();
        for i in 0..block.frames() {
            let mut sum = 0.0;
            for c in 0..channels {
                sum += block.channel(c)[i];
            }
            let pos = ring.write_pos;
            ring.samples[pos] = sum * scale;
            ring.write_pos = (pos + 1) % len;
        }
    }
}

/// Control-side handle producing visualizer data.
pub struct AnalysisReader {
    ring: Arc<Mutex<AnalysisRing>>,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    snapshot: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

/// Create a connected writer/reader pair over `fft_size` samples.
pub fn analysis_tap(fft_size: usize) -> (AnalysisWriter, AnalysisReader) {
    let fft_size = fft_size.max(32).next_power_of_two();
    let ring = Arc::new(Mutex::new(AnalysisRing {
        samples: vec![0.0; fft_size],
        write_pos: 0,
    }));

    let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
    let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

    let reader = AnalysisReader {
        ring: Arc::clone(&ring),
        fft,
        window: blackman_window(fft_size),
        snapshot: vec![0.0; fft_size],
        spectrum: vec![Complex::default(); fft_size],
        scratch,
        smoothed: vec![0.0; fft_size / 2],
    };
    (AnalysisWriter { ring }, reader)
}

fn blackman_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = i as f32 / n;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

impl AnalysisReader {
    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size() / 2
    }

    fn take_snapshot(&mut self) {
        self.ring.lock().snapshot_into(&mut self.snapshot);
    }

    /// Smoothed magnitude spectrum in dB, one value per bin.
    pub fn frequency_data(&mut self) -> Vec<f32> {
        self.take_snapshot();

        for ((bin, &s), &w) in self.spectrum.iter_mut().zip(&self.snapshot).zip(&self.window) {
            *bin = Complex::new(s * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let norm = 1.0 / self.fft_size() as f32;
        self.smoothed
            .iter_mut()
            .zip(&self.spectrum)
            .map(|(prev, bin)| {
                let magnitude = bin.norm() * norm;
                *prev = SMOOTHING_TIME_CONSTANT * *prev
                    + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;
                if *prev > 0.0 {
                    (20.0 * prev.log10()).max(MIN_DECIBELS)
                } else {
                    MIN_DECIBELS
                }
            })
            .collect()
    }

    /// Most recent `fft_size` samples, oldest first.
    pub fn time_domain_data(&mut self) -> Vec<f32> {
        self.take_snapshot();
        self.snapshot.clone()
    }

    /// Largest absolute sample in the window.
    pub fn peak(&mut self) -> f32 {
        self.take_snapshot();
        self.snapshot.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    pub fn rms(&mut self) -> f32 {
        self.take_snapshot();
        let energy: f32 = self.snapshot.iter().map(|s| s * s).sum();
        (energy / self.snapshot.len() as f32).sqrt()
    }
}

impl std::fmt::Debug for AnalysisReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisReader")
            .field("fft_size", &self.fft_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_block(freq: f32, sample_rate: f32, offset: usize, frames: usize) -> AudioBlock {
        let mut block = AudioBlock::new(2, frames);
        for c in 0..2 {
            for (i, s) in block.channel_mut(c).iter_mut().enumerate() {
                *s = (2.0 * PI * freq * (offset + i) as f32 / sample_rate).sin();
            }
        }
        block
    }

    #[test]
    fn fft_size_rounds_to_power_of_two() {
        let (_, reader) = analysis_tap(1000);
        assert_eq!(reader.fft_size(), 1024);
        assert_eq!(reader.frequency_bin_count(), 512);
    }

    #[test]
    fn silence_reports_floor() {
        let (_, mut reader) = analysis_tap(256);
        assert!(reader.frequency_data().iter().all(|&db| db == MIN_DECIBELS));
        assert_eq!(reader.peak(), 0.0);
    }

    #[test]
    fn sine_peaks_in_its_bin() {
        let (writer, mut reader) = analysis_tap(2048);
        // Bin 64 of 2048 at 44.1k
        let freq = 64.0 * 44100.0 / 2048.0;
        for q in 0..16 {
            writer.write(&sine_block(freq, 44100.0, q * 128, 128));
        }
        let mut spectrum = Vec::new();
        for _ in 0..30 {
            spectrum = reader.frequency_data();
        }
        let loudest = spectrum
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &db)| if db > best.1 { (i, db) } else { best })
            .0;
        assert_eq!(loudest, 64);
    }

    #[test]
    fn levels_follow_the_signal() {
        let (writer, mut reader) = analysis_tap(256);
        let mut block = AudioBlock::new(2, 256);
        block.channel_mut(0).fill(0.5);
        block.channel_mut(1).fill(-0.5);
        writer.write(&block);
        assert_eq!(reader.peak(), 0.0, "channel average cancels");

        block.channel_mut(1).fill(0.5);
        writer.write(&block);
        assert!((reader.peak() - 0.5).abs() < 1e-6);
        assert!((reader.rms() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn time_domain_is_oldest_first() {
        let (writer, mut reader) = analysis_tap(32);
        let mut block = AudioBlock::new(1, 40);
        for (i, s) in block.channel_mut(0).iter_mut().enumerate() {
            *s = i as f32;
        }
        writer.write(&block);
        let data = reader.time_domain_data();
        assert_eq!(data.len(), 32);
        assert_eq!(data[0], 8.0);
        assert_eq!(data[31], 39.0);
    }

    #[test]
    fn writer_skips_when_reader_holds_lock() {
        let (writer, reader) = analysis_tap(32);
        let guard = reader.ring.lock();
        let mut block = AudioBlock::new(1, 4);
        block.fill(1.0);
        writer.write(&block);
        drop(guard);
        assert!(reader.ring.lock().samples.iter().all(|&s| s == 0.0));
    }
}
