//! Synthetic reverb impulse responses.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::buffer::SampleBuffer;

/// Map a 0–100 room size to an impulse length in seconds (0.1–5.0).
pub fn duration_from_size(size: f32) -> f32 {
    0.1 + (size.clamp(0.0, 100.0) / 100.0) * 4.9
}

/// Map a 0–100 damping amount to the envelope exponent (1–10).
pub fn decay_from_damping(damping: f32) -> f32 {
    1.0 + (damping.clamp(0.0, 100.0) / 100.0) * 9.0
}

/// Generates stereo noise bursts with a polynomial decay envelope.
pub struct ReverbImpulseGenerator {
    rng: StdRng,
}

impl ReverbImpulseGenerator {
    pub fn new() -> Self {
        ReverbImpulseGenerator {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible generator for tests and offline renders.
    pub fn seeded(seed: u64) -> Self {
        ReverbImpulseGenerator {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Build a stereo impulse of `duration_s` seconds.
    ///
    /// Each frame is `noise · (1 - n/len)^decay`, written to both channels.
    /// A `width_percent` below 100 then scales the side signal.
    pub fn generate(
        &mut self,
        duration_s: f32,
        decay: f32,
        width_percent: f32,
        sample_rate: u32,
    ) -> SampleBuffer {
        let length = (duration_s.max(0.0) as f64 * sample_rate as f64).floor() as usize;
        let mut left = Vec::with_capacity(length);

        for n in 0..length {
            let envelope = (1.0 - n as f32 / length as f32).powf(decay);
            left.push(self.rng.gen_range(-1.0f32..1.0) * envelope);
        }
        let mut right = left.clone();

        let width = width_percent.clamp(0.0, 100.0);
        if width < 100.0 {
            let scale = width / 100.0;
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                let mid = (*l + *r) / 2.0;
                let side = (*l - *r) / 2.0 * scale;
                *l = mid + side;
                *r = mid - side;
            }
        }

        debug!(length, decay, width, sample_rate, "generated reverb impulse");
        SampleBuffer::new(vec![left, right], sample_rate)
    }
}

impl Default for ReverbImpulseGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_and_damping_mappings() {
        assert!((duration_from_size(0.0) - 0.1).abs() < 1e-6);
        assert!((duration_from_size(100.0) - 5.0).abs() < 1e-5);
        assert!((duration_from_size(50.0) - 2.55).abs() < 1e-5);
        assert!((decay_from_damping(0.0) - 1.0).abs() < 1e-6);
        assert!((decay_from_damping(100.0) - 10.0).abs() < 1e-6);
        assert!((duration_from_size(250.0) - 5.0).abs() < 1e-5, "size is clamped");
    }

    #[test]
    fn short_impulse_shape() {
        let buf = ReverbImpulseGenerator::seeded(7).generate(0.1, 1.0, 100.0, 44100);
        assert_eq!(buf.num_channels(), 2);
        assert_eq!(buf.len(), 4410);
        assert_eq!(buf.sample_rate(), 44100);

        // Envelope factor is 1 at frame 0, so the raw noise draw survives.
        let mut rng = StdRng::seed_from_u64(7);
        let first: f32 = rng.gen_range(-1.0f32..1.0);
        assert_eq!(buf.channel(0)[0], first);

        let last = buf.channel(0)[4409];
        assert!(last.abs() <= 2.0 / 4410.0, "tail should be ~0, got {last}");
    }

    #[test]
    fn full_width_leaves_channels_untouched() {
        let buf = ReverbImpulseGenerator::seeded(11).generate(0.05, 3.0, 100.0, 48000);
        assert_eq!(buf.channel(0), buf.channel(1), "mono-seeded burst");
    }

    #[test]
    fn zero_width_is_mono() {
        let buf = ReverbImpulseGenerator::seeded(3).generate(0.05, 2.0, 0.0, 48000);
        for (l, r) in buf.channel(0).iter().zip(buf.channel(1)) {
            assert_eq!(l, r);
        }
    }

    #[test]
    fn higher_decay_falls_faster() {
        let soft = ReverbImpulseGenerator::seeded(5).generate(0.5, 1.0, 100.0, 8000);
        let steep = ReverbImpulseGenerator::seeded(5).generate(0.5, 10.0, 100.0, 8000);
        let energy = |b: &SampleBuffer| b.channel(0)[2000..].iter().map(|s| s * s).sum::<f32>();
        assert!(energy(&steep) < energy(&soft) * 0.1);
    }

    #[test]
    fn zero_duration_is_empty() {
        let buf = ReverbImpulseGenerator::seeded(1).generate(0.0, 1.0, 100.0, 44100);
        assert!(buf.is_empty());
        assert_eq!(buf.num_channels(), 2);
    }
}
