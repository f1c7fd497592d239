//! Compressor: dynamics processing for leveling, protection and limiting.
//!
//! Implements a feed-forward compressor with threshold, ratio, knee,
//! attack, and release parameters matching the WebAudio DynamicsCompressorNode.
//! Channels are linked: one envelope follows the loudest channel.

use crate::dsp::block::AudioBlock;

/// Floor used when converting silence to dB.
const SILENCE_DB: f64 = -120.0;

/// A linked multichannel dynamics compressor.
#[derive(Debug, Clone)]
pub struct Compressor {
    sample_rate: f64,

    /// Threshold in dB.
    threshold: f64,
    /// Compression ratio (e.g., 4.0 = 4:1 compression).
    ratio: f64,
    /// Knee width in dB (0 = hard knee, higher = softer transition).
    knee: f64,
    /// Attack time in seconds.
    attack: f64,
    /// Release time in seconds.
    release: f64,

    attack_coef: f64,
    release_coef: f64,

    // Internal state
    envelope: f64, // Current envelope level (linear)
}

impl Compressor {
    /// Create a new compressor with default settings.
    pub fn new(sample_rate: f64) -> Self {
        let mut c = Self {
            sample_rate,
            threshold: -24.0,
            ratio: 12.0,
            knee: 30.0,
            attack: 0.003,
            release: 0.25,
            attack_coef: 0.0,
            release_coef: 0.0,
            envelope: 0.0,
        };
        c.update_coefficients();
        c
    }

    /// Create a compressor with specific parameters.
    pub fn with_params(
        sample_rate: f64,
        threshold: f64,
        ratio: f64,
        knee: f64,
        attack: f64,
        release: f64,
    ) -> Self {
        let mut c = Self::new(sample_rate);
        c.set_params(threshold, ratio, knee, attack, release);
        c
    }

    /// Retune every parameter; envelope coefficients are recomputed only on change.
    pub fn set_params(&mut self, threshold: f64, ratio: f64, knee: f64, attack: f64, release: f64) {
        self.threshold = threshold.clamp(-100.0, 0.0);
        self.ratio = ratio.clamp(1.0, 20.0);
        self.knee = knee.clamp(0.0, 40.0);
        let attack = attack.clamp(0.0, 1.0);
        let release = release.clamp(0.0, 1.0);
        if attack != self.attack || release != self.release {
            self.attack = attack;
            self.release = release;
            self.update_coefficients();
        }
    }

    fn update_coefficients(&mut self) {
        self.attack_coef = time_coefficient(self.attack, self.sample_rate);
        self.release_coef = time_coefficient(self.release, self.sample_rate);
    }

    /// Convert linear amplitude to dB.
    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 0.0 {
            SILENCE_DB
        } else {
            20.0 * linear.log10()
        }
    }

    /// Convert dB to linear amplitude.
    #[inline]
    fn db_to_linear(db: f64) -> f64 {
        10.0_f64.powf(db / 20.0)
    }

    /// Compute gain reduction for a given input level (in dB).
    #[inline]
    fn compute_gain(&self, input_db: f64) -> f64 {
        let threshold = self.threshold;
        let slope = 1.0 - 1.0 / self.ratio;
        let knee = self.knee;

        if knee <= 0.0 {
            // Hard knee
            if input_db <= threshold {
                0.0
            } else {
                (threshold - input_db) * slope
            }
        } else {
            // Soft knee
            let half_knee = knee / 2.0;
            let knee_start = threshold - half_knee;
            let knee_end = threshold + half_knee;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold - input_db) * slope
            } else {
                // In the knee region - quadratic interpolation
                let x = input_db - knee_start;
                -slope * x * x / (2.0 * knee)
            }
        }
    }

    /// True when the settings cannot change the signal.
    #[inline]
    pub fn is_transparent(&self) -> bool {
        self.ratio <= 1.0
    }

    /// Advance the envelope by one frame and return the gain to apply.
    #[inline]
    pub fn process_frame(&mut self, input_level: f64) -> f32 {
        // Envelope follower (peak detection with attack/release)
        let coef = if input_level > self.envelope {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * input_level;

        let gain_reduction_db = self.compute_gain(Self::linear_to_db(self.envelope));
        Self::db_to_linear(gain_reduction_db) as f32
    }

    /// Process a block in place, one shared gain per frame.
    pub fn process_block(&mut self, block: &mut AudioBlock) {
        let channels = block.num_channels();
        for i in 0..block.frames() {
            let level = (0..channels)
                .map(|c| block.channel(c)[i].abs())
                .fold(0.0f32, f32::max) as f64;
            let gain = self.process_frame(level);
            if self.is_transparent() {
                continue;
            }
            for c in 0..channels {
                block.channel_mut(c)[i] *= gain;
            }
        }
    }

    /// Reset the compressor state.
    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

/// One-pole smoothing coefficient for a time constant; zero time follows instantly.
fn time_coefficient(seconds: f64, sample_rate: f64) -> f64 {
    if seconds <= 0.0 {
        0.0
    } else {
        (-1.0 / (seconds * sample_rate)).exp()
    }
}
