//! Biquad filter using the WebAudio BiquadFilterNode coefficient formulas.

use std::f64::consts::PI;

/// Filter type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterType {
    Highpass,
    Peaking,
    /// Shelf slope fixed at S = 1.
    LowShelf,
    HighShelf,
}

/// A biquad IIR filter (2nd order).
///
/// Implements the standard Direct Form II Transposed structure.
/// Coefficient formulas from the Audio EQ Cookbook (Robert Bristow-Johnson).
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    filter_type: FilterType,
    frequency: f64,
    q: f64,
    gain_db: f64, // peaking and shelves only

    // Coefficients
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    // State (Direct Form II Transposed)
    z1: f64,
    z2: f64,

    sample_rate: f64,
    dirty: bool,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, sample_rate: f64) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency: 1000.0,
            q: 0.707, // Butterworth
            gain_db: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
            dirty: true,
        };
        f.update_coefficients();
        f
    }

    /// Builder-style constructor for fixed filters.
    pub fn with_params(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        q: f64,
        gain_db: f64,
    ) -> Self {
        let mut f = Self::new(filter_type, sample_rate);
        f.frequency = frequency;
        f.q = q;
        f.gain_db = gain_db;
        f.update_coefficients();
        f
    }

    /// Recompute filter coefficients from current parameters.
    pub fn update_coefficients(&mut self) {
        let nyquist = self.sample_rate / 2.0;
        let frequency = self.frequency.clamp(1.0, nyquist * 0.999);
        let w0 = 2.0 * PI * frequency / self.sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * self.q.max(1e-4));
        let a_lin = 10.0_f64.powf(self.gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            FilterType::Highpass => {
                let b0 = (1.0 + cos_w0) / 2.0;
                let b1 = -(1.0 + cos_w0);
                let b2 = b0;
                let a0 = 1.0 + alpha;
                let a1 = -2.0 * cos_w0;
                let a2 = 1.0 - alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Peaking => {
                let b0 = 1.0 + alpha * a_lin;
                let b1 = -2.0 * cos_w0;
                let b2 = 1.0 - alpha * a_lin;
                let a0 = 1.0 + alpha / a_lin;
                let a1 = -2.0 * cos_w0;
                let a2 = 1.0 - alpha / a_lin;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::LowShelf => {
                let shelf_alpha = sin_w0 / 2.0 * 2.0_f64.sqrt();
                let k = 2.0 * a_lin.sqrt() * shelf_alpha;
                let b0 = a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_w0 + k);
                let b1 = 2.0 * a_lin * ((a_lin - 1.0) - (a_lin + 1.0) * cos_w0);
                let b2 = a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_w0 - k);
                let a0 = (a_lin + 1.0) + (a_lin - 1.0) * cos_w0 + k;
                let a1 = -2.0 * ((a_lin - 1.0) + (a_lin + 1.0) * cos_w0);
                let a2 = (a_lin + 1.0) + (a_lin - 1.0) * cos_w0 - k;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::HighShelf => {
                let shelf_alpha = sin_w0 / 2.0 * 2.0_f64.sqrt();
                let k = 2.0 * a_lin.sqrt() * shelf_alpha;
                let b0 = a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_w0 + k);
                let b1 = -2.0 * a_lin * ((a_lin - 1.0) + (a_lin + 1.0) * cos_w0);
                let b2 = a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_w0 - k);
                let a0 = (a_lin + 1.0) - (a_lin - 1.0) * cos_w0 + k;
                let a1 = 2.0 * ((a_lin - 1.0) - (a_lin + 1.0) * cos_w0);
                let a2 = (a_lin + 1.0) - (a_lin - 1.0) * cos_w0 - k;
                (b0, b1, b2, a0, a1, a2)
            }
        };

        // Normalize by a0
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
        self.dirty = false;
    }

    /// Process a single sample through the filter.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        if self.dirty {
            self.update_coefficients();
        }

        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    /// Filter a block in place.
    pub fn process_block(&mut self, samples: &mut [f32]) {
        for s in samples {
            *s = self.process(*s as f64) as f32;
        }
    }

    /// Reset filter state.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// Set frequency; coefficients are only marked dirty on change.
    pub fn set_frequency(&mut self, freq: f64) {
        if self.frequency != freq {
            self.frequency = freq;
            self.dirty = true;
        }
    }

    pub fn set_q(&mut self, q: f64) {
        if self.q != q {
            self.q = q;
            self.dirty = true;
        }
    }

    pub fn set_gain_db(&mut self, gain_db: f64) {
        if self.gain_db != gain_db {
            self.gain_db = gain_db;
            self.dirty = true;
        }
    }

    /// Switch response shape, keeping the delay state.
    pub fn set_filter_type(&mut self, filter_type: FilterType) {
        if self.filter_type != filter_type {
            self.filter_type = filter_type;
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady_amplitude(f: &mut BiquadFilter, freq: f64, sample_rate: f64) -> f64 {
        let mut max_out = 0.0_f64;
        for i in 0..8820 {
            let t = i as f64 / sample_rate;
            let out = f.process((2.0 * PI * freq * t).sin());
            if i > 4410 {
                // skip transient
                max_out = max_out.max(out.abs());
            }
        }
        max_out
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut f = BiquadFilter::with_params(FilterType::Highpass, 44100.0, 1000.0, 0.707, 0.0);

        let mut output = 0.0;
        for _ in 0..1000 {
            output = f.process(1.0);
        }
        assert!(output.abs() < 0.001, "Highpass should block DC, got {output}");
    }

    #[test]
    fn highpass_attenuates_low_freq() {
        let mut f = BiquadFilter::with_params(FilterType::Highpass, 44100.0, 6000.0, 0.707, 0.0);
        let amp = steady_amplitude(&mut f, 200.0, 44100.0);
        assert!(amp < 0.01, "HPF@6k should strongly attenuate 200Hz, got {amp}");
    }

    #[test]
    fn zero_gain_peaking_is_transparent() {
        let mut f = BiquadFilter::with_params(FilterType::Peaking, 44100.0, 1000.0, 1.4, 0.0);
        for i in 0..500 {
            let x = ((i * 37) % 101) as f64 / 50.0 - 1.0;
            let y = f.process(x);
            assert!((y - x).abs() < 1e-12, "sample {i}: {y} vs {x}");
        }
    }

    #[test]
    fn peaking_boosts_centre() {
        let mut f = BiquadFilter::with_params(FilterType::Peaking, 44100.0, 1000.0, 1.4, 12.0);
        let amp = steady_amplitude(&mut f, 1000.0, 44100.0);
        let expected = 10.0_f64.powf(12.0 / 20.0);
        assert!((amp - expected).abs() < 0.05, "expected ~{expected}, got {amp}");
    }

    #[test]
    fn low_shelf_lifts_dc() {
        let mut f = BiquadFilter::with_params(FilterType::LowShelf, 44100.0, 80.0, 0.707, 6.0);
        let mut output = 0.0;
        for _ in 0..20000 {
            output = f.process(1.0);
        }
        let expected = 10.0_f64.powf(6.0 / 20.0);
        assert!((output - expected).abs() < 0.01, "DC gain {output}, expected {expected}");
    }

    #[test]
    fn high_shelf_lifts_top_not_bottom() {
        let mut f = BiquadFilter::with_params(FilterType::HighShelf, 44100.0, 3500.0, 0.707, 6.0);
        let mut dc = 0.0;
        for _ in 0..5000 {
            dc = f.process(1.0);
        }
        assert!((dc - 1.0).abs() < 0.01, "DC should pass at unity, got {dc}");

        f.reset();
        let amp = steady_amplitude(&mut f, 15000.0, 44100.0);
        assert!(amp > 1.8, "15kHz should be lifted ~6dB, got {amp}");
    }

    #[test]
    fn setters_only_dirty_on_change() {
        let mut f = BiquadFilter::new(FilterType::Peaking, 44100.0);
        f.set_gain_db(0.0);
        assert!(!f.dirty);
        f.set_gain_db(3.0);
        assert!(f.dirty);
    }

    #[test]
    fn filter_output_finite_near_nyquist() {
        let mut f = BiquadFilter::with_params(FilterType::Peaking, 44100.0, 30000.0, 1.4, 40.0);
        for i in 0..10000 {
            let input = if i % 100 == 0 { 1.0 } else { 0.0 };
            let out = f.process(input);
            assert!(out.is_finite(), "Filter output not finite at sample {i}");
        }
    }
}
