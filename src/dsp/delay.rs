//! Single-channel delay line with fractional read position.

/// Longest delay the surround stage can request, in seconds.
pub const MAX_DELAY_SECONDS: f64 = 0.5;

/// A circular delay buffer read with linear interpolation.
///
/// The buffer holds up to `max_delay_seconds` of audio at the given sample
/// rate. The delay time is passed per sample so callers can ramp it.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
}

impl DelayLine {
    /// Create a new delay line.
    ///
    /// # Arguments
    /// - `sample_rate`: Audio sample rate in Hz.
    /// - `max_delay_seconds`: Maximum supported delay time.
    pub fn new(sample_rate: f64, max_delay_seconds: f64) -> Self {
        // Two guard samples for the interpolation neighbour
        let buffer_size = (sample_rate * max_delay_seconds).ceil() as usize + 2;
        Self {
            buffer: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
        }
    }

    /// Longest delay this line can produce, in seconds.
    pub fn max_delay(&self) -> f64 {
        (self.buffer.len() - 2) as f64 / self.sample_rate
    }

    /// Push one sample and read the sample `delay_seconds` behind it.
    ///
    /// A delay of zero returns the input unchanged.
    #[inline]
    pub fn process(&mut self, input: f32, delay_seconds: f64) -> f32 {
        let len = self.buffer.len();
        self.buffer[self.write_pos] = input;

        let delay = (delay_seconds * self.sample_rate).clamp(0.0, (len - 2) as f64);
        let whole = delay as usize;
        let frac = (delay - whole as f64) as f32;

        let idx0 = (self.write_pos + len - whole) % len;
        let idx1 = (idx0 + len - 1) % len;
        let out = if frac == 0.0 {
            self.buffer[idx0]
        } else {
            self.buffer[idx0] * (1.0 - frac) + self.buffer[idx1] * frac
        };

        self.write_pos = (self.write_pos + 1) % len;
        out
    }

    /// Clear the delay buffer.
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_passes_through() {
        let mut delay = DelayLine::new(44100.0, MAX_DELAY_SECONDS);
        for x in [0.5, -0.25, 1.0] {
            assert_eq!(delay.process(x, 0.0), x);
        }
    }

    #[test]
    fn test_delay_outputs_delayed_signal() {
        let sample_rate = 44100.0;
        let delay_time = 0.01; // 10ms = 441 samples
        let mut delay = DelayLine::new(sample_rate, 1.0);

        assert_eq!(delay.process(1.0, delay_time), 0.0);
        let delay_samples = (delay_time * sample_rate).round() as usize;
        for _ in 1..delay_samples {
            let out = delay.process(0.0, delay_time);
            assert!(out.abs() < 1e-6);
        }

        let out = delay.process(0.0, delay_time);
        assert!((out - 1.0).abs() < 1e-4, "impulse should arrive at 441, got {out}");
    }

    #[test]
    fn fractional_delay_interpolates() {
        let mut delay = DelayLine::new(1000.0, 0.1);
        delay.process(1.0, 0.0015);
        let a = delay.process(0.0, 0.0015);
        let b = delay.process(0.0, 0.0015);
        assert!((a - 0.5).abs() < 1e-6, "1.5 samples splits the impulse: {a}");
        assert!((b - 0.5).abs() < 1e-6, "{b}");
    }

    #[test]
    fn delay_is_capped_at_maximum() {
        let mut delay = DelayLine::new(1000.0, 0.01);
        assert!(delay.max_delay() >= 0.01 && delay.max_delay() < 0.012);
        delay.process(1.0, 5.0);
        let mut hits = 0;
        for _ in 0..30 {
            if delay.process(0.0, 5.0) > 0.5 {
                hits += 1;
            }
        }
        assert_eq!(hits, 1, "impulse must come back exactly once");
    }

    #[test]
    fn clear_silences_history() {
        let mut delay = DelayLine::new(1000.0, 0.01);
        delay.process(1.0, 0.0);
        delay.clear();
        for _ in 0..12 {
            assert_eq!(delay.process(0.0, 0.005), 0.0);
        }
    }
}
