//! Immutable multichannel sample storage shared by decoders, generators, and stages.

/// A block of planar audio, one `Vec<f32>` per channel, all of equal length.
///
/// Buffers are never mutated once built; a stage that wants different audio
/// receives a whole new buffer and drops the old one.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Build a buffer from planar channel data.
    ///
    /// Channels longer than the shortest one are cut down so every channel
    /// has the same frame count.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for ch in &mut channels {
            ch.truncate(frames);
        }
        SampleBuffer {
            channels,
            sample_rate,
        }
    }

    /// Single-channel buffer.
    pub fn mono(data: Vec<f32>, sample_rate: u32) -> Self {
        SampleBuffer::new(vec![data], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Read a sample with linear interpolation at a fractional position.
    pub fn read_interpolated(&self, channel: usize, position: f64) -> f32 {
        let data = &self.channels[channel];
        if data.is_empty() || position < 0.0 {
            return 0.0;
        }

        let idx = position as usize;
        if idx >= data.len() - 1 {
            return if idx < data.len() { data[idx] } else { 0.0 };
        }

        let frac = (position - idx as f64) as f32;
        data[idx] * (1.0 - frac) + data[idx + 1] * frac
    }

    fn needs_resampling(&self, target_rate: u32) -> bool {
        target_rate != self.sample_rate && self.sample_rate != 0 && !self.is_empty()
    }

    /// Frame count [`Self::resampled`] would produce, without allocating.
    pub fn resampled_len(&self, target_rate: u32) -> usize {
        if !self.needs_resampling(target_rate) {
            return self.len();
        }
        let ratio = self.sample_rate as f64 / target_rate as f64;
        ((self.len() as f64) / ratio).round().max(1.0) as usize
    }

    /// Resample every channel to `target_rate` by linear interpolation.
    ///
    /// Returns a clone when the rates already match. Check
    /// [`Self::resampled_len`] first when the source rate is untrusted.
    pub fn resampled(&self, target_rate: u32) -> SampleBuffer {
        if !self.needs_resampling(target_rate) {
            return self.clone();
        }

        let ratio = self.sample_rate as f64 / target_rate as f64;
        let frames = self.resampled_len(target_rate);
        let channels = (0..self.num_channels())
            .map(|c| {
                (0..frames)
                    .map(|i| self.read_interpolated(c, i as f64 * ratio))
                    .collect()
            })
            .collect();
        SampleBuffer::new(channels, target_rate)
    }
}
