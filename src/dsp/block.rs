//! Fixed-capacity planar audio block reused across render quanta.

/// Planar buffers sized once at engine construction.
///
/// Only the first `frames` samples of each channel are live; the render
/// path changes `frames` per quantum but never reallocates.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl AudioBlock {
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        AudioBlock {
            channels: vec![vec![0.0; capacity]; num_channels],
            frames: capacity,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn capacity(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Set the live frame count, capped at capacity.
    pub fn set_frames(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity());
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index][..self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        let frames = self.frames;
        &mut self.channels[index][..frames]
    }

    /// Copy the live region of `other`, adopting its frame count.
    pub fn copy_from(&mut self, other: &AudioBlock) {
        self.set_frames(other.frames);
        let frames = self.frames;
        for (dst, src) in self.channels.iter_mut().zip(&other.channels) {
            dst[..frames].copy_from_slice(&src[..frames]);
        }
    }

    pub fn fill(&mut self, value: f32) {
        let frames = self.frames;
        for ch in &mut self.channels {
            ch[..frames].fill(value);
        }
    }

    /// Multiply every live sample by `gain`.
    pub fn scale(&mut self, gain: f32) {
        if gain == 1.0 {
            return;
        }
        let frames = self.frames;
        for ch in &mut self.channels {
            for s in &mut ch[..frames] {
                *s *= gain;
            }
        }
    }

    /// `self = self·dry + wet·wet_gain`, the wet/dry summing node.
    pub fn mix_in(&mut self, dry_gain: f32, wet: &AudioBlock, wet_gain: f32) {
        let frames = self.frames;
        for (dst, src) in self.channels.iter_mut().zip(&wet.channels) {
            for (d, &w) in dst[..frames].iter_mut().zip(&src[..frames]) {
                *d = *d * dry_gain + w * wet_gain;
            }
        }
    }
}
