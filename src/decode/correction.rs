//! Headphone correction filter (DDC) coefficient container.
//!
//! Layout, all little-endian:
//!
//! | offset | size | field                                        |
//! |--------|------|----------------------------------------------|
//! | 0      | 4    | magic `DDCF`                                 |
//! | 4      | 4    | version, currently `1`                       |
//! | 8      | 4    | channel count (1..=8)                        |
//! | 12     | 4    | total coefficient count across all channels  |
//! | 16     | 4·n  | `f32` taps, channel-major                    |

use tracing::{debug, warn};

use crate::buffer::SampleBuffer;
use crate::error::DecodeError;

pub const CORRECTION_MAGIC: &[u8; 4] = b"DDCF";
pub const CORRECTION_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 16;

/// Upper bound on declared coefficients; anything above is rejected unread.
pub const MAX_COEFFICIENTS: u32 = 2_000_000;
pub const MAX_CHANNELS: u32 = 8;

/// Parsed correction filter, taps stored channel after channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionFilterData {
    pub channels: u32,
    pub coefficient_count: u32,
    pub coefficients: Vec<f32>,
}

impl CorrectionFilterData {
    /// Taps per channel.
    pub fn taps_per_channel(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.coefficients.len() / self.channels as usize
        }
    }

    /// FIR taps for one channel.
    pub fn channel_taps(&self, channel: usize) -> &[f32] {
        let taps = self.taps_per_channel();
        &self.coefficients[channel * taps..(channel + 1) * taps]
    }

    /// Convert into a planar buffer for a stage carrying `target_channels`.
    ///
    /// Source channels past the target count are dropped.
    pub fn to_sample_buffer(&self, target_channels: usize, sample_rate: u32) -> SampleBuffer {
        let count = (self.channels as usize).min(target_channels);
        let channels = (0..count).map(|c| self.channel_taps(c).to_vec()).collect();
        SampleBuffer::new(channels, sample_rate)
    }

    /// Serialize back into the container layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.coefficients.len() * 4);
        buf.extend_from_slice(CORRECTION_MAGIC);
        buf.extend_from_slice(&CORRECTION_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.channels.to_le_bytes());
        buf.extend_from_slice(&self.coefficient_count.to_le_bytes());
        for c in &self.coefficients {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf
    }
}

pub struct CorrectionFilterDecoder;

impl CorrectionFilterDecoder {
    pub fn decode(bytes: &[u8]) -> Result<CorrectionFilterData, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::MalformedContainer(format!(
                "correction header needs {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if &bytes[..4] != CORRECTION_MAGIC {
            return Err(DecodeError::MalformedContainer(
                "missing DDCF magic".into(),
            ));
        }

        let field = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };
        let version = field(4);
        let channels = field(8);
        let coefficient_count = field(12);

        if version != CORRECTION_VERSION {
            return Err(DecodeError::UnsupportedFormat(format!(
                "correction container version {version}"
            )));
        }
        if coefficient_count > MAX_COEFFICIENTS {
            return Err(DecodeError::AssetTooLarge {
                declared: coefficient_count as u64,
                limit: MAX_COEFFICIENTS as u64,
            });
        }
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(DecodeError::MalformedContainer(format!(
                "{channels} channels declared, expected 1..={MAX_CHANNELS}"
            )));
        }
        if coefficient_count % channels != 0 {
            return Err(DecodeError::MalformedContainer(format!(
                "{coefficient_count} coefficients do not split evenly across {channels} channels"
            )));
        }

        let payload = &bytes[HEADER_LEN..];
        let declared_bytes = coefficient_count as usize * 4;
        let (kept_channels, taps) = if payload.len() < declared_bytes {
            let overrun = DecodeError::BufferOverrun {
                declared: declared_bytes as u64,
                available: payload.len() as u64,
            };
            truncated_layout(
                channels as usize,
                coefficient_count as usize,
                payload.len() / 4,
                &overrun,
            )
        } else {
            (channels as usize, (coefficient_count / channels) as usize)
        };

        // Channel-major: the kept channels are one contiguous prefix.
        let coefficients: Vec<f32> = payload[..kept_channels * taps * 4]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        debug!(
            channels = kept_channels,
            declared = coefficient_count,
            decoded = coefficients.len(),
            "decoded correction filter"
        );
        Ok(CorrectionFilterData {
            channels: kept_channels as u32,
            coefficient_count: coefficients.len() as u32,
            coefficients,
        })
    }
}

/// Channels and taps per channel kept from a short channel-major payload.
///
/// Only channels whose taps are all present survive. If even the first one is
/// cut short, it alone is kept with the taps that did arrive.
fn truncated_layout(
    channels: usize,
    declared: usize,
    available: usize,
    overrun: &DecodeError,
) -> (usize, usize) {
    let taps = declared / channels;
    let complete = available / taps;
    let (kept, kept_taps) = if complete > 0 {
        (complete, taps)
    } else {
        (1, available)
    };
    warn!(
        error = %overrun,
        channels_kept = kept,
        taps = kept_taps,
        "truncating correction coefficients"
    );
    (kept, kept_taps)
}
