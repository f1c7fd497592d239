//! RIFF/WAVE and raw-float PCM decoding.
//!
//! Only the handful of encodings impulse files actually use are accepted:
//! 16-bit and 24-bit signed PCM, and 32-bit IEEE float. Anything malformed
//! comes back as a [`DecodeError`]; nothing in here can panic on hostile input.

use tracing::{debug, warn};

use crate::buffer::SampleBuffer;
use crate::error::DecodeError;

const RIFF_TAG: &[u8; 4] = b"RIFF";
const FMT_TAG: &[u8; 4] = b"fmt ";
const DATA_TAG: &[u8; 4] = b"data";

/// First chunk header sits after `RIFF <size> WAVE`.
const FIRST_CHUNK_OFFSET: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const MIN_FMT_LEN: usize = 16;

const FORMAT_PCM: u16 = 0x0001;

/// Plausible source rates; anything outside is rejected before resampling.
pub const MIN_SAMPLE_RATE: u32 = 1000;
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Sample layout read from the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FmtChunk {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

/// Decoder for user-supplied impulse files.
pub struct WavPcmDecoder;

impl WavPcmDecoder {
    /// Decode `bytes` into a planar float buffer.
    ///
    /// Buffers starting with `RIFF` are walked chunk by chunk. Anything else is
    /// read as headerless little-endian `f32` mono at `target_sample_rate`.
    pub fn decode(bytes: &[u8], target_sample_rate: u32) -> Result<SampleBuffer, DecodeError> {
        if bytes.len() >= 4 && &bytes[..4] == RIFF_TAG {
            decode_riff(bytes)
        } else {
            Ok(decode_raw_f32(bytes, target_sample_rate))
        }
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn decode_raw_f32(bytes: &[u8], sample_rate: u32) -> SampleBuffer {
    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    debug!(frames = samples.len(), sample_rate, "decoded raw f32 asset");
    SampleBuffer::mono(samples, sample_rate)
}

fn decode_riff(bytes: &[u8]) -> Result<SampleBuffer, DecodeError> {
    if bytes.len() < FIRST_CHUNK_OFFSET {
        return Err(DecodeError::MalformedContainer(format!(
            "RIFF header needs {FIRST_CHUNK_OFFSET} bytes, got {}",
            bytes.len()
        )));
    }

    let mut fmt: Option<FmtChunk> = None;
    let mut data: Option<(usize, usize)> = None;

    let mut offset = FIRST_CHUNK_OFFSET;
    while offset + CHUNK_HEADER_LEN <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4) as usize;
        let body = offset + CHUNK_HEADER_LEN;

        if id == FMT_TAG && fmt.is_none() {
            if size < MIN_FMT_LEN || body + MIN_FMT_LEN > bytes.len() {
                return Err(DecodeError::MalformedContainer(format!(
                    "fmt chunk is {size} bytes, need at least {MIN_FMT_LEN}"
                )));
            }
            fmt = Some(FmtChunk {
                format_tag: read_u16(bytes, body),
                channels: read_u16(bytes, body + 2),
                sample_rate: read_u32(bytes, body + 4),
                bits_per_sample: read_u16(bytes, body + 14),
            });
        } else if id == DATA_TAG && data.is_none() {
            data = Some((body, size));
        }

        // Chunks are word aligned: odd sizes carry one pad byte.
        offset = body.saturating_add(size).saturating_add(size & 1);
    }

    let fmt = fmt.ok_or_else(|| DecodeError::MalformedContainer("no fmt chunk".into()))?;
    let (data_offset, declared_len) =
        data.ok_or_else(|| DecodeError::MalformedContainer("no data chunk".into()))?;

    if fmt.channels == 0 {
        return Err(DecodeError::MalformedContainer("fmt declares zero channels".into()));
    }
    if fmt.sample_rate == 0 {
        return Err(DecodeError::MalformedContainer("fmt declares a zero sample rate".into()));
    }
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&fmt.sample_rate) {
        return Err(DecodeError::UnsupportedFormat(format!(
            "{} Hz sample rate, expected {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}",
            fmt.sample_rate
        )));
    }

    let bytes_per_sample = match fmt.bits_per_sample {
        16 => 2,
        24 => 3,
        32 => 4,
        other => {
            return Err(DecodeError::UnsupportedFormat(format!(
                "{other}-bit samples"
            )));
        }
    };
    if fmt.bits_per_sample == 32 && fmt.format_tag == FORMAT_PCM {
        warn!("32-bit integer PCM declared; samples are read as IEEE float");
    }

    let available = bytes.len().saturating_sub(data_offset);
    let data_len = if declared_len > available {
        let overrun = DecodeError::BufferOverrun {
            declared: declared_len as u64,
            available: available as u64,
        };
        warn!(error = %overrun, "truncating data chunk");
        available
    } else {
        declared_len
    };
    let payload = &bytes[data_offset..data_offset + data_len];

    let num_channels = fmt.channels as usize;
    let frame_bytes = num_channels * bytes_per_sample;
    let frames = payload.len() / frame_bytes;

    let mut channels: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); num_channels];
    for frame in payload.chunks_exact(frame_bytes) {
        for (ch, raw) in channels.iter_mut().zip(frame.chunks_exact(bytes_per_sample)) {
            ch.push(decode_sample(raw));
        }
    }

    debug!(
        channels = num_channels,
        sample_rate = fmt.sample_rate,
        bits = fmt.bits_per_sample,
        frames,
        "decoded RIFF asset"
    );
    Ok(SampleBuffer::new(channels, fmt.sample_rate))
}

/// Convert one little-endian sample to float; width picks the encoding.
#[inline]
fn decode_sample(raw: &[u8]) -> f32 {
    match raw.len() {
        2 => i16::from_le_bytes([raw[0], raw[1]]) as f32 / 32768.0,
        // Shift into the top of an i32 and back down to sign-extend bit 23.
        3 => (i32::from_le_bytes([0, raw[0], raw[1], raw[2]]) >> 8) as f32 / 8_388_608.0,
        4 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
        _ => 0.0,
    }
}
