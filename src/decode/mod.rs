//! Binary asset decoders.
//!
//! Both decoders work on bytes already in memory and never touch the file
//! system. Malformed input degrades to a [`crate::error::DecodeError`].

pub mod correction;
pub mod wav;

pub use correction::{CorrectionFilterData, CorrectionFilterDecoder, MAX_COEFFICIENTS};
pub use wav::WavPcmDecoder;
