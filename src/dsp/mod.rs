//! DSP building blocks shared by the engine stages.
//!
//! Everything here is allocation-free once constructed, so the same code
//! runs inside the audio callback and in offline tests.

pub mod analysis;
pub mod block;
pub mod compressor;
pub mod convolver;
pub mod delay;
pub mod filter;
pub mod smoothing;

pub use block::AudioBlock;
pub use smoothing::Smoothed;
