//! Procedural generators: buffers synthesized without external input.

pub mod curve;
pub mod impulse;

pub use curve::{CURVE_LENGTH, CurveGenerator, TransferCurve};
pub use impulse::{ReverbImpulseGenerator, decay_from_damping, duration_from_size};
