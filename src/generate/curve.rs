//! Lookup-table transfer functions for the waveshaping stages.
//!
//! Tables are rebuilt only when their controlling parameter changes; the
//! render path only ever reads them through [`TransferCurve::shape`].

use std::f32::consts::PI;

use crate::settings::AmpClass;

/// Points per table.
pub const CURVE_LENGTH: usize = 44100;

/// A sampled transfer function over the input range [-1, 1].
///
/// Point `i` holds the output for input `2i/(N-1) - 1`, so the first and
/// last points sit exactly on -1 and 1.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferCurve {
    points: Vec<f32>,
}

impl TransferCurve {
    /// Sample `f` at [`CURVE_LENGTH`] evenly spaced inputs.
    pub fn from_fn(f: impl Fn(f32) -> f32) -> Self {
        let last = (CURVE_LENGTH - 1) as f32;
        let points = (0..CURVE_LENGTH)
            .map(|i| f(i as f32 * 2.0 / last - 1.0))
            .collect();
        TransferCurve { points }
    }

    /// Straight line, output equals input.
    pub fn identity() -> Self {
        TransferCurve::from_fn(|x| x)
    }

    pub fn points(&self) -> &[f32] {
        &self.points
    }

    /// Map one sample through the table with linear interpolation.
    ///
    /// Inputs outside [-1, 1] take the end values.
    #[inline]
    pub fn shape(&self, x: f32) -> f32 {
        let n = self.points.len();
        if n < 2 {
            return self.points.first().copied().unwrap_or(x);
        }

        let pos = (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * (n - 1) as f32;
        let idx = pos as usize;
        if idx >= n - 1 {
            return self.points[n - 1];
        }
        let frac = pos - idx as f32;
        self.points[idx] * (1.0 - frac) + self.points[idx + 1] * frac
    }
}

/// Builders for every curve the engine uses.
pub struct CurveGenerator;

impl CurveGenerator {
    /// Cubic exciter: `x + (amount/100)·x³`, adds third-harmonic content.
    pub fn exciter(amount: f32) -> TransferCurve {
        let a = amount.clamp(0.0, 100.0) / 100.0;
        TransferCurve::from_fn(|x| x + a * x * x * x)
    }

    /// Asymmetric tube warmth.
    pub fn tube() -> TransferCurve {
        TransferCurve::from_fn(tube_transfer)
    }

    /// Amplifier-class emulation with `drive` (0–100) blended in.
    pub fn amplifier(class: AmpClass, drive: f32) -> TransferCurve {
        let d = drive.clamp(0.0, 100.0) / 100.0;
        match class {
            AmpClass::ClassA => TransferCurve::from_fn(|x| x + d * (class_a_saturation(x) - x)),
            AmpClass::ClassAB => {
                let width = 0.05 + 0.15 * d;
                TransferCurve::from_fn(|x| {
                    let mag = x.abs();
                    if mag < width {
                        x * (1.0 - 0.5 * d * (1.0 - mag / width))
                    } else {
                        x
                    }
                })
            }
            AmpClass::ClassB => {
                let dead_zone = 0.1 * d;
                TransferCurve::from_fn(|x| if x.abs() < dead_zone { 0.0 } else { x })
            }
        }
    }

    /// Legacy soft clipper: `(3+k)·x·20° / (π + k·|x|)`.
    pub fn soft_clip(amount: f32) -> TransferCurve {
        let k = amount.clamp(0.0, 100.0);
        let deg = PI / 180.0;
        TransferCurve::from_fn(|x| (3.0 + k) * x * 20.0 * deg / (PI + k * x.abs()))
    }
}

fn tube_transfer(x: f32) -> f32 {
    if x < -0.5 {
        x + 0.2 * (x * PI).sin()
    } else if x > 0.5 {
        x - 0.1 * x * x
    } else {
        x + 0.1 * x * x
    }
}

/// Positive half saturates gently, negative half harder.
fn class_a_saturation(x: f32) -> f32 {
    if x >= 0.0 {
        (1.5 * x).tanh() / 1.5f32.tanh()
    } else {
        (3.0 * x).tanh() / 3.0f32.tanh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(got: f32, want: f32, tol: f32, what: &str) {
        assert!((got - want).abs() <= tol, "{what}: got {got}, want {want}");
    }

    #[test]
    fn tables_have_fixed_length_and_endpoints() {
        let curve = TransferCurve::identity();
        assert_eq!(curve.points().len(), CURVE_LENGTH);
        assert_eq!(curve.points()[0], -1.0);
        assert_eq!(curve.points()[CURVE_LENGTH - 1], 1.0);
    }

    #[test]
    fn identity_lookup_interpolates() {
        let curve = TransferCurve::identity();
        for x in [-0.999, -0.3, 0.0, 0.123_45, 0.77] {
            assert_close(curve.shape(x), x, 1e-5, "identity");
        }
        assert_eq!(curve.shape(4.0), 1.0, "clamped above");
        assert_eq!(curve.shape(-4.0), -1.0, "clamped below");
    }

    #[test]
    fn exciter_adds_cube() {
        let curve = CurveGenerator::exciter(50.0);
        assert_close(curve.shape(1.0), 1.5, 1e-6, "full scale");
        assert_close(curve.shape(-1.0), -1.5, 1e-6, "negative full scale");
        assert_close(curve.shape(0.5), 0.5 + 0.5 * 0.125, 1e-4, "half scale");

        let flat = CurveGenerator::exciter(0.0);
        assert_close(flat.shape(0.4), 0.4, 1e-5, "zero amount is linear");
    }

    #[test]
    fn tube_is_piecewise_and_asymmetric() {
        let curve = CurveGenerator::tube();
        assert_close(curve.shape(0.25), 0.25 + 0.1 * 0.0625, 1e-4, "middle");
        assert_close(curve.shape(0.8), 0.8 - 0.1 * 0.64, 1e-4, "upper");
        assert_close(curve.shape(-0.75), -0.75 + 0.2 * (-0.75 * PI).sin(), 1e-4, "lower");
        assert!(
            (curve.shape(0.25) + curve.shape(-0.25)).abs() > 0.01,
            "tube curve should add even harmonics"
        );
    }

    #[test]
    fn class_a_zero_drive_is_linear_and_full_drive_is_asymmetric() {
        let clean = CurveGenerator::amplifier(AmpClass::ClassA, 0.0);
        assert_close(clean.shape(0.6), 0.6, 1e-5, "no drive");

        let driven = CurveGenerator::amplifier(AmpClass::ClassA, 100.0);
        assert_close(driven.shape(1.0), 1.0, 1e-5, "normalized peak");
        assert!(driven.shape(0.3) > 0.3, "saturation lifts small signals");
        assert!(
            driven.shape(-0.3).abs() > driven.shape(0.3).abs(),
            "negative half saturates harder"
        );
    }

    #[test]
    fn class_ab_attenuates_near_zero_only() {
        let curve = CurveGenerator::amplifier(AmpClass::ClassAB, 100.0);
        assert!(curve.shape(0.01).abs() < 0.01 * 0.6, "small signals attenuated");
        assert_close(curve.shape(0.5), 0.5, 1e-5, "large signals untouched");
    }

    #[test]
    fn class_b_zeroes_dead_zone() {
        let curve = CurveGenerator::amplifier(AmpClass::ClassB, 100.0);
        assert_eq!(curve.shape(0.05), 0.0);
        assert_eq!(curve.shape(-0.05), 0.0);
        assert_close(curve.shape(0.3), 0.3, 1e-5, "outside dead zone");

        let no_drive = CurveGenerator::amplifier(AmpClass::ClassB, 0.0);
        assert_close(no_drive.shape(0.05), 0.05, 1e-5, "no dead zone without drive");
    }

    #[test]
    fn soft_clip_formula() {
        let k = 50.0;
        let curve = CurveGenerator::soft_clip(k);
        let x = 0.5;
        let want = (3.0 + k) * x * 20.0 * (PI / 180.0) / (PI + k * x);
        assert_close(curve.shape(x), want, 1e-4, "soft clip");
        assert_close(curve.shape(-x), -want, 1e-4, "odd symmetry");
    }
}
