//! Exponential parameter smoothing, advanced once per render quantum.

/// Time constant for every parameter transition, in seconds.
pub const SMOOTHING_TIME_CONSTANT: f32 = 0.05;

/// Remaining distance below which a transition snaps to its target.
const SNAP_EPSILON: f32 = 1e-6;

/// A parameter easing toward its target: `current += (target - current)·(1 - e^(-dt/τ))`.
///
/// State is just `{current, target, tau}`, so a transition interrupted by a new
/// target simply continues from wherever `current` is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothed {
    current: f32,
    target: f32,
    tau: f32,
}

impl Smoothed {
    /// Start settled at `value`.
    pub fn new(value: f32) -> Self {
        Smoothed {
            current: value,
            target: value,
            tau: SMOOTHING_TIME_CONSTANT,
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Move toward the target by one step of `dt` seconds and return the new value.
    #[inline]
    pub fn advance(&mut self, dt: f32) -> f32 {
        if self.current != self.target {
            let coef = 1.0 - (-dt / self.tau).exp();
            self.current += (self.target - self.current) * coef;
            if (self.target - self.current).abs() <= SNAP_EPSILON * self.target.abs().max(1.0) {
                self.current = self.target;
            }
        }
        self.current
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// True once the value has reached its target.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Settled exactly at `value`.
    #[inline]
    pub fn is_settled_at(&self, value: f32) -> bool {
        self.current == value && self.target == value
    }
}
