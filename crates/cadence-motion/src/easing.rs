#![forbid(unsafe_code)]

//! Easing curves for timing animations.
//!
//! A closed set of named curves plus direction wrappers. Base curves are
//! the accelerating ("ease-in") shapes except [`Easing::Bounce`], which is
//! the classic decelerating bounce; wrap any curve in [`Easing::out`] or
//! [`Easing::in_out`] to flip or mirror it.
//!
//! # Invariants
//!
//! 1. `apply(t)` pins the endpoints exactly: `apply(0.0) == 0.0` and
//!    `apply(1.0) == 1.0` for every variant (including inputs outside
//!    `[0, 1]`, which clamp).
//! 2. Curves may leave `[0, 1]` between the endpoints (elastic, bezier
//!    with overshooting control points); callers must not assume
//!    monotonicity.

use serde::{Deserialize, Serialize};

/// A named easing curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Easing {
    /// Identity: progress maps straight through.
    Linear,
    /// Quadratic acceleration (`t^2`).
    Quad,
    /// Cubic acceleration (`t^3`).
    Cubic,
    /// Sinusoidal acceleration.
    Sine,
    /// Exponential acceleration (`2^(10(t-1))`).
    Expo,
    /// Circular acceleration.
    Circle,
    /// Decelerating bounce (four diminishing rebounds).
    Bounce,
    /// Springy overshoot; the parameter is the bounciness (0 gives a
    /// plain decelerating curve, 1 overshoots about once).
    Elastic(f64),
    /// Cubic bezier `(x1, y1, x2, y2)`, the CSS `cubic-bezier` form.
    /// `x1` and `x2` must lie in `[0, 1]` (checked at spec validation).
    Bezier(f64, f64, f64, f64),
    /// Accelerating direction wrapper (identity for base curves).
    In(Box<Easing>),
    /// Flipped child: `1 - child(1 - t)`.
    Out(Box<Easing>),
    /// Child on the first half, flipped child on the second.
    InOut(Box<Easing>),
}

impl Easing {
    /// Wrap a curve to run in its accelerating direction.
    #[must_use]
    pub fn ease_in(curve: Easing) -> Easing {
        Easing::In(Box::new(curve))
    }

    /// Wrap a curve to run flipped (decelerating).
    #[must_use]
    pub fn out(curve: Easing) -> Easing {
        Easing::Out(Box::new(curve))
    }

    /// Wrap a curve to accelerate in and decelerate out.
    #[must_use]
    pub fn in_out(curve: Easing) -> Easing {
        Easing::InOut(Box::new(curve))
    }

    /// Evaluate the curve at progress `t`, with exact pinned endpoints.
    #[must_use]
    pub fn apply(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        if t >= 1.0 {
            return 1.0;
        }
        self.eval(t)
    }

    /// Raw evaluation on the open interval `(0, 1)`.
    fn eval(&self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,
            Easing::Quad => t * t,
            Easing::Cubic => t * t * t,
            Easing::Sine => 1.0 - (t * std::f64::consts::FRAC_PI_2).cos(),
            Easing::Expo => (2.0f64).powf(10.0 * (t - 1.0)),
            Easing::Circle => 1.0 - (1.0 - t * t).sqrt(),
            Easing::Bounce => bounce(t),
            Easing::Elastic(bounciness) => {
                let p = bounciness * std::f64::consts::PI;
                1.0 - (t * std::f64::consts::FRAC_PI_2).cos().powi(3) * (t * p).cos()
            }
            Easing::Bezier(x1, y1, x2, y2) => bezier(t, *x1, *y1, *x2, *y2),
            Easing::In(child) => child.eval(t),
            Easing::Out(child) => 1.0 - child.eval(1.0 - t),
            Easing::InOut(child) => {
                if t < 0.5 {
                    child.eval(t * 2.0) / 2.0
                } else {
                    1.0 - child.eval((1.0 - t) * 2.0) / 2.0
                }
            }
        }
    }
}

impl Default for Easing {
    /// The default timing curve: quadratic in-out.
    fn default() -> Self {
        Easing::in_out(Easing::Quad)
    }
}

fn bounce(mut t: f64) -> f64 {
    if t < 1.0 / 2.75 {
        return 7.5625 * t * t;
    }
    if t < 2.0 / 2.75 {
        t -= 1.5 / 2.75;
        return 7.5625 * t * t + 0.75;
    }
    if t < 2.5 / 2.75 {
        t -= 2.25 / 2.75;
        return 7.5625 * t * t + 0.9375;
    }
    t -= 2.625 / 2.75;
    7.5625 * t * t + 0.984375
}

// ---------------------------------------------------------------------------
// Cubic bezier solving
// ---------------------------------------------------------------------------

const NEWTON_ITERATIONS: usize = 4;
const NEWTON_MIN_SLOPE: f64 = 0.001;
const SUBDIVISION_PRECISION: f64 = 1e-7;
const SUBDIVISION_MAX_ITERATIONS: usize = 12;

fn coeff_a(a1: f64, a2: f64) -> f64 {
    1.0 - 3.0 * a2 + 3.0 * a1
}

fn coeff_b(a1: f64, a2: f64) -> f64 {
    3.0 * a2 - 6.0 * a1
}

fn coeff_c(a1: f64) -> f64 {
    3.0 * a1
}

/// Bezier polynomial value at parameter `s` for control points `a1`, `a2`.
fn sample(s: f64, a1: f64, a2: f64) -> f64 {
    ((coeff_a(a1, a2) * s + coeff_b(a1, a2)) * s + coeff_c(a1)) * s
}

/// Derivative of the bezier polynomial at `s`.
fn slope(s: f64, a1: f64, a2: f64) -> f64 {
    3.0 * coeff_a(a1, a2) * s * s + 2.0 * coeff_b(a1, a2) * s + coeff_c(a1)
}

/// Solve `x(s) = x` for `s`, Newton first, bisection when the slope is
/// too shallow for Newton to converge.
fn solve_s(x: f64, x1: f64, x2: f64) -> f64 {
    let mut guess = x;
    for _ in 0..NEWTON_ITERATIONS {
        let current_slope = slope(guess, x1, x2);
        if current_slope < NEWTON_MIN_SLOPE {
            break;
        }
        let err = sample(guess, x1, x2) - x;
        guess -= err / current_slope;
    }
    let err = sample(guess, x1, x2) - x;
    if err.abs() < SUBDIVISION_PRECISION {
        return guess.clamp(0.0, 1.0);
    }

    let (mut lo, mut hi) = (0.0f64, 1.0f64);
    let mut mid = x;
    for _ in 0..SUBDIVISION_MAX_ITERATIONS {
        mid = (lo + hi) / 2.0;
        let err = sample(mid, x1, x2) - x;
        if err.abs() < SUBDIVISION_PRECISION {
            break;
        }
        if err > 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    mid
}

fn bezier(t: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    // Linear control points degenerate to identity; skip the solve.
    if x1 == y1 && x2 == y2 {
        return t;
    }
    sample(solve_s(t, x1, x2), y1, y2)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
