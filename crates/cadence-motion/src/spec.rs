#![forbid(unsafe_code)]

//! Animation specifications and fail-fast validation.
//!
//! Every animation kind is a variant of [`AnimationSpec`], carrying
//! exactly the parameters that kind needs. Specs are validated once, at
//! driver creation, against the live target value — a spec that passes
//! validation cannot fail mid-animation.
//!
//! # Failure Modes
//!
//! All invalid parameters surface as [`ConfigError`] synchronously from
//! driver creation; nothing is installed on error.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::Duration;

use cadence_core::Value;

use crate::easing::Easing;

/// Result alias for validation and driver creation.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised at driver creation for invalid animation parameters.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The animation target (or its destination value) cannot be
    /// interpolated (booleans, records).
    #[error("value is not animatable")]
    NotAnimatable,

    /// Start and destination values have incompatible shapes (different
    /// variants, or vectors of different lengths).
    #[error("start and destination values have incompatible shapes")]
    ShapeMismatch,

    /// A numeric parameter is NaN or infinite.
    #[error("{0} must be finite")]
    NonFinite(&'static str),

    /// A parameter that must be strictly positive is not.
    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),

    /// A parameter that must be non-negative is negative.
    #[error("{0} must not be negative")]
    Negative(&'static str),

    /// Decay deceleration must lie strictly between 0 and 1.
    #[error("deceleration {0} is outside (0, 1)")]
    InvalidDeceleration(f64),

    /// A sequence needs at least one child.
    #[error("sequence has no children")]
    EmptySequence,

    /// A finite repeat needs at least one iteration.
    #[error("repeat count must be at least 1")]
    ZeroRepeat,

    /// Reversing is only defined for children with fixed endpoints
    /// (timing, spring, delay).
    #[error("repeat with reverse is not supported for {0} children")]
    UnreversibleChild(&'static str),

    /// A bezier easing control point or elastic bounciness is out of range.
    #[error("invalid easing: {0}")]
    InvalidEasing(&'static str),

    /// An interpolation range is malformed.
    #[error("invalid range: {0}")]
    InvalidRange(&'static str),
}

// ---------------------------------------------------------------------------
// Per-kind configuration
// ---------------------------------------------------------------------------

/// Parameters for a duration/easing animation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Total animation time.
    pub duration: Duration,
    /// Progress curve.
    pub easing: Easing,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(300),
            easing: Easing::default(),
        }
    }
}

/// Parameters for a damped-harmonic-oscillator animation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpringConfig {
    /// Spring constant `k`.
    pub stiffness: f64,
    /// Damping coefficient `c`.
    pub damping: f64,
    /// Oscillating mass `m`.
    pub mass: f64,
    /// Starting velocity in units per second.
    pub initial_velocity: f64,
    /// Displacement-from-rest threshold for settling.
    pub rest_displacement: f64,
    /// Velocity threshold (units per second) for settling.
    pub rest_velocity: f64,
    /// Hard cap after which the spring snaps to rest, if set.
    pub max_duration: Option<Duration>,
}

impl Default for SpringConfig {
    fn default() -> Self {
        Self {
            stiffness: 100.0,
            damping: 10.0,
            mass: 1.0,
            initial_velocity: 0.0,
            rest_displacement: 0.01,
            rest_velocity: 2.0,
            max_duration: None,
        }
    }
}

/// Parameters for a momentum-decay animation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Starting velocity in units per second.
    pub velocity: f64,
    /// Per-millisecond geometric decay factor, strictly inside `(0, 1)`.
    pub deceleration: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            velocity: 0.0,
            deceleration: 0.998,
        }
    }
}

/// Iteration count for [`AnimationSpec::Repeat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatCount {
    /// Run the child exactly this many times (at least 1).
    Finite(u32),
    /// Restart the child until cancelled.
    Infinite,
}

// ---------------------------------------------------------------------------
// The spec
// ---------------------------------------------------------------------------

/// A complete animation description: one of the closed set of kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnimationSpec {
    /// Eased interpolation from the live value to `to` over a duration.
    Timing {
        /// Destination value.
        to: Value,
        /// Duration and easing.
        config: TimingConfig,
    },
    /// Physical spring toward `to`.
    Spring {
        /// Rest position (scalar).
        to: Value,
        /// Physics parameters.
        config: SpringConfig,
    },
    /// Momentum decay from an initial velocity; no fixed destination.
    Decay {
        /// Velocity and deceleration.
        config: DecayConfig,
    },
    /// Hold the start value, then finish without writing.
    Delay {
        /// Hold time.
        duration: Duration,
    },
    /// Restart a child animation a number of times.
    Repeat {
        /// The animation to repeat.
        child: Box<AnimationSpec>,
        /// How many iterations.
        count: RepeatCount,
        /// Swap endpoints on every other iteration.
        reverse: bool,
    },
    /// Run children one after another; each starts when the previous
    /// finishes.
    Sequence(Vec<AnimationSpec>),
}

impl AnimationSpec {
    /// Timing animation to `to` with `config`.
    pub fn timing(to: impl Into<Value>, config: TimingConfig) -> Self {
        AnimationSpec::Timing {
            to: to.into(),
            config,
        }
    }

    /// Spring animation to `to` with `config`.
    pub fn spring(to: impl Into<Value>, config: SpringConfig) -> Self {
        AnimationSpec::Spring {
            to: to.into(),
            config,
        }
    }

    /// Momentum decay with `config`.
    #[must_use]
    pub fn decay(config: DecayConfig) -> Self {
        AnimationSpec::Decay { config }
    }

    /// Hold for `duration`, then finish.
    #[must_use]
    pub fn delay(duration: Duration) -> Self {
        AnimationSpec::Delay { duration }
    }

    /// Repeat `child` `count` times, optionally alternating direction.
    #[must_use]
    pub fn repeat(child: AnimationSpec, count: RepeatCount, reverse: bool) -> Self {
        AnimationSpec::Repeat {
            child: Box::new(child),
            count,
            reverse,
        }
    }

    /// Run `children` back to back.
    #[must_use]
    pub fn sequence(children: Vec<AnimationSpec>) -> Self {
        AnimationSpec::Sequence(children)
    }

    /// Human-readable kind name, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AnimationSpec::Timing { .. } => "timing",
            AnimationSpec::Spring { .. } => "spring",
            AnimationSpec::Decay { .. } => "decay",
            AnimationSpec::Delay { .. } => "delay",
            AnimationSpec::Repeat { .. } => "repeat",
            AnimationSpec::Sequence(_) => "sequence",
        }
    }

    /// Validate this spec against the live target value. Called once at
    /// driver creation; composite kinds validate recursively.
    pub fn validate(&self, target: &Value) -> Result<()> {
        match self {
            AnimationSpec::Timing { to, config } => {
                if !target.is_animatable() || !to.is_animatable() {
                    return Err(ConfigError::NotAnimatable);
                }
                check_shape(target, to)?;
                check_finite_value("timing destination", to)?;
                validate_easing(&config.easing)
            }
            AnimationSpec::Spring { to, config } => {
                let rest = to.as_number().ok_or(ConfigError::NotAnimatable)?;
                target.as_number().ok_or(ConfigError::NotAnimatable)?;
                if !rest.is_finite() {
                    return Err(ConfigError::NonFinite("spring destination"));
                }
                check_positive("stiffness", config.stiffness)?;
                check_non_negative("damping", config.damping)?;
                check_positive("mass", config.mass)?;
                check_positive("rest_displacement", config.rest_displacement)?;
                check_positive("rest_velocity", config.rest_velocity)?;
                if !config.initial_velocity.is_finite() {
                    return Err(ConfigError::NonFinite("initial_velocity"));
                }
                Ok(())
            }
            AnimationSpec::Decay { config } => {
                target.as_number().ok_or(ConfigError::NotAnimatable)?;
                if !config.velocity.is_finite() {
                    return Err(ConfigError::NonFinite("velocity"));
                }
                if !(config.deceleration > 0.0 && config.deceleration < 1.0) {
                    return Err(ConfigError::InvalidDeceleration(config.deceleration));
                }
                Ok(())
            }
            AnimationSpec::Delay { .. } => Ok(()),
            AnimationSpec::Repeat {
                child,
                count,
                reverse,
            } => {
                if *count == RepeatCount::Finite(0) {
                    return Err(ConfigError::ZeroRepeat);
                }
                if *reverse {
                    match child.as_ref() {
                        AnimationSpec::Timing { .. }
                        | AnimationSpec::Spring { .. }
                        | AnimationSpec::Delay { .. } => {}
                        other => {
                            return Err(ConfigError::UnreversibleChild(other.kind()));
                        }
                    }
                }
                child.validate(target)
            }
            AnimationSpec::Sequence(children) => {
                if children.is_empty() {
                    return Err(ConfigError::EmptySequence);
                }
                for child in children {
                    child.validate(target)?;
                }
                Ok(())
            }
        }
    }
}

fn check_shape(from: &Value, to: &Value) -> Result<()> {
    match (from, to) {
        (Value::Number(_), Value::Number(_)) => Ok(()),
        (Value::Vector(a), Value::Vector(b)) if a.len() == b.len() => Ok(()),
        _ => Err(ConfigError::ShapeMismatch),
    }
}

fn check_finite_value(what: &'static str, value: &Value) -> Result<()> {
    let finite = match value {
        Value::Number(n) => n.is_finite(),
        Value::Vector(xs) => xs.iter().all(|x| x.is_finite()),
        _ => true,
    };
    if finite {
        Ok(())
    } else {
        Err(ConfigError::NonFinite(what))
    }
}

fn check_positive(what: &'static str, v: f64) -> Result<()> {
    if !v.is_finite() {
        return Err(ConfigError::NonFinite(what));
    }
    if v <= 0.0 {
        return Err(ConfigError::NonPositive(what));
    }
    Ok(())
}

fn check_non_negative(what: &'static str, v: f64) -> Result<()> {
    if !v.is_finite() {
        return Err(ConfigError::NonFinite(what));
    }
    if v < 0.0 {
        return Err(ConfigError::Negative(what));
    }
    Ok(())
}

fn validate_easing(easing: &Easing) -> Result<()> {
    match easing {
        Easing::Bezier(x1, _, x2, _) => {
            if !(0.0..=1.0).contains(x1) || !(0.0..=1.0).contains(x2) {
                return Err(ConfigError::InvalidEasing(
                    "bezier x control points must be in [0, 1]",
                ));
            }
            Ok(())
        }
        Easing::Elastic(bounciness) => {
            if !bounciness.is_finite() || *bounciness < 0.0 {
                return Err(ConfigError::InvalidEasing(
                    "elastic bounciness must be non-negative",
                ));
            }
            Ok(())
        }
        Easing::In(child) | Easing::Out(child) | Easing::InOut(child) => validate_easing(child),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
