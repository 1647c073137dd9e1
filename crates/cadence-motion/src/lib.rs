#![forbid(unsafe_code)]

//! Motion: animation specifications, easing curves, interpolation helpers,
//! and the per-frame driver state machine.
//!
//! A [`Driver`] is a pure state machine over `(tick time, live cell value)`:
//! the runtime feeds it frame ticks and applies the values it emits. All
//! animation kinds are a closed tagged variant ([`AnimationSpec`]), matched
//! exhaustively in the driver's advance function; invalid parameters are
//! rejected when the driver is created, never mid-animation.

pub mod driver;
pub mod easing;
pub mod interpolate;
pub mod spec;

pub use driver::{Driver, DriverState, Step};
pub use easing::Easing;
pub use interpolate::{Extrapolation, clamp, interpolate};
pub use spec::{
    AnimationSpec, ConfigError, DecayConfig, RepeatCount, SpringConfig, TimingConfig,
};
