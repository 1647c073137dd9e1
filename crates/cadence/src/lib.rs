#![forbid(unsafe_code)]

//! cadence public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub mod prelude {
    pub use cadence_core as core;
    pub use cadence_graph as graph;
    pub use cadence_motion as motion;
    pub use cadence_runtime as runtime;

    pub use cadence_core::{SharedCell, Value};
    pub use cadence_motion::{
        AnimationSpec, DecayConfig, Easing, RepeatCount, SpringConfig, TimingConfig,
    };
    pub use cadence_runtime::{AnimationOutcome, Engine, FrameTick, RenderLoop};
}
