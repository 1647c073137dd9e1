#![forbid(unsafe_code)]

//! Runtime: the cross-thread bridge, the frame loop, and the engine
//! context that ties cells, mappers, and drivers together.
//!
//! The control side holds an [`Engine`] handle; the render side drives a
//! [`RenderLoop`] from a [`TickSource`]. Control-side mutations (writes,
//! animation requests, cancellations) are queued over the bridge and
//! applied at the top of the next frame tick, so every frame computes
//! against a consistent snapshot and never blocks on the control thread.

pub mod bridge;
pub mod engine;
pub mod frame_loop;
pub mod handle;
pub mod sink;
pub mod ticker;

pub use bridge::Bridge;
pub use engine::{Engine, RenderLoop};
pub use frame_loop::{FrameCallbackId, FrameInfo};
pub use handle::{AnimationHandle, AnimationOutcome};
pub use sink::{NullSink, RenderSink, VecSink};
pub use ticker::{FrameTick, IntervalTicker, ManualTicker, TickHandle, TickSource};
