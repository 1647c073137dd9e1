#![forbid(unsafe_code)]

//! Core: the value model, cross-thread shared cells, and subscriptions.
//!
//! A [`SharedCell`] is a reference-counted, synchronization-guarded slot
//! holding one [`Value`]. Handles are cheap clones of the reference; the
//! data itself is never copied across contexts. Every write bumps a
//! generation counter so any context can detect "changed since I last
//! looked" without holding a lock.

pub mod cell;
pub mod side;
pub mod value;

pub use cell::{CellId, CrossNotify, SharedCell, Subscription};
pub use side::{RenderGuard, ThreadSide, current_side};
pub use value::Value;
