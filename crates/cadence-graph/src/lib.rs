#![forbid(unsafe_code)]

//! Dependency graph: reactive mappers linking input cells to output cells.
//!
//! A mapper is a registered computation with declared input and output
//! cell sets. When any input changes during a frame, [`propagate`]
//! re-runs the mapper and follows its output changes transitively until
//! the graph settles — visiting each mapper at most once per pass.
//!
//! # Known limitation
//!
//! Only self-cycles (a mapper whose outputs intersect its own inputs) are
//! detected, at registration time. Deeper cycles through sibling mappers
//! are the caller's responsibility; the run-once-per-pass rule bounds
//! every propagation regardless, at the cost of one mapper reading a
//! value one frame stale.
//!
//! [`propagate`]: MapperRegistry::propagate

pub mod registry;

pub use registry::{GraphError, MapperId, MapperRegistry};
