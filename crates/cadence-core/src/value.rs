#![forbid(unsafe_code)]

//! The closed value model for animated cells.
//!
//! Cells hold exactly one [`Value`]. Numbers and vectors are animatable
//! (they support interpolation); booleans and records can be stored and
//! written by mappers but an animation request targeting them is rejected
//! at driver creation.
//!
//! # Invariants
//!
//! 1. `lerp(a, b, 0.0) == a` and `lerp(a, b, 1.0) == b` for animatable
//!    pairs of matching shape.
//! 2. Vector interpolation requires equal lengths; mismatched shapes make
//!    `lerp` return `None` (callers snap to the end value).
//! 3. Serialization round-trips losslessly through serde.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A single cell value: scalar, vector, or structured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A scalar number. The common case for animated properties.
    Number(f64),
    /// A boolean flag (not animatable).
    Bool(bool),
    /// A short vector of numbers, e.g. a translation or RGBA channels.
    Vector(SmallVec<[f64; 4]>),
    /// A structured record keyed by field name (not animatable).
    Record(BTreeMap<String, Value>),
}

impl Value {
    /// Build a vector value from a slice.
    #[must_use]
    pub fn vector(xs: &[f64]) -> Self {
        Value::Vector(SmallVec::from_slice(xs))
    }

    /// The scalar payload, if this is a number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether this value supports interpolation.
    #[must_use]
    pub fn is_animatable(&self) -> bool {
        matches!(self, Value::Number(_) | Value::Vector(_))
    }

    /// Linear interpolation between `self` and `to` at progress `p`.
    ///
    /// Returns `None` when the two values have incompatible shapes
    /// (different variants, or vectors of different lengths).
    #[must_use]
    pub fn lerp(&self, to: &Value, p: f64) -> Option<Value> {
        match (self, to) {
            (Value::Number(a), Value::Number(b)) => Some(Value::Number(a + (b - a) * p)),
            (Value::Vector(a), Value::Vector(b)) if a.len() == b.len() => Some(Value::Vector(
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| x + (y - x) * p)
                    .collect(),
            )),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&[f64]> for Value {
    fn from(xs: &[f64]) -> Self {
        Value::vector(xs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
