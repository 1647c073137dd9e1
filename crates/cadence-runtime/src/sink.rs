#![forbid(unsafe_code)]

//! Render sink boundary: where settled per-frame values leave the engine.
//!
//! After a frame's drivers advance and propagation settles, the frame
//! loop calls [`RenderSink::commit`] once per changed cell. The sink
//! applies the value to whatever it represents (a view property, a
//! terminal cell, a test buffer) and must not fail for a well-typed
//! value.

use std::sync::{Arc, Mutex};

use cadence_core::{CellId, Value};

/// Consumer of settled per-frame values.
pub trait RenderSink: Send {
    /// Apply `value` for `cell`. Called once per changed cell per frame,
    /// after propagation settles.
    fn commit(&mut self, cell: CellId, value: &Value);
}

/// Sink that discards every commit.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn commit(&mut self, _cell: CellId, _value: &Value) {}
}

/// Test sink that records every commit in order. Cloning shares the
/// underlying record, so a test can keep one handle while the engine
/// owns the other.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    commits: Arc<Mutex<Vec<(CellId, Value)>>>,
}

impl VecSink {
    /// Create an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All commits so far, in order.
    #[must_use]
    pub fn commits(&self) -> Vec<(CellId, Value)> {
        self.commits.lock().expect("sink lock").clone()
    }

    /// Commits recorded for one cell, in order.
    #[must_use]
    pub fn commits_for(&self, cell: CellId) -> Vec<Value> {
        self.commits
            .lock()
            .expect("sink lock")
            .iter()
            .filter(|(id, _)| *id == cell)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Number of commits recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commits.lock().expect("sink lock").len()
    }

    /// Whether nothing has been committed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.commits.lock().expect("sink lock").clear();
    }
}

impl RenderSink for VecSink {
    fn commit(&mut self, cell: CellId, value: &Value) {
        self.commits
            .lock()
            .expect("sink lock")
            .push((cell, value.clone()));
    }
}
