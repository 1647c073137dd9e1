#![forbid(unsafe_code)]

//! Mapper registration and change propagation.
//!
//! # Design
//!
//! The registry holds mappers in registration order. Input and output cell
//! sets are captured at registration and never re-derived. Propagation is
//! wave-based: the cells changed by the frame's drivers seed the first
//! wave; each wave runs every not-yet-visited enabled mapper whose input
//! set intersects the changed set, in registration order; the outputs
//! whose generation advanced form the next wave. A visited set guarantees
//! each mapper runs at most once per pass, which bounds propagation even
//! when outputs feed back into inputs through sibling mappers.
//!
//! Registration happens on the control side while propagation runs on the
//! render side, so `propagate` snapshots the entry list up front and
//! iterates the snapshot — concurrent register/unregister never tears the
//! traversal.
//!
//! # Invariants
//!
//! 1. A mapper's output set never intersects its own input set
//!    (rejected at registration).
//! 2. Each mapper is invoked at most once per propagation pass.
//! 3. Mappers are visited in registration order within every wave.
//! 4. A panicking mapper is caught and logged; it stays enabled and the
//!    pass continues with the remaining mappers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ahash::{AHashMap, AHashSet};
use thiserror::Error;

use cadence_core::{CellId, SharedCell};

/// Errors surfaced at mapper registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// An output cell is also a member of the mapper's input set.
    #[error("mapper output {0} is also one of its inputs (self-cycle)")]
    SelfCycle(CellId),

    /// The mapper declared no inputs; it could never be triggered.
    #[error("mapper declares no input cells")]
    NoInputs,
}

/// Identity of a registered mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapperId(u64);

impl std::fmt::Display for MapperId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mapper#{}", self.0)
    }
}

struct MapperEntry {
    id: MapperId,
    inputs: AHashSet<CellId>,
    /// Declared outputs, kept as cells so propagation can watch their
    /// generation counters for changes.
    outputs: Vec<SharedCell>,
    enabled: bool,
    compute: Arc<dyn Fn() + Send + Sync>,
}

/// Registration-ordered mapper table with wave propagation.
pub struct MapperRegistry {
    entries: Mutex<Vec<Arc<MapperEntry>>>,
    next_id: AtomicU64,
}

impl Default for MapperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperRegistry")
            .field("mappers", &self.len())
            .finish()
    }
}

impl MapperRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a mapper computation.
    ///
    /// `inputs` and `outputs` are captured as the mapper's declared cell
    /// sets; `compute` reads the inputs and writes the outputs itself.
    /// Fails fast on an empty input set or a self-cycle.
    pub fn register(
        &self,
        inputs: &[&SharedCell],
        outputs: &[&SharedCell],
        compute: impl Fn() + Send + Sync + 'static,
    ) -> Result<MapperId, GraphError> {
        if inputs.is_empty() {
            return Err(GraphError::NoInputs);
        }
        let input_set: AHashSet<CellId> = inputs.iter().map(|c| c.id()).collect();
        for out in outputs {
            if input_set.contains(&out.id()) {
                return Err(GraphError::SelfCycle(out.id()));
            }
        }

        let id = MapperId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(MapperEntry {
            id,
            inputs: input_set,
            outputs: outputs.iter().map(|c| (*c).clone()).collect(),
            enabled: true,
            compute: Arc::new(compute),
        });
        self.entries.lock().expect("registry lock").push(entry);
        Ok(id)
    }

    /// Disable and remove a mapper. Output values it already produced are
    /// left untouched. Unknown ids are ignored.
    pub fn unregister(&self, id: MapperId) {
        self.entries
            .lock()
            .expect("registry lock")
            .retain(|e| e.id != id);
    }

    /// Enable or disable a mapper in place. Returns `false` for unknown ids.
    pub fn set_enabled(&self, id: MapperId, enabled: bool) -> bool {
        let mut entries = self.entries.lock().expect("registry lock");
        for entry in entries.iter_mut() {
            if entry.id == id {
                *entry = Arc::new(MapperEntry {
                    id: entry.id,
                    inputs: entry.inputs.clone(),
                    outputs: entry.outputs.clone(),
                    enabled,
                    compute: Arc::clone(&entry.compute),
                });
                return true;
            }
        }
        false
    }

    /// Number of registered mappers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry lock").len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one propagation pass seeded with `changed`.
    ///
    /// Returns a handle to every cell written by a mapper during the
    /// pass, in first-changed order. Each mapper runs at most once; a
    /// mapper triggered again transitively in the same pass is skipped
    /// (it will observe the fresh inputs next frame).
    pub fn propagate(&self, changed: &[CellId]) -> Vec<SharedCell> {
        // Snapshot so control-side mutation cannot tear the traversal.
        let entries: Vec<Arc<MapperEntry>> =
            self.entries.lock().expect("registry lock").clone();

        let mut visited: AHashSet<MapperId> = AHashSet::new();
        let mut wave: AHashSet<CellId> = changed.iter().copied().collect();
        let mut written: Vec<SharedCell> = Vec::new();
        let mut written_set: AHashSet<CellId> = AHashSet::new();

        while !wave.is_empty() {
            let mut next_wave: AHashSet<CellId> = AHashSet::new();

            for entry in &entries {
                if !entry.enabled
                    || visited.contains(&entry.id)
                    || entry.inputs.is_disjoint(&wave)
                {
                    continue;
                }
                visited.insert(entry.id);

                // Generations before the run decide which declared outputs
                // actually changed.
                let before: AHashMap<CellId, u64> = entry
                    .outputs
                    .iter()
                    .map(|c| (c.id(), c.generation()))
                    .collect();

                let compute = Arc::clone(&entry.compute);
                if catch_unwind(AssertUnwindSafe(|| compute())).is_err() {
                    tracing::warn!(mapper = %entry.id, "mapper panicked; left enabled");
                    continue;
                }

                for out in &entry.outputs {
                    if out.generation() != before[&out.id()] {
                        next_wave.insert(out.id());
                        if written_set.insert(out.id()) {
                            written.push(out.clone());
                        }
                    }
                }
            }

            wave = next_wave;
        }

        written
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
