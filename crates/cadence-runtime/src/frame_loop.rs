#![forbid(unsafe_code)]

//! The per-frame orchestrator.
//!
//! Once per display refresh, the loop runs the whole frame pipeline on
//! the render side:
//!
//! 1. drain the bridge's render queue — queued control-side writes,
//!    driver installs, and cancellations land here, so the rest of the
//!    frame sees a consistent snapshot;
//! 2. advance every active driver (snapshot semantics: installs during
//!    this tick were already deferred to the next drain), collecting the
//!    cells written;
//! 3. run user frame callbacks;
//! 4. propagate the written set through the mapper registry;
//! 5. commit each transitively-changed cell to the render sink exactly
//!    once.
//!
//! When no drivers, no active frame callbacks, and no queued work remain,
//! the loop unsubscribes from the tick source — an idle engine causes no
//! wakeups — and resubscribes when the control side installs new work.
//!
//! # Failure Modes
//!
//! - A panicking driver is cancelled and logged; the frame continues.
//! - A panicking frame callback is logged and left registered (it may
//!   recover next frame with corrected inputs).
//! - A cell written directly (bypassing its driver) displaces that
//!   driver: the generation counter moved without the driver's knowledge,
//!   so the driver resolves `Cancelled` before its next advance.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, Weak};

use ahash::AHashSet;
use web_time::Duration;

use cadence_core::{CellId, RenderGuard, SharedCell};
use cadence_graph::MapperRegistry;
use cadence_motion::Driver;

use crate::bridge::Bridge;
use crate::handle::{AnimationOutcome, OutcomeSender};
use crate::sink::RenderSink;
use crate::ticker::{FrameTick, TickHandle, TickSource};

/// Identifies a registered frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCallbackId(pub(crate) u64);

/// Per-frame timing information delivered to frame callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// The tick's timestamp.
    pub timestamp: Duration,
    /// Time since the previous tick.
    pub delta: Duration,
    /// Time since the first tick this loop ever processed.
    pub since_first: Duration,
}

/// A driver bound to its target cell and completion sender.
struct ActiveDriver {
    cell: SharedCell,
    driver: Driver,
    outcome: OutcomeSender,
    /// The cell generation after this driver's most recent write (or at
    /// install). Any other writer moving the counter displaces the driver.
    expected_gen: u64,
}

struct FrameCallbackEntry {
    id: FrameCallbackId,
    active: bool,
    callback: Box<dyn FnMut(FrameInfo) + Send>,
}

struct TickerState {
    source: Option<Arc<dyn TickSource>>,
    subscription: Option<TickHandle>,
}

struct LoopInner {
    drivers: Vec<ActiveDriver>,
    callbacks: Vec<FrameCallbackEntry>,
    first_tick: Option<Duration>,
    sink: Box<dyn RenderSink>,
}

/// State shared between the control-side [`Engine`] handle and the
/// render-side [`RenderLoop`].
///
/// [`Engine`]: crate::engine::Engine
/// [`RenderLoop`]: crate::engine::RenderLoop
pub(crate) struct LoopShared {
    pub(crate) bridge: Arc<Bridge>,
    pub(crate) registry: Arc<MapperRegistry>,
    pub(crate) next_callback_id: AtomicU64,
    /// Cells written by queued control-side writes since the last tick;
    /// they seed propagation alongside driver writes.
    dirty: Mutex<Vec<SharedCell>>,
    inner: Mutex<LoopInner>,
    ticker: Mutex<TickerState>,
}

impl LoopShared {
    pub(crate) fn new(sink: Box<dyn RenderSink>) -> Self {
        Self {
            bridge: Arc::new(Bridge::new()),
            registry: Arc::new(MapperRegistry::new()),
            next_callback_id: AtomicU64::new(1),
            dirty: Mutex::new(Vec::new()),
            inner: Mutex::new(LoopInner {
                drivers: Vec::new(),
                callbacks: Vec::new(),
                first_tick: None,
                sink,
            }),
            ticker: Mutex::new(TickerState {
                source: None,
                subscription: None,
            }),
        }
    }

    // ── render-side: the frame pipeline ─────────────────────────────

    /// Process one frame tick. Runs on (and marks) the render context.
    pub(crate) fn tick(self: &Arc<Self>, tick: FrameTick) {
        let _guard = RenderGuard::enter();

        // 1. Apply queued control-side work before anything reads state.
        self.bridge.drain_render();
        let dirty: Vec<SharedCell> = std::mem::take(&mut *self.dirty.lock().expect("dirty lock"));

        let mut inner_guard = self.inner.lock().expect("loop lock");
        let inner = &mut *inner_guard;
        let first = *inner.first_tick.get_or_insert(tick.timestamp);

        // 2. Advance the driver snapshot. Installs queued after the drain
        // above will not be seen until the next tick.
        let mut written: Vec<SharedCell> = dirty;
        for entry in &mut inner.drivers {
            if entry.cell.generation() != entry.expected_gen {
                // Someone else wrote the cell: the driver is displaced.
                entry.driver.cancel();
                entry.outcome.resolve(AnimationOutcome::Cancelled);
                continue;
            }
            let current = entry.cell.read();
            let step = match catch_unwind(AssertUnwindSafe(|| {
                entry.driver.advance(tick.timestamp, &current)
            })) {
                Ok(step) => step,
                Err(_) => {
                    tracing::warn!(cell = %entry.cell.id(), "driver panicked; cancelling");
                    entry.driver.cancel();
                    entry.outcome.resolve(AnimationOutcome::Cancelled);
                    continue;
                }
            };
            if let Some(value) = step.write {
                entry.cell.write(value);
                entry.expected_gen = entry.cell.generation();
                written.push(entry.cell.clone());
            }
            if step.finished {
                entry.outcome.resolve(AnimationOutcome::Finished);
            }
        }
        inner.drivers.retain(|e| !e.driver.is_terminal());

        // 3. User frame callbacks.
        let info = FrameInfo {
            timestamp: tick.timestamp,
            delta: tick.delta,
            since_first: tick.timestamp.saturating_sub(first),
        };
        for entry in inner.callbacks.iter_mut().filter(|c| c.active) {
            if catch_unwind(AssertUnwindSafe(|| (entry.callback)(info))).is_err() {
                tracing::warn!(callback = entry.id.0, "frame callback panicked");
            }
        }

        // 4. Propagate through the mapper graph.
        let written_ids: Vec<_> = written.iter().map(SharedCell::id).collect();
        let mapper_written = self.registry.propagate(&written_ids);

        // 5. Commit each changed cell once.
        let mut seen = AHashSet::new();
        for cell in written.iter().chain(mapper_written.iter()) {
            if seen.insert(cell.id()) {
                inner.sink.commit(cell.id(), &cell.read());
            }
        }

        let idle = inner.drivers.is_empty()
            && !inner.callbacks.iter().any(|c| c.active)
            && self.bridge.render_pending() == 0
            && self.dirty.lock().expect("dirty lock").is_empty();
        drop(inner_guard);

        if idle {
            self.unsubscribe_if_idle();
        }
    }

    // ── render-side: installs (run from drained bridge jobs) ────────

    /// Install a driver on `cell`, superseding any existing driver there.
    /// The superseded driver resolves `Cancelled` immediately — before the
    /// new driver's first tick.
    pub(crate) fn install_driver(&self, cell: SharedCell, driver: Driver, outcome: OutcomeSender) {
        let mut inner = self.inner.lock().expect("loop lock");
        for existing in inner
            .drivers
            .iter_mut()
            .filter(|e| e.cell.id() == cell.id())
        {
            existing.driver.cancel();
            existing.outcome.resolve(AnimationOutcome::Cancelled);
        }
        inner.drivers.retain(|e| !e.driver.is_terminal());
        inner.drivers.push(ActiveDriver {
            expected_gen: cell.generation(),
            cell,
            driver,
            outcome,
        });
    }

    /// Cancel the driver on `cell`, if any.
    pub(crate) fn cancel_driver(&self, cell: CellId) {
        let mut inner = self.inner.lock().expect("loop lock");
        for entry in inner.drivers.iter_mut().filter(|e| e.cell.id() == cell) {
            entry.driver.cancel();
            entry.outcome.resolve(AnimationOutcome::Cancelled);
        }
        inner.drivers.retain(|e| !e.driver.is_terminal());
    }

    pub(crate) fn install_callback(
        &self,
        id: FrameCallbackId,
        callback: Box<dyn FnMut(FrameInfo) + Send>,
    ) {
        self.inner
            .lock()
            .expect("loop lock")
            .callbacks
            .push(FrameCallbackEntry {
                id,
                active: true,
                callback,
            });
    }

    pub(crate) fn remove_callback(&self, id: FrameCallbackId) {
        self.inner
            .lock()
            .expect("loop lock")
            .callbacks
            .retain(|c| c.id != id);
    }

    pub(crate) fn set_callback_active(&self, id: FrameCallbackId, active: bool) {
        let mut inner = self.inner.lock().expect("loop lock");
        if let Some(entry) = inner.callbacks.iter_mut().find(|c| c.id == id) {
            entry.active = active;
        }
    }

    /// Record a queued control-side write so the next tick seeds
    /// propagation (and the sink) with it.
    pub(crate) fn mark_dirty(&self, cell: SharedCell) {
        self.dirty.lock().expect("dirty lock").push(cell);
    }

    // ── subscription management ─────────────────────────────────────

    pub(crate) fn set_tick_source(self: &Arc<Self>, source: Option<Arc<dyn TickSource>>) {
        self.unsubscribe();
        self.ticker.lock().expect("ticker lock").source = source;
        if self.has_pending_work() {
            self.ensure_subscribed();
        }
    }

    /// Subscribe to the tick source if there is one and we are not
    /// already subscribed. Called whenever the control side installs
    /// work, so an idle (unsubscribed) loop wakes back up.
    pub(crate) fn ensure_subscribed(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock().expect("ticker lock");
        if ticker.subscription.is_some() {
            return;
        }
        let Some(source) = ticker.source.clone() else {
            return;
        };
        let weak: Weak<LoopShared> = Arc::downgrade(self);
        let handle = source.on_tick(Arc::new(move |tick| {
            if let Some(shared) = weak.upgrade() {
                shared.tick(tick);
            }
        }));
        ticker.subscription = Some(handle);
    }

    fn unsubscribe(&self) {
        let mut ticker = self.ticker.lock().expect("ticker lock");
        if let Some(handle) = ticker.subscription.take()
            && let Some(source) = ticker.source.clone()
        {
            source.off_tick(handle);
        }
    }

    /// End-of-tick unsubscribe. Re-checks for pending work under the
    /// ticker lock: the control side may have queued an install (and seen
    /// us still subscribed) between the idle check and this call, and
    /// that work must not be stranded with no tick to drain it.
    fn unsubscribe_if_idle(&self) {
        let mut ticker = self.ticker.lock().expect("ticker lock");
        if self.has_pending_work() {
            return;
        }
        if let Some(handle) = ticker.subscription.take()
            && let Some(source) = ticker.source.clone()
        {
            source.off_tick(handle);
        }
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.ticker.lock().expect("ticker lock").subscription.is_some()
    }

    pub(crate) fn has_pending_work(&self) -> bool {
        let inner = self.inner.lock().expect("loop lock");
        !inner.drivers.is_empty()
            || inner.callbacks.iter().any(|c| c.active)
            || self.bridge.render_pending() > 0
            || !self.dirty.lock().expect("dirty lock").is_empty()
    }

    pub(crate) fn active_driver_count(&self) -> usize {
        self.inner.lock().expect("loop lock").drivers.len()
    }
}
