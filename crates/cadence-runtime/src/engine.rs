#![forbid(unsafe_code)]

//! The engine context: explicit, no process-wide state.
//!
//! [`Engine::new`] builds one engine and returns two handles over the
//! same shared state: the [`Engine`] (control side — create cells,
//! request animations, register mappers) and the [`RenderLoop`] (render
//! side — processes frame ticks). Both are cheap to clone; the engine is
//! torn down when the last handle drops, at which point queued
//! cross-thread work is discarded.
//!
//! Control-side mutations never touch engine state directly: they are
//! validated synchronously, then queued over the bridge and applied at
//! the top of the next frame tick. That keeps every frame's computation
//! on a consistent snapshot and keeps the control thread free of any
//! render-path locks.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use cadence_core::{CrossNotify, SharedCell, Value};
use cadence_graph::{GraphError, MapperId};
use cadence_motion::{AnimationSpec, ConfigError, Driver};

use crate::frame_loop::{FrameCallbackId, FrameInfo, LoopShared};
use crate::handle::{AnimationHandle, outcome_channel};
use crate::sink::RenderSink;
use crate::ticker::{FrameTick, TickSource};

/// Control-side handle: creates cells, requests animations, registers
/// mappers and frame callbacks.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<LoopShared>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("active_drivers", &self.shared.active_driver_count())
            .finish()
    }
}

impl Engine {
    /// Build an engine committing settled values to `sink`. Returns the
    /// control handle and the render-side loop handle.
    pub fn new(sink: impl RenderSink + 'static) -> (Engine, RenderLoop) {
        let shared = Arc::new(LoopShared::new(Box::new(sink)));
        (
            Engine {
                shared: Arc::clone(&shared),
            },
            RenderLoop { shared },
        )
    }

    /// Create a cell visible to both contexts, wired to this engine's
    /// bridge for cross-side subscriber delivery.
    pub fn cell(&self, initial: impl Into<Value>) -> SharedCell {
        let cell = SharedCell::new(initial);
        cell.attach_notifier(Arc::clone(&self.shared.bridge) as Arc<dyn CrossNotify>);
        cell
    }

    /// Request an animation on `cell`.
    ///
    /// Parameters are validated here, synchronously — an invalid spec
    /// installs nothing. On success the driver is queued for the render
    /// side and starts on the next tick, superseding any driver already
    /// on the cell (which resolves `Cancelled` first). The returned
    /// handle reports the final outcome exactly once.
    pub fn animate(
        &self,
        cell: &SharedCell,
        spec: AnimationSpec,
    ) -> Result<AnimationHandle, ConfigError> {
        let driver = Driver::new(&spec, &cell.read())?;
        let (outcome, handle) = outcome_channel();
        let shared = Arc::clone(&self.shared);
        let cell = cell.clone();
        self.shared.bridge.schedule_on_render(Box::new(move || {
            shared.install_driver(cell, driver, outcome);
        }));
        self.shared.ensure_subscribed();
        Ok(handle)
    }

    /// Cancel the animation on `cell`, if any. Takes effect before the
    /// next tick; the driver's handle resolves `Cancelled`.
    pub fn cancel(&self, cell: &SharedCell) {
        let shared = Arc::clone(&self.shared);
        let id = cell.id();
        self.shared.bridge.schedule_on_render(Box::new(move || {
            shared.cancel_driver(id);
        }));
        self.shared.ensure_subscribed();
    }

    /// Write `value` to `cell` from the control side.
    ///
    /// The store is queued and applied before the next tick's driver
    /// advance, implicitly cancelling any driver on the cell, and seeds
    /// that tick's propagation pass (mappers reading the cell re-run).
    pub fn write(&self, cell: &SharedCell, value: impl Into<Value>) {
        let value = value.into();
        let shared = Arc::clone(&self.shared);
        let cell = cell.clone();
        self.shared.bridge.schedule_on_render(Box::new(move || {
            cell.write(value);
            shared.mark_dirty(cell.clone());
        }));
        self.shared.ensure_subscribed();
    }

    /// Register a mapper: a computation with declared input and output
    /// cells, re-run whenever an input changes during a frame.
    pub fn mapper(
        &self,
        inputs: &[&SharedCell],
        outputs: &[&SharedCell],
        compute: impl Fn() + Send + Sync + 'static,
    ) -> Result<MapperId, GraphError> {
        self.shared.registry.register(inputs, outputs, compute)
    }

    /// Disable and remove a mapper; its previous outputs are untouched.
    pub fn remove_mapper(&self, id: MapperId) {
        self.shared.registry.unregister(id);
    }

    /// Enable or disable a mapper in place.
    pub fn set_mapper_enabled(&self, id: MapperId, enabled: bool) -> bool {
        self.shared.registry.set_enabled(id, enabled)
    }

    /// Register a callback invoked on the render side every frame. An
    /// active frame callback keeps the loop subscribed to ticks exactly
    /// like an active driver.
    pub fn frame_callback(
        &self,
        callback: impl FnMut(FrameInfo) + Send + 'static,
    ) -> FrameCallbackId {
        let id = FrameCallbackId(self.shared.next_callback_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::clone(&self.shared);
        self.shared.bridge.schedule_on_render(Box::new(move || {
            shared.install_callback(id, Box::new(callback));
        }));
        self.shared.ensure_subscribed();
        id
    }

    /// Remove a frame callback.
    pub fn remove_frame_callback(&self, id: FrameCallbackId) {
        let shared = Arc::clone(&self.shared);
        self.shared.bridge.schedule_on_render(Box::new(move || {
            shared.remove_callback(id);
        }));
    }

    /// Pause or resume a frame callback without removing it.
    pub fn set_frame_callback_active(&self, id: FrameCallbackId, active: bool) {
        let shared = Arc::clone(&self.shared);
        self.shared.bridge.schedule_on_render(Box::new(move || {
            shared.set_callback_active(id, active);
        }));
        if active {
            self.shared.ensure_subscribed();
        }
    }

    /// Run work the render side queued for this context (cross-side
    /// subscriber notifications). Returns the number of jobs executed.
    /// The control context is cooperatively scheduled: call this from its
    /// idle point.
    pub fn pump(&self) -> usize {
        self.shared.bridge.drain_control()
    }
}

/// Render-side handle: drives the frame pipeline.
pub struct RenderLoop {
    shared: Arc<LoopShared>,
}

impl std::fmt::Debug for RenderLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderLoop")
            .field("active_drivers", &self.shared.active_driver_count())
            .field("subscribed", &self.shared.is_subscribed())
            .finish()
    }
}

impl RenderLoop {
    /// Process one frame tick directly. Test suites drive this with a
    /// [`ManualTicker`]'s timestamps or hand-built ticks.
    ///
    /// [`ManualTicker`]: crate::ticker::ManualTicker
    pub fn tick(&self, tick: FrameTick) {
        self.shared.tick(tick);
    }

    /// Attach a tick source. The loop subscribes only while it has work
    /// and unsubscribes when idle (no idle wakeups).
    pub fn attach(&self, source: Arc<dyn TickSource>) {
        self.shared.set_tick_source(Some(source));
    }

    /// Detach from the current tick source, unsubscribing first.
    pub fn detach(&self) {
        self.shared.set_tick_source(None);
    }

    /// Whether the loop currently holds a tick subscription.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.shared.is_subscribed()
    }

    /// Number of installed drivers (pending or running).
    #[must_use]
    pub fn active_driver_count(&self) -> usize {
        self.shared.active_driver_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::AnimationOutcome;
    use crate::sink::VecSink;
    use crate::ticker::ManualTicker;
    use cadence_motion::{Easing, TimingConfig};
    use web_time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn tick_at(n: u64) -> FrameTick {
        FrameTick {
            timestamp: ms(n),
            delta: ms(16),
        }
    }

    fn linear(to: f64, duration_ms: u64) -> AnimationSpec {
        AnimationSpec::timing(
            to,
            TimingConfig {
                duration: ms(duration_ms),
                easing: Easing::Linear,
            },
        )
    }

    #[test]
    fn animate_rejects_invalid_spec_synchronously() {
        let (engine, render) = Engine::new(VecSink::new());
        let cell = engine.cell(Value::Bool(true));
        let err = engine.animate(&cell, linear(1.0, 100)).unwrap_err();
        assert_eq!(err, ConfigError::NotAnimatable);
        // Nothing was installed.
        render.tick(tick_at(0));
        assert_eq!(render.active_driver_count(), 0);
    }

    #[test]
    fn timing_animation_end_to_end() {
        let sink = VecSink::new();
        let (engine, render) = Engine::new(sink.clone());
        let cell = engine.cell(0.0);

        let handle = engine.animate(&cell, linear(100.0, 1000)).unwrap();
        for t in [0u64, 250, 500, 750, 1000] {
            render.tick(tick_at(t));
        }

        assert_eq!(
            sink.commits_for(cell.id()),
            vec![
                Value::Number(0.0),
                Value::Number(25.0),
                Value::Number(50.0),
                Value::Number(75.0),
                Value::Number(100.0),
            ]
        );
        assert_eq!(cell.read(), Value::Number(100.0));
        assert_eq!(handle.try_outcome(), Some(AnimationOutcome::Finished));
        assert_eq!(render.active_driver_count(), 0);
    }

    #[test]
    fn cancel_stops_writes_and_resolves_cancelled() {
        let (engine, render) = Engine::new(VecSink::new());
        let cell = engine.cell(0.0);

        let handle = engine.animate(&cell, linear(100.0, 1000)).unwrap();
        render.tick(tick_at(0));
        render.tick(tick_at(100));
        let gen_before = cell.generation();

        engine.cancel(&cell);
        render.tick(tick_at(200));
        render.tick(tick_at(300));

        assert_eq!(handle.try_outcome(), Some(AnimationOutcome::Cancelled));
        // No further writes from the cancelled driver.
        assert_eq!(cell.generation(), gen_before);
    }

    #[test]
    fn supersession_resolves_old_driver_cancelled_first() {
        let (engine, render) = Engine::new(VecSink::new());
        let cell = engine.cell(0.0);

        let first = engine.animate(&cell, linear(100.0, 1000)).unwrap();
        render.tick(tick_at(0));

        let second = engine.animate(&cell, linear(-50.0, 100)).unwrap();
        // Before the new driver's first tick the old handle is resolved.
        render.tick(tick_at(100));
        assert_eq!(first.try_outcome(), Some(AnimationOutcome::Cancelled));
        assert_eq!(second.try_outcome(), None);

        render.tick(tick_at(200));
        assert_eq!(second.try_outcome(), Some(AnimationOutcome::Finished));
        assert_eq!(cell.read(), Value::Number(-50.0));
    }

    #[test]
    fn direct_write_displaces_the_driver() {
        let (engine, render) = Engine::new(VecSink::new());
        let cell = engine.cell(0.0);

        let handle = engine.animate(&cell, linear(100.0, 1000)).unwrap();
        render.tick(tick_at(0));

        engine.write(&cell, 42.0);
        render.tick(tick_at(100));

        assert_eq!(handle.try_outcome(), Some(AnimationOutcome::Cancelled));
        assert_eq!(cell.read(), Value::Number(42.0));
        // The write wins and nothing further moves the cell.
        render.tick(tick_at(200));
        assert_eq!(cell.read(), Value::Number(42.0));
    }

    #[test]
    fn control_write_round_trips_through_a_tick() {
        let sink = VecSink::new();
        let (engine, render) = Engine::new(sink.clone());
        let cell = engine.cell(0.0);

        engine.write(&cell, 7.5);
        render.tick(tick_at(0));

        assert_eq!(cell.read(), Value::Number(7.5));
        assert_eq!(sink.commits_for(cell.id()), vec![Value::Number(7.5)]);
    }

    #[test]
    fn engine_write_triggers_mappers() {
        let sink = VecSink::new();
        let (engine, render) = Engine::new(sink.clone());
        let a = engine.cell(0.0);
        let b = engine.cell(0.0);

        let (ar, bw) = (a.clone(), b.clone());
        engine
            .mapper(&[&a], &[&b], move || {
                bw.write(ar.read().as_number().unwrap_or(0.0) * 2.0);
            })
            .unwrap();

        engine.write(&a, 5.0);
        render.tick(tick_at(0));

        assert_eq!(b.read(), Value::Number(10.0));
        // Both the written cell and the derived cell were committed.
        assert_eq!(sink.commits_for(a.id()), vec![Value::Number(5.0)]);
        assert_eq!(sink.commits_for(b.id()), vec![Value::Number(10.0)]);
    }

    #[test]
    fn driver_writes_propagate_to_derived_cells_each_frame() {
        let sink = VecSink::new();
        let (engine, render) = Engine::new(sink.clone());
        let a = engine.cell(0.0);
        let b = engine.cell(0.0);

        let (ar, bw) = (a.clone(), b.clone());
        engine
            .mapper(&[&a], &[&b], move || {
                bw.write(ar.read().as_number().unwrap_or(0.0) * 2.0);
            })
            .unwrap();

        engine.animate(&a, linear(10.0, 100)).unwrap();
        render.tick(tick_at(0));
        render.tick(tick_at(50));
        render.tick(tick_at(100));

        assert_eq!(b.read(), Value::Number(20.0));
        assert_eq!(
            sink.commits_for(b.id()),
            vec![Value::Number(0.0), Value::Number(10.0), Value::Number(20.0)]
        );
    }

    #[test]
    fn frame_callbacks_see_monotone_timestamps() {
        let (engine, render) = Engine::new(VecSink::new());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        engine.frame_callback(move |info| {
            s.lock().unwrap().push(info);
        });

        render.tick(FrameTick {
            timestamp: ms(100),
            delta: ms(0),
        });
        render.tick(FrameTick {
            timestamp: ms(116),
            delta: ms(16),
        });
        render.tick(FrameTick {
            timestamp: ms(148),
            delta: ms(32),
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[1].timestamp > w[0].timestamp));
        assert_eq!(seen[0].since_first, ms(0));
        assert_eq!(seen[2].since_first, ms(48));
        assert_eq!(seen[2].delta, ms(32));
    }

    #[test]
    fn paused_frame_callback_does_not_fire() {
        let (engine, render) = Engine::new(VecSink::new());
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = engine.frame_callback(move |_| {
            h.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        render.tick(tick_at(0));
        engine.set_frame_callback_active(id, false);
        render.tick(tick_at(16));
        render.tick(tick_at(32));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);

        engine.set_frame_callback_active(id, true);
        render.tick(tick_at(48));
        render.tick(tick_at(64));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn loop_unsubscribes_when_idle_and_resubscribes_on_new_work() {
        let (engine, render) = Engine::new(VecSink::new());
        let ticker = Arc::new(ManualTicker::new());
        render.attach(Arc::clone(&ticker) as Arc<dyn TickSource>);

        // Nothing to do: not subscribed.
        assert_eq!(ticker.subscriber_count(), 0);

        let cell = engine.cell(0.0);
        engine.animate(&cell, linear(10.0, 100)).unwrap();
        assert_eq!(ticker.subscriber_count(), 1);

        ticker.fire_at(ms(0));
        ticker.fire_at(ms(100));
        // Animation done: the loop let go of the tick source.
        assert_eq!(ticker.subscriber_count(), 0);
        assert_eq!(cell.read(), Value::Number(10.0));

        // New work resubscribes.
        engine.animate(&cell, linear(0.0, 100)).unwrap();
        assert_eq!(ticker.subscriber_count(), 1);
        ticker.fire_at(ms(200));
        ticker.fire_at(ms(300));
        assert_eq!(cell.read(), Value::Number(0.0));
    }

    #[test]
    fn cross_side_subscriber_arrives_via_pump() {
        let (engine, render) = Engine::new(VecSink::new());
        let cell = engine.cell(0.0);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = cell.subscribe(cadence_core::ThreadSide::Control, move |v| {
            s.lock().unwrap().push(v.clone());
        });

        // A driver write happens on the render side; the control-side
        // subscriber only runs once the control context pumps.
        engine.animate(&cell, linear(10.0, 0)).unwrap();
        render.tick(tick_at(0));
        assert!(seen.lock().unwrap().is_empty());

        engine.pump();
        assert_eq!(*seen.lock().unwrap(), vec![Value::Number(10.0)]);
    }

    #[test]
    fn pending_driver_starts_from_live_value_next_tick() {
        let (engine, render) = Engine::new(VecSink::new());
        let cell = engine.cell(0.0);

        // Write and animate queued in the same frame window, in order:
        // the write lands first, so the driver starts from 30.
        engine.write(&cell, 30.0);
        engine.animate(&cell, linear(40.0, 100)).unwrap();
        render.tick(tick_at(0));
        assert_eq!(cell.read(), Value::Number(30.0));

        render.tick(tick_at(50));
        assert_eq!(cell.read(), Value::Number(35.0));
        render.tick(tick_at(100));
        assert_eq!(cell.read(), Value::Number(40.0));
    }

    #[test]
    fn panicking_frame_callback_is_isolated() {
        let (engine, render) = Engine::new(VecSink::new());
        let cell = engine.cell(0.0);

        engine.frame_callback(|_| panic!("bad callback"));
        engine.animate(&cell, linear(10.0, 100)).unwrap();

        render.tick(tick_at(0));
        render.tick(tick_at(100));
        // The animation still completed despite the panicking callback.
        assert_eq!(cell.read(), Value::Number(10.0));
    }
}
