#![forbid(unsafe_code)]

//! The per-frame animation driver state machine.
//!
//! A [`Driver`] advances one cell through one animation:
//! `Pending → Running → {Finished | Cancelled}`. It is pure over
//! `(tick time, live cell value)` — the runtime reads the cell, calls
//! [`Driver::advance`], and applies the returned write. The driver enters
//! `Running` on the first tick it receives, capturing that tick's
//! timestamp as `t0` and the cell's live value as the start value, so an
//! animation requested mid-frame still starts smoothly from wherever the
//! value actually is.
//!
//! Composite kinds (repeat, sequence) nest child state machines: a child
//! that finishes on one tick hands off on the *next* tick (closed-open
//! boundary), which keeps per-frame work bounded and makes handoff
//! timestamps deterministic.
//!
//! # Invariants
//!
//! 1. A timing animation's final write is exactly its destination value;
//!    no overshoot, no epsilon drift.
//! 2. A spring finishes only after displacement and velocity sit under
//!    their thresholds for a full tick, and its final write is exactly
//!    the rest position.
//! 3. A `Finished` or `Cancelled` driver never writes again.
//! 4. `advance` never panics for a spec that passed validation.

use web_time::Duration;

use cadence_core::Value;

use crate::easing::Easing;
use crate::spec::{AnimationSpec, ConfigError, DecayConfig, RepeatCount, SpringConfig};

/// Velocity magnitude (units per second) below which a decay animation
/// is considered stopped.
pub const DECAY_VELOCITY_EPSILON: f64 = 1.0;

/// Longest integration sub-step for the spring simulation. Ticks longer
/// than this are subdivided so a dropped frame cannot destabilize the
/// integrator.
const SPRING_MAX_SUBSTEP: Duration = Duration::from_millis(4);

/// Lifecycle of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Created, waiting for its first tick.
    Pending,
    /// Advancing every tick.
    Running,
    /// Completed naturally; will never write again.
    Finished,
    /// Cancelled or superseded; will never write again.
    Cancelled,
}

/// The result of advancing a driver by one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Value to store into the target cell this frame, if any.
    pub write: Option<Value>,
    /// Whether the driver reached `Finished` on this tick.
    pub finished: bool,
}

impl Step {
    fn write(value: Value) -> Self {
        Step {
            write: Some(value),
            finished: false,
        }
    }

    fn finish(value: Value) -> Self {
        Step {
            write: Some(value),
            finished: true,
        }
    }

    fn hold() -> Self {
        Step {
            write: None,
            finished: false,
        }
    }

    fn done() -> Self {
        Step {
            write: None,
            finished: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// State machine advancing one cell through one animation spec.
#[derive(Debug)]
pub struct Driver {
    state: DriverState,
    kind: KindState,
}

impl Driver {
    /// Validate `spec` against the live target value and build a driver.
    ///
    /// Fails fast on invalid parameters; nothing about the driver runs
    /// until its first tick.
    pub fn new(spec: &AnimationSpec, target: &Value) -> Result<Self, ConfigError> {
        spec.validate(target)?;
        Ok(Self {
            state: DriverState::Pending,
            kind: KindState::from_spec(spec),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Whether the driver can never write again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, DriverState::Finished | DriverState::Cancelled)
    }

    /// Move to `Cancelled` unless already terminal. Takes effect before
    /// the next tick: a cancelled driver performs no further writes.
    pub fn cancel(&mut self) {
        if !self.is_terminal() {
            self.state = DriverState::Cancelled;
        }
    }

    /// Advance by one tick. `now` is the tick timestamp; `current` is the
    /// cell's live value before this tick's write.
    pub fn advance(&mut self, now: Duration, current: &Value) -> Step {
        match self.state {
            DriverState::Finished | DriverState::Cancelled => Step::done(),
            DriverState::Pending => {
                self.kind.start(now, current.clone());
                self.state = DriverState::Running;
                self.step(now, current)
            }
            DriverState::Running => self.step(now, current),
        }
    }

    fn step(&mut self, now: Duration, current: &Value) -> Step {
        let step = self.kind.step(now, current);
        if step.finished {
            self.state = DriverState::Finished;
        }
        step
    }
}

// ---------------------------------------------------------------------------
// Per-kind state
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum KindState {
    Timing(TimingState),
    Spring(SpringState),
    Decay(DecayState),
    Delay(DelayState),
    Repeat(RepeatState),
    Sequence(SequenceState),
}

impl KindState {
    fn from_spec(spec: &AnimationSpec) -> Self {
        match spec {
            AnimationSpec::Timing { to, config } => KindState::Timing(TimingState {
                to: to.clone(),
                duration: config.duration,
                easing: config.easing.clone(),
                t0: Duration::ZERO,
                from: Value::Number(0.0),
                snap: false,
            }),
            AnimationSpec::Spring { to, config } => KindState::Spring(SpringState {
                config: config.clone(),
                to: to.as_number().unwrap_or(0.0),
                x: 0.0,
                v: 0.0,
                t0: Duration::ZERO,
                last: Duration::ZERO,
                at_rest_prev: false,
                snap: false,
            }),
            AnimationSpec::Decay { config } => KindState::Decay(DecayState {
                config: config.clone(),
                x: 0.0,
                v: 0.0,
                last: Duration::ZERO,
                degenerate: false,
            }),
            AnimationSpec::Delay { duration } => KindState::Delay(DelayState {
                duration: *duration,
                t0: Duration::ZERO,
            }),
            AnimationSpec::Repeat {
                child,
                count,
                reverse,
            } => KindState::Repeat(RepeatState {
                template: (**child).clone(),
                count: *count,
                reverse: *reverse,
                child: Box::new(KindState::from_spec(child)),
                base_from: Value::Number(0.0),
                completed: 0,
                pending_restart: false,
            }),
            AnimationSpec::Sequence(children) => KindState::Sequence(SequenceState {
                child: Box::new(KindState::from_spec(&children[0])),
                specs: children.clone(),
                idx: 0,
                pending_next: false,
            }),
        }
    }

    /// Capture `t0` and the start value. Called exactly once, on the
    /// first tick after (re)activation.
    fn start(&mut self, t0: Duration, from: Value) {
        match self {
            KindState::Timing(s) => {
                s.t0 = t0;
                s.snap = from.lerp(&s.to, 0.0).is_none();
                if s.snap {
                    tracing::warn!("timing start value changed shape; snapping to destination");
                }
                s.from = from;
            }
            KindState::Spring(s) => {
                s.t0 = t0;
                s.last = t0;
                s.v = s.config.initial_velocity;
                match from.as_number() {
                    Some(n) => s.x = n,
                    None => {
                        tracing::warn!("spring start value is not a number; snapping to rest");
                        s.snap = true;
                    }
                }
            }
            KindState::Decay(s) => {
                s.last = t0;
                s.v = s.config.velocity;
                match from.as_number() {
                    Some(n) => s.x = n,
                    None => {
                        tracing::warn!("decay start value is not a number; finishing");
                        s.degenerate = true;
                    }
                }
            }
            KindState::Delay(s) => s.t0 = t0,
            KindState::Repeat(s) => {
                s.base_from = from.clone();
                s.child.start(t0, from);
            }
            KindState::Sequence(s) => s.child.start(t0, from),
        }
    }

    fn step(&mut self, now: Duration, current: &Value) -> Step {
        match self {
            KindState::Timing(s) => s.step(now),
            KindState::Spring(s) => s.step(now),
            KindState::Decay(s) => s.step(now),
            KindState::Delay(s) => s.step(now),
            KindState::Repeat(s) => s.step(now, current),
            KindState::Sequence(s) => s.step(now, current),
        }
    }
}

// ── timing ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct TimingState {
    to: Value,
    duration: Duration,
    easing: Easing,
    t0: Duration,
    from: Value,
    snap: bool,
}

impl TimingState {
    fn step(&mut self, now: Duration) -> Step {
        if self.snap {
            return Step::finish(self.to.clone());
        }
        let elapsed = now.saturating_sub(self.t0);
        if elapsed >= self.duration {
            // Final frame writes exactly the destination.
            return Step::finish(self.to.clone());
        }
        let p = self
            .easing
            .apply(elapsed.as_secs_f64() / self.duration.as_secs_f64());
        match self.from.lerp(&self.to, p) {
            Some(value) => Step::write(value),
            // Unreachable after the start-time shape check; stay total.
            None => Step::finish(self.to.clone()),
        }
    }
}

// ── spring ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SpringState {
    config: SpringConfig,
    to: f64,
    x: f64,
    v: f64,
    t0: Duration,
    last: Duration,
    at_rest_prev: bool,
    snap: bool,
}

impl SpringState {
    fn step(&mut self, now: Duration) -> Step {
        if self.snap {
            return Step::finish(Value::Number(self.to));
        }
        if let Some(max) = self.config.max_duration
            && now.saturating_sub(self.t0) >= max
        {
            return Step::finish(Value::Number(self.to));
        }

        // Semi-implicit Euler over bounded sub-steps.
        let mut t = self.last;
        while t < now {
            let dt = (now - t).min(SPRING_MAX_SUBSTEP);
            let dt_s = dt.as_secs_f64();
            let accel = (-self.config.stiffness * (self.x - self.to)
                - self.config.damping * self.v)
                / self.config.mass;
            self.v += accel * dt_s;
            self.x += self.v * dt_s;
            t += dt;
        }
        self.last = now;

        let at_rest = (self.x - self.to).abs() < self.config.rest_displacement
            && self.v.abs() < self.config.rest_velocity;
        if at_rest && self.at_rest_prev {
            // Two consecutive settled samples: snap exactly to rest.
            return Step::finish(Value::Number(self.to));
        }
        self.at_rest_prev = at_rest;
        Step::write(Value::Number(self.x))
    }
}

// ── decay ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct DecayState {
    config: DecayConfig,
    x: f64,
    v: f64,
    last: Duration,
    degenerate: bool,
}

impl DecayState {
    fn step(&mut self, now: Duration) -> Step {
        if self.degenerate {
            return Step::done();
        }
        let dt_ms = now.saturating_sub(self.last).as_secs_f64() * 1000.0;
        self.last = now;
        if dt_ms > 0.0 {
            // Closed-form geometric decay over the tick.
            let kv = self.config.deceleration.powf(dt_ms);
            self.x += self.v / 1000.0 * (kv - 1.0) / self.config.deceleration.ln();
            self.v *= kv;
        }
        if self.v.abs() < DECAY_VELOCITY_EPSILON {
            Step::finish(Value::Number(self.x))
        } else {
            Step::write(Value::Number(self.x))
        }
    }
}

// ── delay ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct DelayState {
    duration: Duration,
    t0: Duration,
}

impl DelayState {
    fn step(&mut self, now: Duration) -> Step {
        // Holds the start value verbatim: no write of its own, ever.
        if now.saturating_sub(self.t0) >= self.duration {
            Step::done()
        } else {
            Step::hold()
        }
    }
}

// ── repeat ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct RepeatState {
    template: AnimationSpec,
    count: RepeatCount,
    reverse: bool,
    child: Box<KindState>,
    base_from: Value,
    completed: u32,
    pending_restart: bool,
}

impl RepeatState {
    fn step(&mut self, now: Duration, current: &Value) -> Step {
        if self.pending_restart {
            self.pending_restart = false;
            let backward = self.reverse && self.completed % 2 == 1;
            let (spec, from) = if backward {
                reversed_iteration(&self.template, &self.base_from)
            } else {
                (self.template.clone(), self.base_from.clone())
            };
            self.child = Box::new(KindState::from_spec(&spec));
            self.child.start(now, from);
        }

        let step = self.child.step(now, current);
        if !step.finished {
            return step;
        }
        self.completed += 1;
        let exhausted = match self.count {
            RepeatCount::Finite(n) => self.completed >= n,
            RepeatCount::Infinite => false,
        };
        if exhausted {
            return step;
        }
        // Restart with a fresh t0 on the next tick.
        self.pending_restart = true;
        Step {
            write: step.write,
            finished: false,
        }
    }
}

/// The spec and start value for a backward iteration: endpoints swapped.
fn reversed_iteration(template: &AnimationSpec, base_from: &Value) -> (AnimationSpec, Value) {
    match template {
        AnimationSpec::Timing { to, config } => (
            AnimationSpec::Timing {
                to: base_from.clone(),
                config: config.clone(),
            },
            to.clone(),
        ),
        AnimationSpec::Spring { to, config } => (
            AnimationSpec::Spring {
                to: base_from.clone(),
                config: config.clone(),
            },
            to.clone(),
        ),
        // Delay has no endpoints; a backward delay is the same delay.
        // Validation rejects every other child kind under reverse.
        other => (other.clone(), base_from.clone()),
    }
}

// ── sequence ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SequenceState {
    specs: Vec<AnimationSpec>,
    idx: usize,
    child: Box<KindState>,
    pending_next: bool,
}

impl SequenceState {
    fn step(&mut self, now: Duration, current: &Value) -> Step {
        if self.pending_next {
            self.pending_next = false;
            self.idx += 1;
            self.child = Box::new(KindState::from_spec(&self.specs[self.idx]));
            // The next child starts from the live value, exactly like a
            // freshly installed driver.
            self.child.start(now, current.clone());
        }

        let step = self.child.step(now, current);
        if !step.finished {
            return step;
        }
        if self.idx + 1 == self.specs.len() {
            return step;
        }
        // Closed-open handoff: the next child activates next tick.
        self.pending_next = true;
        Step {
            write: step.write,
            finished: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::spec::TimingConfig;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn timing_final_value_is_always_exact(
            from in -1e6f64..1e6,
            to in -1e6f64..1e6,
            duration_ms in 1u64..5_000,
        ) {
            let spec = AnimationSpec::timing(to, TimingConfig {
                duration: Duration::from_millis(duration_ms),
                easing: Easing::default(),
            });
            let start = Value::Number(from);
            let mut driver = Driver::new(&spec, &start).unwrap();
            driver.advance(Duration::ZERO, &start);
            let step = driver.advance(Duration::from_millis(duration_ms), &start);
            prop_assert_eq!(step.write, Some(Value::Number(to)));
            prop_assert!(step.finished);
        }

        #[test]
        fn spring_always_terminates_and_snaps(
            from in -1e3f64..1e3,
            to in -1e3f64..1e3,
            stiffness in 10.0f64..500.0,
            damping in 1.0f64..50.0,
        ) {
            let spec = AnimationSpec::spring(to, SpringConfig {
                stiffness,
                damping,
                max_duration: Some(Duration::from_secs(30)),
                ..SpringConfig::default()
            });
            let start = Value::Number(from);
            let mut driver = Driver::new(&spec, &start).unwrap();
            let mut value = start.clone();
            let mut finished = false;
            for i in 0..4_000u64 {
                let step = driver.advance(Duration::from_millis(16 * i), &value);
                if let Some(v) = &step.write {
                    value = v.clone();
                }
                if step.finished {
                    finished = true;
                    break;
                }
            }
            prop_assert!(finished, "spring never settled");
            prop_assert_eq!(value, Value::Number(to));
        }
    }
}
