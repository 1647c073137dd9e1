#![forbid(unsafe_code)]

//! Cross-thread shared mutable cells.
//!
//! A [`SharedCell`] is one value slot visible from both execution contexts.
//! The storage lives behind a reference-counted, mutex-guarded slot;
//! cloning a cell clones the reference, never the data. A write:
//!
//! 1. stores the value and increments the generation counter atomically
//!    with respect to other writers,
//! 2. synchronously invokes subscribers registered for the writing side,
//! 3. schedules delivery to subscribers on the other side through the
//!    attached [`CrossNotify`] scheduler (never synchronously, so a write
//!    can never stall on the other context).
//!
//! # Invariants
//!
//! 1. A reader on any context observes either the value before or after a
//!    write, never a torn intermediate.
//! 2. The generation counter increments exactly once per write.
//! 3. Same-side subscribers are invoked in registration order.
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification.
//!
//! # Failure Modes
//!
//! - A panicking subscriber is caught and logged; remaining subscribers
//!   still run and the write itself is unaffected.
//! - With no [`CrossNotify`] attached (standalone cell, single context),
//!   other-side subscribers are invoked synchronously as a fallback.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::side::{ThreadSide, current_side};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a cell, stable across all handles to the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Cross-context scheduling seam
// ---------------------------------------------------------------------------

/// Scheduler used to deliver subscriber callbacks to the other context.
///
/// Implemented by the runtime's bridge; cells created through an engine
/// have one attached. The only requirement is FIFO delivery per target.
pub trait CrossNotify: Send + Sync {
    /// Enqueue `job` for asynchronous execution on `target`.
    fn schedule(&self, target: ThreadSide, job: Box<dyn FnOnce() + Send>);
}

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscriber {
    id: u64,
    side: ThreadSide,
    callback: Callback,
}

struct CellInner {
    id: CellId,
    value: Mutex<Value>,
    generation: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber: AtomicU64,
    notifier: Mutex<Option<Arc<dyn CrossNotify>>>,
}

/// A cross-thread-visible mutable value holder with change notification.
///
/// Cheap to clone; all clones share one slot. The cell is destroyed when
/// the last handle drops.
#[derive(Clone)]
pub struct SharedCell {
    inner: Arc<CellInner>,
}

impl std::fmt::Debug for SharedCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.lock().expect("cell lock"))
            .field("generation", &self.generation())
            .finish()
    }
}

impl SharedCell {
    /// Create a standalone cell holding `initial`.
    #[must_use]
    pub fn new(initial: impl Into<Value>) -> Self {
        Self {
            inner: Arc::new(CellInner {
                id: CellId(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed)),
                value: Mutex::new(initial.into()),
                generation: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(1),
                notifier: Mutex::new(None),
            }),
        }
    }

    /// The cell's stable identity.
    #[must_use]
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Current value. Observable immediately after any prior visible write.
    #[must_use]
    pub fn read(&self) -> Value {
        self.inner.value.lock().expect("cell lock").clone()
    }

    /// Current generation. Increments exactly once per write, so comparing
    /// against a remembered generation detects changes without locking.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Attach the cross-context scheduler. Called by the engine when the
    /// cell is created through it; later writes route other-side
    /// notifications through the scheduler.
    pub fn attach_notifier(&self, notifier: Arc<dyn CrossNotify>) {
        *self.inner.notifier.lock().expect("notifier lock") = Some(notifier);
    }

    /// Store `value`, bump the generation, and notify subscribers.
    ///
    /// A total function over [`Value`]; never fails. The writing side is
    /// taken from the calling thread's marker.
    pub fn write(&self, value: impl Into<Value>) {
        let value = value.into();
        let side = current_side();
        {
            let mut slot = self.inner.value.lock().expect("cell lock");
            *slot = value.clone();
            self.inner.generation.fetch_add(1, Ordering::Release);
        }

        let (same_side, cross_side): (Vec<Callback>, Vec<Callback>) = {
            let subscribers = self.inner.subscribers.lock().expect("subscriber lock");
            let same = subscribers
                .iter()
                .filter(|s| s.side == side)
                .map(|s| Arc::clone(&s.callback))
                .collect();
            let cross = subscribers
                .iter()
                .filter(|s| s.side != side)
                .map(|s| Arc::clone(&s.callback))
                .collect();
            (same, cross)
        };

        for callback in same_side {
            invoke_subscriber(self.inner.id, &callback, &value);
        }

        if cross_side.is_empty() {
            return;
        }
        let notifier = self.inner.notifier.lock().expect("notifier lock").clone();
        match notifier {
            Some(notifier) => {
                let id = self.inner.id;
                for callback in cross_side {
                    let value = value.clone();
                    notifier.schedule(
                        side.other(),
                        Box::new(move || invoke_subscriber(id, &callback, &value)),
                    );
                }
            }
            // Standalone cell: only one context exists, deliver in place.
            None => {
                for callback in cross_side {
                    invoke_subscriber(self.inner.id, &callback, &value);
                }
            }
        }
    }

    /// Register `callback` for delivery on `side`. Same-side writes invoke
    /// it synchronously; writes from the other side deliver through the
    /// attached scheduler. Dropping the returned guard unsubscribes.
    #[must_use]
    pub fn subscribe(
        &self,
        side: ThreadSide,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .expect("subscriber lock")
            .push(Subscriber {
                id,
                side,
                callback: Arc::new(callback),
            });
        Subscription {
            cell: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Number of live subscribers (diagnostics).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().expect("subscriber lock").len()
    }
}

fn invoke_subscriber(id: CellId, callback: &Callback, value: &Value) {
    if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
        tracing::warn!(cell = %id, "subscriber panicked; continuing");
    }
}

// ---------------------------------------------------------------------------
// Subscription guard
// ---------------------------------------------------------------------------

/// RAII guard for a cell subscription; dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    cell: Weak<CellInner>,
    id: u64,
}

impl std::fmt::Debug for CellInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellInner").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.cell.upgrade() {
            inner
                .subscribers
                .lock()
                .expect("subscriber lock")
                .retain(|s| s.id != self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::side::RenderGuard;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn read_after_write() {
        let cell = SharedCell::new(0.0);
        cell.write(42.0);
        assert_eq!(cell.read(), Value::Number(42.0));
    }

    #[test]
    fn generation_increments_per_write() {
        let cell = SharedCell::new(0.0);
        assert_eq!(cell.generation(), 0);
        cell.write(1.0);
        cell.write(1.0); // same value still counts as a write
        assert_eq!(cell.generation(), 2);
    }

    #[test]
    fn clones_share_the_slot() {
        let a = SharedCell::new(0.0);
        let b = a.clone();
        b.write(7.0);
        assert_eq!(a.read(), Value::Number(7.0));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn distinct_cells_have_distinct_ids() {
        assert_ne!(SharedCell::new(0.0).id(), SharedCell::new(0.0).id());
    }

    #[test]
    fn same_side_subscriber_is_synchronous() {
        let cell = SharedCell::new(0.0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = cell.subscribe(ThreadSide::Control, move |v| {
            seen_clone.lock().unwrap().push(v.clone());
        });

        cell.write(1.0);
        cell.write(2.0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Value::Number(1.0), Value::Number(2.0)]
        );
    }

    #[test]
    fn subscribers_notified_in_registration_order() {
        let cell = SharedCell::new(0.0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = Arc::clone(&order);
        let o2 = Arc::clone(&order);
        let _s1 = cell.subscribe(ThreadSide::Control, move |_| o1.lock().unwrap().push(1));
        let _s2 = cell.subscribe(ThreadSide::Control, move |_| o2.lock().unwrap().push(2));

        cell.write(1.0);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let cell = SharedCell::new(0.0);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let sub = cell.subscribe(ThreadSide::Control, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        cell.write(1.0);
        drop(sub);
        cell.write(2.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn standalone_cell_delivers_cross_side_in_place() {
        let cell = SharedCell::new(0.0);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let _sub = cell.subscribe(ThreadSide::Render, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        // No notifier attached: render-side subscriber runs synchronously.
        cell.write(1.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    struct RecordingNotify {
        jobs: Mutex<Vec<(ThreadSide, Box<dyn FnOnce() + Send>)>>,
    }

    impl CrossNotify for RecordingNotify {
        fn schedule(&self, target: ThreadSide, job: Box<dyn FnOnce() + Send>) {
            self.jobs.lock().unwrap().push((target, job));
        }
    }

    #[test]
    fn cross_side_delivery_goes_through_notifier() {
        let cell = SharedCell::new(0.0);
        let notify = Arc::new(RecordingNotify {
            jobs: Mutex::new(Vec::new()),
        });
        cell.attach_notifier(Arc::clone(&notify) as Arc<dyn CrossNotify>);

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let _sub = cell.subscribe(ThreadSide::Render, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        cell.write(5.0);
        // Not delivered synchronously.
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let mut jobs = notify.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0, ThreadSide::Render);
        let (_, job) = jobs.pop().unwrap();
        job();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn render_side_write_notifies_render_subscribers_synchronously() {
        let cell = SharedCell::new(0.0);
        let notify = Arc::new(RecordingNotify {
            jobs: Mutex::new(Vec::new()),
        });
        cell.attach_notifier(Arc::clone(&notify) as Arc<dyn CrossNotify>);

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let _sub = cell.subscribe(ThreadSide::Render, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        let _guard = RenderGuard::enter();
        cell.write(5.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(notify.jobs.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let cell = SharedCell::new(0.0);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let _bad = cell.subscribe(ThreadSide::Control, |_| panic!("boom"));
        let _good = cell.subscribe(ThreadSide::Control, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        cell.write(1.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_writes_are_never_torn() {
        let cell = SharedCell::new(Value::vector(&[0.0, 0.0]));
        let barrier = Arc::new(Barrier::new(3));
        let writers: Vec<_> = [1.0f64, 2.0]
            .into_iter()
            .map(|n| {
                let cell = cell.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..1000 {
                        cell.write(Value::vector(&[n, n]));
                    }
                })
            })
            .collect();

        let reader = {
            let cell = cell.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..1000 {
                    match cell.read() {
                        Value::Vector(v) => assert_eq!(v[0], v[1], "torn read"),
                        other => panic!("unexpected value {other:?}"),
                    }
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
    }
}
