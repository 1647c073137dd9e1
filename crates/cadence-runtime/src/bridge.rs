#![forbid(unsafe_code)]

//! Cross-thread bridge: FIFO work queues between the two contexts.
//!
//! One queue per direction, built on unbounded `std::sync::mpsc` channels.
//! Closures scheduled from the same source context onto the same target
//! run in FIFO order; there is no ordering guarantee across different
//! source contexts. The render queue is drained at the top of every frame
//! tick; the control queue is drained by [`Engine::pump`].
//!
//! # Failure Modes
//!
//! - Work still queued when the bridge is torn down is dropped silently
//!   (the target context no longer exists to run it); the drop count is
//!   logged at debug level.
//!
//! [`Engine::pump`]: crate::engine::Engine::pump

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};

use cadence_core::{CrossNotify, ThreadSide};

/// A unit of work shipped across contexts.
pub type Job = Box<dyn FnOnce() + Send>;

struct Queue {
    tx: mpsc::Sender<Job>,
    rx: Mutex<mpsc::Receiver<Job>>,
    /// Jobs scheduled but not yet executed. Lets the frame loop decide
    /// "is there pending work" without consuming the queue.
    pending: AtomicUsize,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }

    fn push(&self, job: Job) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            // Receiver gone: target context torn down.
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!("dropped job scheduled onto a torn-down context");
        }
    }

    fn drain(&self) -> usize {
        // try_lock: a drain already in progress (or a re-entrant drain
        // from inside a queued job) is a no-op, never a deadlock.
        let Ok(rx) = self.rx.try_lock() else {
            return 0;
        };
        let mut ran = 0usize;
        while let Ok(job) = rx.try_recv() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            job();
            ran += 1;
        }
        ran
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn discard(&self) -> usize {
        let rx = self.rx.lock().expect("queue lock");
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            dropped += 1;
        }
        dropped
    }
}

/// The two FIFO queues linking the control and render contexts.
pub struct Bridge {
    to_render: Queue,
    to_control: Queue,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("render_pending", &self.render_pending())
            .field("control_pending", &self.control_pending())
            .finish()
    }
}

impl Bridge {
    /// Create a bridge with empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self {
            to_render: Queue::new(),
            to_control: Queue::new(),
        }
    }

    /// Enqueue `job` for the render context. Runs at the top of the next
    /// frame tick, before drivers advance.
    pub fn schedule_on_render(&self, job: Job) {
        self.to_render.push(job);
    }

    /// Enqueue `job` for the control context. Runs at the next
    /// [`Engine::pump`].
    ///
    /// [`Engine::pump`]: crate::engine::Engine::pump
    pub fn schedule_on_control(&self, job: Job) {
        self.to_control.push(job);
    }

    /// Run every queued render-side job, in FIFO order. Called by the
    /// frame loop; returns the number of jobs executed.
    pub fn drain_render(&self) -> usize {
        self.to_render.drain()
    }

    /// Run every queued control-side job, in FIFO order.
    pub fn drain_control(&self) -> usize {
        self.to_control.drain()
    }

    /// Render-side jobs scheduled but not yet run.
    #[must_use]
    pub fn render_pending(&self) -> usize {
        self.to_render.pending()
    }

    /// Control-side jobs scheduled but not yet run.
    #[must_use]
    pub fn control_pending(&self) -> usize {
        self.to_control.pending()
    }
}

impl CrossNotify for Bridge {
    fn schedule(&self, target: ThreadSide, job: Job) {
        match target {
            ThreadSide::Render => self.schedule_on_render(job),
            ThreadSide::Control => self.schedule_on_control(job),
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let dropped = self.to_render.discard() + self.to_control.discard();
        if dropped > 0 {
            tracing::debug!(dropped, "bridge torn down with queued work");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
