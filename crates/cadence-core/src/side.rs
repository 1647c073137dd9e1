#![forbid(unsafe_code)]

//! Execution-context markers.
//!
//! The engine runs across two contexts: a control context (high-level
//! orchestration, cooperatively scheduled) and a render context (driven
//! synchronously by the display refresh signal). Subscriber delivery and
//! bridge scheduling are side-aware, so the current side is tracked with a
//! thread-local marker. Threads default to [`ThreadSide::Control`]; the
//! render loop marks its thread for the duration of each tick via
//! [`RenderGuard`].

use std::cell::Cell;

/// Which execution context code is currently running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadSide {
    /// The orchestration context that creates cells, mappers, and drivers.
    Control,
    /// The context driven by the display refresh signal.
    Render,
}

impl ThreadSide {
    /// The opposite side.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            ThreadSide::Control => ThreadSide::Render,
            ThreadSide::Render => ThreadSide::Control,
        }
    }
}

thread_local! {
    static CURRENT_SIDE: Cell<ThreadSide> = const { Cell::new(ThreadSide::Control) };
}

/// The side the calling thread is currently marked as.
#[must_use]
pub fn current_side() -> ThreadSide {
    CURRENT_SIDE.with(Cell::get)
}

/// Marks the calling thread as the render side until dropped.
///
/// Re-entrant: nested guards restore the previous marker on drop.
#[derive(Debug)]
pub struct RenderGuard {
    previous: ThreadSide,
}

impl RenderGuard {
    /// Mark the current thread as [`ThreadSide::Render`].
    #[must_use]
    pub fn enter() -> Self {
        let previous = CURRENT_SIDE.with(|side| side.replace(ThreadSide::Render));
        Self { previous }
    }
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        CURRENT_SIDE.with(|side| side.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_control() {
        assert_eq!(current_side(), ThreadSide::Control);
    }

    #[test]
    fn guard_marks_render_and_restores() {
        assert_eq!(current_side(), ThreadSide::Control);
        {
            let _guard = RenderGuard::enter();
            assert_eq!(current_side(), ThreadSide::Render);
            {
                let _nested = RenderGuard::enter();
                assert_eq!(current_side(), ThreadSide::Render);
            }
            assert_eq!(current_side(), ThreadSide::Render);
        }
        assert_eq!(current_side(), ThreadSide::Control);
    }

    #[test]
    fn other_side_flips() {
        assert_eq!(ThreadSide::Control.other(), ThreadSide::Render);
        assert_eq!(ThreadSide::Render.other(), ThreadSide::Control);
    }

    #[test]
    fn spawned_threads_default_to_control() {
        let handle = std::thread::spawn(|| current_side());
        assert_eq!(handle.join().unwrap(), ThreadSide::Control);
    }
}
