#![forbid(unsafe_code)]

//! Completion handles for animation requests.
//!
//! Completion is delivered through a channel-backed handle rather than a
//! bare callback: the outcome arrives exactly once, as either
//! [`AnimationOutcome::Finished`] or [`AnimationOutcome::Cancelled`], and
//! the holder polls or blocks at its own pace from any thread.

use std::sync::mpsc;

use web_time::Duration;

/// How an animation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationOutcome {
    /// The driver ran to natural completion.
    Finished,
    /// The driver was cancelled, superseded, or displaced by a direct
    /// write to its target cell.
    Cancelled,
}

/// Receiving end of an animation's completion notification.
///
/// The outcome is delivered exactly once. If the engine is torn down
/// before the animation resolves, the handle reports `None` forever.
#[derive(Debug)]
pub struct AnimationHandle {
    rx: mpsc::Receiver<AnimationOutcome>,
}

impl AnimationHandle {
    /// Non-blocking poll for the outcome.
    #[must_use]
    pub fn try_outcome(&self) -> Option<AnimationOutcome> {
        self.rx.try_recv().ok()
    }

    /// Block until the outcome arrives. Returns `None` if the engine was
    /// torn down before the animation resolved.
    #[must_use]
    pub fn wait(&self) -> Option<AnimationOutcome> {
        self.rx.recv().ok()
    }

    /// Block up to `timeout` for the outcome.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<AnimationOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Sending end, held by the frame loop. Consumes itself on first use so
/// delivery is exactly-once by construction.
#[derive(Debug)]
pub(crate) struct OutcomeSender {
    tx: Option<mpsc::Sender<AnimationOutcome>>,
}

impl OutcomeSender {
    /// Deliver the outcome. Subsequent calls are no-ops.
    pub(crate) fn resolve(&mut self, outcome: AnimationOutcome) {
        if let Some(tx) = self.tx.take() {
            // A dropped handle just means nobody is listening.
            let _ = tx.send(outcome);
        }
    }
}

/// Create a connected sender/handle pair.
pub(crate) fn outcome_channel() -> (OutcomeSender, AnimationHandle) {
    let (tx, rx) = mpsc::channel();
    (OutcomeSender { tx: Some(tx) }, AnimationHandle { rx })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_delivered_once() {
        let (mut tx, handle) = outcome_channel();
        assert_eq!(handle.try_outcome(), None);

        tx.resolve(AnimationOutcome::Finished);
        assert_eq!(handle.try_outcome(), Some(AnimationOutcome::Finished));
        assert_eq!(handle.try_outcome(), None);
    }

    #[test]
    fn second_resolve_is_ignored() {
        let (mut tx, handle) = outcome_channel();
        tx.resolve(AnimationOutcome::Cancelled);
        tx.resolve(AnimationOutcome::Finished);
        assert_eq!(handle.try_outcome(), Some(AnimationOutcome::Cancelled));
        assert_eq!(handle.try_outcome(), None);
    }

    #[test]
    fn wait_blocks_until_resolved() {
        let (mut tx, handle) = outcome_channel();
        let waiter = std::thread::spawn(move || handle.wait());
        tx.resolve(AnimationOutcome::Finished);
        assert_eq!(waiter.join().unwrap(), Some(AnimationOutcome::Finished));
    }

    #[test]
    fn dropped_sender_yields_none() {
        let (tx, handle) = outcome_channel();
        drop(tx);
        assert_eq!(handle.wait(), None);
    }

    #[test]
    fn wait_timeout_expires() {
        let (_tx, handle) = outcome_channel();
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn resolving_into_dropped_handle_is_harmless() {
        let (mut tx, handle) = outcome_channel();
        drop(handle);
        tx.resolve(AnimationOutcome::Finished);
    }
}
