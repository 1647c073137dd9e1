#![forbid(unsafe_code)]

//! Display refresh sources.
//!
//! A [`TickSource`] delivers monotonically increasing timestamps, one per
//! display refresh. The frame loop subscribes while it has work and
//! unsubscribes when idle, so an idle engine causes no wakeups.
//!
//! Two implementations ship with the runtime:
//!
//! - [`ManualTicker`] — test-driven ticks with fully deterministic
//!   timestamps.
//! - [`IntervalTicker`] — a named background thread firing at a fixed
//!   period, for hosts without a native vsync signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use web_time::{Duration, Instant};

/// One display refresh: an ephemeral timestamp + delta pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTick {
    /// Time since the source started, monotonically increasing.
    pub timestamp: Duration,
    /// Time since the previous tick (zero on the first).
    pub delta: Duration,
}

/// Callback registered with a tick source.
pub type TickFn = Arc<dyn Fn(FrameTick) + Send + Sync>;

/// Identifies one subscription on a tick source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickHandle(u64);

/// A per-display-refresh signal the frame loop can subscribe to.
pub trait TickSource: Send + Sync {
    /// Subscribe `callback` to every future tick.
    fn on_tick(&self, callback: TickFn) -> TickHandle;

    /// Remove a subscription. Unknown handles are ignored.
    fn off_tick(&self, handle: TickHandle);
}

// ---------------------------------------------------------------------------
// ManualTicker
// ---------------------------------------------------------------------------

struct Subscribers {
    entries: Mutex<Vec<(TickHandle, TickFn)>>,
    next_id: AtomicU64,
}

impl Subscribers {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn add(&self, callback: TickFn) -> TickHandle {
        let handle = TickHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .expect("subscriber lock")
            .push((handle, callback));
        handle
    }

    fn remove(&self, handle: TickHandle) {
        self.entries
            .lock()
            .expect("subscriber lock")
            .retain(|(h, _)| *h != handle);
    }

    fn snapshot(&self) -> Vec<TickFn> {
        self.entries
            .lock()
            .expect("subscriber lock")
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().expect("subscriber lock").len()
    }
}

/// Deterministic tick source driven explicitly by tests.
pub struct ManualTicker {
    subscribers: Subscribers,
    last: Mutex<Option<Duration>>,
}

impl Default for ManualTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualTicker {
    /// Create a ticker with no subscribers and no tick history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Subscribers::new(),
            last: Mutex::new(None),
        }
    }

    /// Fire a tick at an absolute timestamp. Timestamps must not go
    /// backwards; the delta is computed from the previous fire.
    pub fn fire_at(&self, timestamp: Duration) {
        let delta = {
            let mut last = self.last.lock().expect("ticker lock");
            let delta = match *last {
                Some(prev) => timestamp.saturating_sub(prev),
                None => Duration::ZERO,
            };
            *last = Some(timestamp);
            delta
        };
        let tick = FrameTick { timestamp, delta };
        for callback in self.subscribers.snapshot() {
            callback(tick);
        }
    }

    /// Fire `count` ticks spaced `step` apart, continuing from the last
    /// fired timestamp (or zero).
    pub fn fire_steps(&self, count: usize, step: Duration) {
        for _ in 0..count {
            let next = self
                .last
                .lock()
                .expect("ticker lock")
                .map_or(Duration::ZERO, |prev| prev + step);
            self.fire_at(next);
        }
    }

    /// Number of live subscriptions (lets tests assert idle behavior).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl TickSource for ManualTicker {
    fn on_tick(&self, callback: TickFn) -> TickHandle {
        self.subscribers.add(callback)
    }

    fn off_tick(&self, handle: TickHandle) {
        self.subscribers.remove(handle);
    }
}

// ---------------------------------------------------------------------------
// IntervalTicker
// ---------------------------------------------------------------------------

/// Fixed-period tick source backed by a named background thread.
///
/// The thread starts with the first subscription and exits when the last
/// subscriber leaves or the ticker is dropped.
pub struct IntervalTicker {
    period: Duration,
    subscribers: Arc<Subscribers>,
    thread: Mutex<Option<TickerThread>>,
}

/// A spawned ticker thread and its private stop flag. Each spawn owns its
/// own flag so a replacement thread can never be stopped by a stale one.
struct TickerThread {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl IntervalTicker {
    /// Create a ticker firing every `period`. The thread does not start
    /// until someone subscribes.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            subscribers: Arc::new(Subscribers::new()),
            thread: Mutex::new(None),
        }
    }

    fn ensure_thread(&self) {
        let mut slot = self.thread.lock().expect("thread lock");
        if slot.is_some() {
            return;
        }
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let subscribers = Arc::clone(&self.subscribers);
        let period = self.period;
        let handle = thread::Builder::new()
            .name("cadence-frame".into())
            .spawn(move || {
                let start = Instant::now();
                let mut last: Option<Duration> = None;
                while thread_running.load(Ordering::SeqCst) {
                    thread::sleep(period);
                    if !thread_running.load(Ordering::SeqCst) {
                        break;
                    }
                    let timestamp = start.elapsed();
                    let delta = last.map_or(Duration::ZERO, |prev| timestamp - prev);
                    last = Some(timestamp);
                    let tick = FrameTick { timestamp, delta };
                    for callback in subscribers.snapshot() {
                        callback(tick);
                    }
                }
            })
            .expect("failed to spawn frame ticker thread");
        *slot = Some(TickerThread { running, handle });
    }

    fn stop_thread(&self) {
        if let Some(t) = self.thread.lock().expect("thread lock").take() {
            t.running.store(false, Ordering::SeqCst);
            // Unsubscribing from inside a tick callback runs on the
            // ticker thread itself; it exits at the next flag check and
            // must not join itself.
            if t.handle.thread().id() != thread::current().id() {
                let _ = t.handle.join();
            }
        }
    }
}

impl TickSource for IntervalTicker {
    fn on_tick(&self, callback: TickFn) -> TickHandle {
        let handle = self.subscribers.add(callback);
        self.ensure_thread();
        handle
    }

    fn off_tick(&self, handle: TickHandle) {
        self.subscribers.remove(handle);
        if self.subscribers.len() == 0 {
            self.stop_thread();
        }
    }
}

impl Drop for IntervalTicker {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn manual_ticker_delivers_timestamp_and_delta() {
        let ticker = ManualTicker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _h = ticker.on_tick(Arc::new(move |tick| {
            s.lock().unwrap().push(tick);
        }));

        ticker.fire_at(ms(0));
        ticker.fire_at(ms(16));
        ticker.fire_at(ms(48));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].delta, ms(0));
        assert_eq!(seen[1].delta, ms(16));
        assert_eq!(seen[2].delta, ms(32));
        assert_eq!(seen[2].timestamp, ms(48));
    }

    #[test]
    fn manual_ticker_fire_steps() {
        let ticker = ManualTicker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _h = ticker.on_tick(Arc::new(move |tick| {
            s.lock().unwrap().push(tick.timestamp);
        }));

        ticker.fire_at(ms(0));
        ticker.fire_steps(3, ms(10));
        assert_eq!(*seen.lock().unwrap(), vec![ms(0), ms(10), ms(20), ms(30)]);
    }

    #[test]
    fn off_tick_stops_delivery() {
        let ticker = ManualTicker::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let handle = ticker.on_tick(Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        ticker.fire_at(ms(0));
        ticker.off_tick(handle);
        ticker.fire_at(ms(16));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(ticker.subscriber_count(), 0);
    }

    #[test]
    fn unknown_handle_ignored() {
        let ticker = ManualTicker::new();
        ticker.off_tick(TickHandle(999));
    }

    #[test]
    fn interval_ticker_fires_monotonically() {
        let ticker = IntervalTicker::new(ms(5));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let handle = ticker.on_tick(Arc::new(move |tick| {
            s.lock().unwrap().push(tick.timestamp);
        }));

        std::thread::sleep(ms(60));
        ticker.off_tick(handle);

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 2, "expected a few ticks, got {}", seen.len());
        assert!(seen.windows(2).all(|w| w[1] > w[0]), "not monotonic");
    }

    #[test]
    fn interval_ticker_stops_with_last_subscriber() {
        let ticker = IntervalTicker::new(ms(5));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let handle = ticker.on_tick(Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        std::thread::sleep(ms(30));
        ticker.off_tick(handle);
        let after_stop = hits.load(Ordering::SeqCst);
        std::thread::sleep(ms(30));
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
    }
}
