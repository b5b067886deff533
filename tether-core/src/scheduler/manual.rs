//! Deterministic timing backend driven by a virtual clock.
//!
//! Nothing runs until the owner advances the clock, which makes scheduling
//! reproducible in tests and in headless drivers.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::backend::{next_frame_boundary, Callback, TimingBackend, DEFAULT_FRAME_INTERVAL};

/// Tie-breaker between callbacks due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Lane {
    Deferred,
    Timer,
    Frame,
    Idle,
}

type QueueKey = (Duration, Lane, u64);

struct Entry {
    queued_at: Duration,
    callback: Callback,
}

#[derive(Default)]
struct Clock {
    now: Duration,
    seq: u64,
    queue: BTreeMap<QueueKey, Entry>,
}

/// A [`TimingBackend`] whose time only moves when told to.
///
/// - `defer` and zero-delay timers become due immediately and run on the
///   next [`flush`](ManualBackend::flush) or advance, deferred ones first.
///   One queued while the clock is being advanced waits for the next call,
///   so a loop that keeps re-arming with no delay cannot stall the clock.
/// - Animation frames are due at the next multiple of the frame interval.
/// - Idle callbacks run on [`run_idle`](ManualBackend::run_idle), or when
///   the clock passes their timeout.
pub struct ManualBackend {
    clock: Mutex<Clock>,
    frame_interval: Duration,
}

impl ManualBackend {
    /// Create a backend with the given frame interval.
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            clock: Mutex::new(Clock::default()),
            frame_interval,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Number of callbacks waiting to run.
    pub fn pending(&self) -> usize {
        self.clock.lock().queue.len()
    }

    /// The configured frame interval.
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    fn schedule(&self, lane: Lane, due_in: Duration, callback: Callback) {
        let mut clock = self.clock.lock();
        let due = clock.now + due_in;
        let seq = clock.seq;
        clock.seq += 1;
        trace!(?lane, ?due, seq, "callback scheduled");
        let queued_at = clock.now;
        clock.queue.insert((due, lane, seq), Entry { queued_at, callback });
    }

    /// Remove the next callback due by `target`. Zero-delay callbacks queued
    /// at or after `horizon` are left for a later pass.
    fn pop_due(&self, target: Duration, horizon: u64) -> Option<Callback> {
        let mut clock = self.clock.lock();
        let key = clock
            .queue
            .iter()
            .take_while(|(key, _)| key.0 <= target)
            .find(|(key, entry)| key.2 < horizon || key.0 > entry.queued_at)
            .map(|(key, _)| *key)?;
        let entry = clock.queue.remove(&key)?;
        clock.now = clock.now.max(key.0);
        Some(entry.callback)
    }

    /// Move the clock forward by `by`, running every callback that falls due,
    /// in due order. Callbacks scheduled while advancing run too if they fall
    /// due by the target, except zero-delay ones. Returns the number of
    /// callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let (target, horizon) = {
            let clock = self.clock.lock();
            (clock.now + by, clock.seq)
        };
        let mut ran = 0;

        while let Some(callback) = self.pop_due(target, horizon) {
            callback();
            ran += 1;
        }

        let mut clock = self.clock.lock();
        clock.now = clock.now.max(target);
        ran
    }

    /// Run everything that is already due without moving the clock.
    pub fn flush(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    /// Advance to the next frame boundary.
    pub fn next_frame(&self) -> usize {
        let now = self.now();
        let boundary = next_frame_boundary(now, self.frame_interval);
        self.advance(boundary - now)
    }

    /// Signal that the system is idle: run every idle callback queued so far,
    /// regardless of its timeout.
    pub fn run_idle(&self) -> usize {
        let callbacks: Vec<Callback> = {
            let mut clock = self.clock.lock();
            let keys: Vec<QueueKey> = clock
                .queue
                .keys()
                .filter(|key| key.1 == Lane::Idle)
                .copied()
                .collect();
            keys.iter()
                .filter_map(|key| clock.queue.remove(key))
                .map(|entry| entry.callback)
                .collect()
        };

        let ran = callbacks.len();
        for callback in callbacks {
            callback();
        }
        ran
    }
}

impl Default for ManualBackend {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}

impl TimingBackend for ManualBackend {
    fn animation_frame(&self, callback: Callback) {
        let now = self.now();
        let due_in = next_frame_boundary(now, self.frame_interval) - now;
        self.schedule(Lane::Frame, due_in, callback);
    }

    fn after(&self, delay: Duration, callback: Callback) {
        self.schedule(Lane::Timer, delay, callback);
    }

    fn idle(&self, timeout: Duration, callback: Callback) {
        self.schedule(Lane::Idle, timeout, callback);
    }

    fn defer(&self, callback: Callback) {
        self.schedule(Lane::Deferred, Duration::ZERO, callback);
    }
}

impl std::fmt::Debug for ManualBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualBackend")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .field("frame_interval", &self.frame_interval)
            .finish()
    }
}
