//! Timing backend on top of a tokio runtime.
//!
//! Dependency tracking is per thread, so drive this backend from a
//! current-thread runtime when callbacks write signals that other
//! computations on the same thread observe.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{self, Instant};
use tracing::trace;

use super::backend::{next_frame_boundary, Callback, TimingBackend, DEFAULT_FRAME_INTERVAL};
use crate::error::{ReactiveError, Result};

/// A [`TimingBackend`] that spawns one task per request.
///
/// - Animation frames fire on a fixed grid of `frame_interval` measured from
///   the backend's creation.
/// - Idle callbacks run after the runtime has polled the tasks that were
///   already ready; the timeout is an upper bound that this always meets.
/// - Deferred callbacks run as a freshly spawned task, zero-delay timers go
///   through the timer wheel.
#[derive(Debug, Clone)]
pub struct TokioBackend {
    handle: Handle,
    origin: Instant,
    frame_interval: Duration,
}

impl TokioBackend {
    /// Create a backend that spawns onto `handle`.
    pub fn new(handle: Handle, frame_interval: Duration) -> Self {
        Self {
            handle,
            origin: Instant::now(),
            frame_interval,
        }
    }

    /// Create a backend on the runtime the caller is running in.
    pub fn from_current(frame_interval: Duration) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| ReactiveError::Backend(e.to_string()))?;
        Ok(Self::new(handle, frame_interval))
    }

    /// The configured frame interval.
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    fn next_frame(&self) -> Instant {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        self.origin + next_frame_boundary(elapsed, self.frame_interval)
    }
}

impl Default for TokioBackend {
    /// Uses the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    fn default() -> Self {
        Self::new(Handle::current(), DEFAULT_FRAME_INTERVAL)
    }
}

impl TimingBackend for TokioBackend {
    fn animation_frame(&self, callback: Callback) {
        let deadline = self.next_frame();
        trace!(?deadline, "frame requested");
        self.handle.spawn(async move {
            time::sleep_until(deadline).await;
            callback();
        });
    }

    fn after(&self, delay: Duration, callback: Callback) {
        self.handle.spawn(async move {
            time::sleep(delay).await;
            callback();
        });
    }

    fn idle(&self, timeout: Duration, callback: Callback) {
        self.handle.spawn(async move {
            // Whichever comes first: the runtime draining ready work, or the timeout.
            let _ = time::timeout(timeout, tokio::task::yield_now()).await;
            callback();
        });
    }

    fn defer(&self, callback: Callback) {
        self.handle.spawn(async move {
            callback();
        });
    }
}
