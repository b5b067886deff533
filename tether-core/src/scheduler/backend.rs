//! The timing backend contract.

use std::time::Duration;

use super::policy::SchedulerPolicy;

/// A callback handed to a timing backend.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Frame interval for a 60 Hz display.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// Mechanism that actually waits before running a callback.
///
/// Each method schedules `callback` to run exactly once, later, on the
/// backend's own terms. None of them may run the callback synchronously.
pub trait TimingBackend: Send + Sync {
    /// Run on the next frame boundary.
    fn animation_frame(&self, callback: Callback);

    /// Run once `delay` has elapsed.
    fn after(&self, delay: Duration, callback: Callback);

    /// Run when the backend is idle, but no later than `timeout`.
    fn idle(&self, timeout: Duration, callback: Callback);

    /// Run on the next turn, ahead of timers due at the same instant.
    fn defer(&self, callback: Callback);

    /// Route `callback` according to `policy`.
    fn dispatch(&self, policy: SchedulerPolicy, callback: Callback) {
        match policy {
            SchedulerPolicy::AnimationFrame => self.animation_frame(callback),
            SchedulerPolicy::Delay { .. } => self.after(policy.duration(), callback),
            SchedulerPolicy::Idle { .. } => self.idle(policy.duration(), callback),
            SchedulerPolicy::Deferred => self.defer(callback),
        }
    }
}

/// Next multiple of `interval` strictly after `now`.
pub(crate) fn next_frame_boundary(now: Duration, interval: Duration) -> Duration {
    let interval = interval.as_nanos().max(1);
    let frames = now.as_nanos() / interval + 1;
    let nanos = frames.saturating_mul(interval);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
