//! Scheduling Strategy
//!
//! Decides *when* a driving loop's next iteration runs. The reactive core has
//! no knowledge of which policy is active; it only sees the signal writes that
//! the loop performs.
//!
//! # Overview
//!
//! - [`SchedulerPolicy`] is the policy as data (animation frame, fixed delay,
//!   idle, deferred).
//! - [`TimingBackend`] is the mechanism that waits. [`ManualBackend`] runs on
//!   a virtual clock; [`TokioBackend`] runs on a tokio runtime.
//! - [`Scheduler`] holds the active policy. The policy is selected through a
//!   [`Signal`] and swapped by a subscription watching it, so UI code can bind
//!   a picker straight to [`Scheduler::selector`].
//! - [`FrameLoop`] is the self-rearming loop that uses all of the above.
//!
//! Switching policy affects the next request only; a callback that is already
//! waiting keeps the policy it was scheduled with.

mod backend;
mod frame_loop;
mod manual;
mod policy;
mod tokio_backend;

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::error::{ReactiveError, Result};
use crate::reactive::{Signal, Subscription};

pub use backend::{Callback, TimingBackend, DEFAULT_FRAME_INTERVAL};
pub use frame_loop::FrameLoop;
pub use manual::ManualBackend;
pub use policy::SchedulerPolicy;
pub use tokio_backend::TokioBackend;

/// The subscription that follows the selector, disposed with the last
/// scheduler handle.
struct PolicyWatcher(Subscription);

impl Drop for PolicyWatcher {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Dispatches callbacks to a timing backend according to the active policy.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    selector: Signal<SchedulerPolicy>,
    active: Arc<RwLock<SchedulerPolicy>>,
    presets: Arc<[SchedulerPolicy]>,
    backend: Arc<dyn TimingBackend>,
    watcher: Arc<PolicyWatcher>,
}

impl Scheduler {
    /// Create a scheduler over `backend`, starting with `policy` and offering
    /// the default presets.
    pub fn new(backend: Arc<dyn TimingBackend>, policy: SchedulerPolicy) -> Self {
        Self::with_presets(backend, policy, SchedulerPolicy::presets())
    }

    fn with_presets(
        backend: Arc<dyn TimingBackend>,
        policy: SchedulerPolicy,
        presets: Vec<SchedulerPolicy>,
    ) -> Self {
        let selector = Signal::new(policy);
        let active = Arc::new(RwLock::new(policy));

        let watcher = Subscription::named("scheduler-policy", {
            let selector = selector.clone();
            let active = Arc::clone(&active);
            move || {
                let next = selector.get();
                let previous = std::mem::replace(&mut *active.write(), next);
                if previous != next {
                    debug!(from = %previous, to = %next, "scheduler policy switched");
                }
            }
        });

        Self {
            selector,
            active,
            presets: presets.into(),
            backend,
            watcher: Arc::new(PolicyWatcher(watcher)),
        }
    }

    /// Create a scheduler using the policy and presets from `config`.
    pub fn from_config(config: &SchedulerConfig, backend: Arc<dyn TimingBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_presets(
            backend,
            config.policy,
            config.presets.clone(),
        ))
    }

    /// The policies offered for selection, e.g. by a picker bound to
    /// [`Scheduler::selector`].
    pub fn presets(&self) -> &[SchedulerPolicy] {
        &self.presets
    }

    /// The policy that the next request will use.
    pub fn policy(&self) -> SchedulerPolicy {
        *self.active.read()
    }

    /// Select a new policy.
    pub fn set_policy(&self, policy: SchedulerPolicy) {
        self.selector.set(policy);
    }

    /// The signal that selects the policy.
    pub fn selector(&self) -> Signal<SchedulerPolicy> {
        self.selector.clone()
    }

    /// Schedule `callback` according to the active policy.
    pub fn request_next<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let policy = self.policy();
        self.backend.dispatch(policy, Box::new(callback));
    }

    /// Stop following the selector signal. The active policy is frozen.
    ///
    /// Dropping the last handle does the same.
    pub fn shutdown(&self) {
        self.watcher.0.dispose();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("policy", &self.policy())
            .field("presets", &self.presets)
            .field("following_selector", &!self.watcher.0.is_disposed())
            .finish()
    }
}

thread_local! {
    static INSTALLED: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

fn installed() -> Result<Scheduler> {
    INSTALLED
        .with(|slot| slot.borrow().clone())
        .ok_or(ReactiveError::NoScheduler)
}

/// Install `scheduler` as this thread's scheduler, returning the previous one.
pub fn install_scheduler(scheduler: Scheduler) -> Option<Scheduler> {
    INSTALLED.with(|slot| slot.borrow_mut().replace(scheduler))
}

/// Remove and return this thread's scheduler.
pub fn take_scheduler() -> Option<Scheduler> {
    INSTALLED.with(|slot| slot.borrow_mut().take())
}

/// Select the policy of this thread's scheduler.
pub fn set_scheduler_policy(policy: SchedulerPolicy) -> Result<()> {
    installed()?.set_policy(policy);
    Ok(())
}

/// The active policy of this thread's scheduler.
pub fn scheduler_policy() -> Result<SchedulerPolicy> {
    Ok(installed()?.policy())
}

/// Schedule `callback` on this thread's scheduler.
pub fn request_next<F>(callback: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    installed()?.request_next(callback);
    Ok(())
}
