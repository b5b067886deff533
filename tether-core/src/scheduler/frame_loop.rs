//! A self-rearming driving loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::Scheduler;

struct LoopState {
    scheduler: Scheduler,
    step: Box<dyn Fn() + Send + Sync>,
    running: AtomicBool,
    iterations: AtomicU64,
}

/// Runs `step`, then asks the scheduler for the next iteration, forever.
///
/// The typical step writes a signal (a frame counter, say); everything
/// derived from that signal then updates through the reactive graph. The
/// policy in force when an iteration finishes decides when the next one runs.
#[derive(Clone)]
pub struct FrameLoop {
    state: Arc<LoopState>,
}

impl FrameLoop {
    /// Run the first iteration now and keep re-arming through `scheduler`.
    pub fn start<F>(scheduler: Scheduler, step: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let state = Arc::new(LoopState {
            scheduler,
            step: Box::new(step),
            running: AtomicBool::new(true),
            iterations: AtomicU64::new(0),
        });
        Self::tick(Arc::clone(&state));
        Self { state }
    }

    fn tick(state: Arc<LoopState>) {
        if !state.running.load(Ordering::SeqCst) {
            return;
        }

        (state.step)();
        state.iterations.fetch_add(1, Ordering::SeqCst);

        if state.running.load(Ordering::SeqCst) {
            let next = Arc::clone(&state);
            state.scheduler.request_next(move || Self::tick(next));
        }
    }

    /// Stop the loop. An iteration that is already scheduled becomes a no-op.
    pub fn stop(&self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            debug!(
                iterations = self.iterations(),
                "frame loop stopped"
            );
        }
    }

    /// Whether the loop will keep re-arming.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Number of completed iterations.
    pub fn iterations(&self) -> u64 {
        self.state.iterations.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLoop")
            .field("running", &self.is_running())
            .field("iterations", &self.iterations())
            .finish()
    }
}
