//! Reactive Runtime
//!
//! The runtime connects a write to the listeners it affects.
//!
//! # How It Works
//!
//! When a signal's value changes, the runtime:
//!
//! 1. Walks the listener graph breadth-first from the signal's listeners.
//! 2. Marks every lazy listener (computed) dirty and keeps walking through
//!    its own dependents. Computeds are never recomputed here; they pull on
//!    their next read.
//! 3. Collects every eager listener (subscription) it reaches, once each, in
//!    discovery order.
//! 4. Once the whole walk is done, re-runs the collected subscriptions, or
//!    queues them if a [`batch`] is open.
//!
//! Because every dirty flag is set before any subscription runs, a
//! subscription never observes a half-updated graph.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::ReactiveContext;
use super::subscriber::{Listener, ListenerRef, NodeId};

type EffectQueue = SmallVec<[Arc<dyn Listener>; 8]>;

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: IndexMap<NodeId, Arc<dyn Listener>>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Entry points for write propagation and batching.
pub struct Runtime;

impl Runtime {
    /// Propagate a change of `source` to the given listener snapshot.
    pub(crate) fn propagate(source: NodeId, listeners: SmallVec<[ListenerRef; 8]>) {
        if listeners.is_empty() {
            return;
        }

        let effects = Self::invalidate(listeners);
        debug!(
            source = %source,
            effects = effects.len(),
            batched = Self::is_batching(),
            "propagating change"
        );

        if effects.is_empty() {
            return;
        }

        let deferred = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            if batch.depth == 0 {
                return None;
            }
            for effect in &effects {
                batch
                    .pending
                    .entry(effect.node_id())
                    .or_insert_with(|| Arc::clone(effect));
            }
            Some(())
        });

        if deferred.is_none() {
            Self::run_effects(effects);
        }
    }

    /// Mark every lazy listener reachable from `listeners` dirty and return
    /// the eager ones.
    fn invalidate(listeners: SmallVec<[ListenerRef; 8]>) -> EffectQueue {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<ListenerRef> = listeners.into_iter().collect();
        let mut effects = EffectQueue::new();

        while let Some(listener) = queue.pop_front() {
            if !visited.insert(listener.id()) {
                continue;
            }
            let Some(node) = listener.upgrade() else {
                continue;
            };
            if node.is_disposed() {
                continue;
            }

            trace!(listener = %listener.id(), "invalidating");
            node.invalidate();
            if node.is_eager() {
                effects.push(node);
            } else {
                queue.extend(node.dependents());
            }
        }

        effects
    }

    /// Re-run subscriptions. Every live subscription runs even if an earlier
    /// one fails; the first failure is resumed afterwards.
    fn run_effects(effects: EffectQueue) {
        let mut first_failure = None;

        for effect in effects {
            // Disposal may have happened during an earlier effect of this write.
            if effect.is_disposed() {
                continue;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| effect.rerun())) {
                first_failure.get_or_insert(payload);
            }
        }

        if let Some(payload) = first_failure {
            panic::resume_unwind(payload);
        }
    }

    /// Run subscriptions queued by the batch that just closed.
    fn flush() {
        loop {
            let pending: EffectQueue = BATCH.with(|batch| {
                batch
                    .borrow_mut()
                    .pending
                    .drain(..)
                    .map(|(_, effect)| effect)
                    .collect()
            });
            if pending.is_empty() {
                break;
            }
            debug!(effects = pending.len(), "flushing batch");
            Self::run_effects(pending);
        }
    }

    /// Check whether a batch is open on this thread.
    pub fn is_batching() -> bool {
        BATCH.with(|batch| batch.borrow().depth > 0)
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<NodeId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}

struct BatchGuard;

impl BatchGuard {
    fn enter() -> Self {
        BATCH.with(|batch| batch.borrow_mut().depth += 1);
        Self
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            batch.depth -= 1;
            // A failed batch does not run its queued subscriptions.
            if batch.depth == 0 && thread::panicking() {
                batch.pending.clear();
            }
        });
    }
}

/// Run `f`, deferring subscription re-runs until the outermost batch ends.
///
/// Each subscription runs at most once per batch, no matter how many of its
/// dependencies were written. Computeds read inside the batch still see the
/// latest values.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let result = {
        let _guard = BatchGuard::enter();
        f()
    };

    if !Runtime::is_batching() {
        Runtime::flush();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::subscriber::Source;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::sync::Weak;

    struct MockListener {
        id: NodeId,
        dirty: AtomicBool,
        runs: AtomicI32,
        eager: bool,
        downstream: Mutex<Vec<ListenerRef>>,
        log: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    }

    impl MockListener {
        fn new(name: &'static str, eager: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
            Arc::new(Self {
                id: NodeId::new(),
                dirty: AtomicBool::new(false),
                runs: AtomicI32::new(0),
                eager,
                downstream: Mutex::new(Vec::new()),
                log: Arc::clone(log),
                name,
            })
        }
    }

    impl Listener for MockListener {
        fn node_id(&self) -> NodeId {
            self.id
        }

        fn label(&self) -> String {
            self.name.to_string()
        }

        fn track(&self, _source_id: NodeId, _source: Weak<dyn Source>) {}

        fn invalidate(&self) {
            self.dirty.store(true, Ordering::SeqCst);
            self.log.lock().push(self.name);
        }

        fn dependents(&self) -> SmallVec<[ListenerRef; 8]> {
            self.downstream.lock().iter().cloned().collect()
        }

        fn rerun(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push("run");
        }

        fn is_eager(&self) -> bool {
            self.eager
        }
    }

    fn strong(listener: &Arc<MockListener>) -> ListenerRef {
        ListenerRef::strong(listener.clone())
    }

    #[test]
    fn runtime_notifies_subscribers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let memo = MockListener::new("memo", false, &log);
        let effect = MockListener::new("effect", true, &log);

        Runtime::propagate(NodeId::new(), [strong(&memo), strong(&effect)].into_iter().collect());

        // Both should be marked dirty
        assert!(memo.dirty.load(Ordering::SeqCst));
        assert!(effect.dirty.load(Ordering::SeqCst));

        // Only the effect is re-run (it's eager)
        assert_eq!(memo.runs.load(Ordering::SeqCst), 0);
        assert_eq!(effect.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn all_lazy_nodes_are_marked_before_effects_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let effect = MockListener::new("effect", true, &log);
        let inner = MockListener::new("inner", false, &log);
        let outer = MockListener::new("outer", false, &log);
        outer.downstream.lock().push(strong(&inner));

        Runtime::propagate(NodeId::new(), [strong(&effect), strong(&outer)].into_iter().collect());

        assert_eq!(*log.lock(), vec!["effect", "outer", "inner", "run"]);
    }

    #[test]
    fn shared_dependents_are_visited_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let left = MockListener::new("left", false, &log);
        let right = MockListener::new("right", false, &log);
        let effect = MockListener::new("effect", true, &log);
        left.downstream.lock().push(strong(&effect));
        right.downstream.lock().push(strong(&effect));

        Runtime::propagate(NodeId::new(), [strong(&left), strong(&right)].into_iter().collect());

        assert_eq!(effect.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_defers_and_coalesces_effects() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let effect = MockListener::new("effect", true, &log);

        batch(|| {
            Runtime::propagate(NodeId::new(), [strong(&effect)].into_iter().collect());
            batch(|| {
                Runtime::propagate(NodeId::new(), [strong(&effect)].into_iter().collect());
            });
            assert!(Runtime::is_batching());
            assert_eq!(effect.runs.load(Ordering::SeqCst), 0);
        });

        assert!(!Runtime::is_batching());
        assert_eq!(effect.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_batch_drops_queued_effects() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let effect = MockListener::new("effect", true, &log);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            batch(|| {
                Runtime::propagate(NodeId::new(), [strong(&effect)].into_iter().collect());
                panic!("batch body failed");
            })
        }));

        assert!(result.is_err());
        assert!(!Runtime::is_batching());
        batch(|| {});
        assert_eq!(effect.runs.load(Ordering::SeqCst), 0);
    }
}
