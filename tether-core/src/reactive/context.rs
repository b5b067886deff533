//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Running a computed or subscription
//! pushes a tracking frame for it; [`sample`] pushes an untracked frame that
//! hides every outer listener until it is popped. Frames are owned by RAII
//! guards, so the stack is restored on every exit path, unwinding included.
//!
//! This design supports nested reactive contexts (e.g., a computed that reads
//! from another computed, or a computed evaluated inside a sampled scope).

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use super::subscriber::{ListenerRef, NodeId, Source};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
enum Frame {
    /// A listener is evaluating; reads register edges to it.
    Tracking(ListenerRef),
    /// Reads inside this frame register no edges.
    Untracked,
}

impl Frame {
    fn node_id(&self) -> Option<NodeId> {
        match self {
            Frame::Tracking(listener) => Some(listener.id()),
            Frame::Untracked => None,
        }
    }
}

/// Guard that pops its frame when dropped.
///
/// Guards are tied to the thread that created them.
pub struct ReactiveContext {
    node_id: Option<NodeId>,
    _not_send: PhantomData<*const ()>,
}

impl ReactiveContext {
    /// Enter a tracking frame for the given listener.
    ///
    /// While the frame is innermost, every signal or computed read registers
    /// `listener` as a dependent. The frame is popped when the guard drops.
    pub fn enter(listener: ListenerRef) -> Self {
        let node_id = listener.id();
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Frame::Tracking(listener)));
        Self {
            node_id: Some(node_id),
            _not_send: PhantomData,
        }
    }

    /// Enter a frame in which reads register no dependencies.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Frame::Untracked));
        Self {
            node_id: None,
            _not_send: PhantomData,
        }
    }

    /// Check if reads would currently register a dependency.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            matches!(stack.borrow().last(), Some(Frame::Tracking(_)))
        })
    }

    /// Get the ID of the listener that reads are attributed to, if any.
    pub fn current_subscriber() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(Frame::node_id))
    }

    /// Number of frames on this thread's stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// The listener that reads are attributed to, if any.
    pub(crate) fn current_listener() -> Option<ListenerRef> {
        CONTEXT_STACK.with(|stack| match stack.borrow().last() {
            Some(Frame::Tracking(listener)) => Some(listener.clone()),
            _ => None,
        })
    }

    /// Whether `id` has a tracking frame anywhere on this thread's stack,
    /// i.e. it is evaluating further up the call chain.
    pub(crate) fn is_evaluating(id: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().iter().any(|frame| frame.node_id() == Some(id))
        })
    }

    /// The innermost evaluating listener, looking through untracked frames.
    pub(crate) fn current_owner() -> Option<ListenerRef> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().iter().rev().find_map(|frame| match frame {
                Frame::Tracking(listener) => Some(listener.clone()),
                Frame::Untracked => None,
            })
        })
    }

    /// Record an edge from `source` to the current listener.
    ///
    /// Called by signals and computeds when they are read. Does nothing
    /// outside a tracking frame.
    pub(crate) fn track(source: Arc<dyn Source>) {
        let Some(listener) = Self::current_listener() else {
            return;
        };
        let Some(node) = listener.upgrade() else {
            return;
        };

        let source_id = source.node_id();
        trace!(source = %source_id, listener = %listener.id(), "tracking dependency");
        source.attach(listener);
        node.track(source_id, Arc::downgrade(&source));
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right frame.
            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.node_id(),
                    self.node_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.node_id,
                    frame.node_id()
                );
            }
        });
    }
}

/// Run `f` without registering dependencies on the enclosing listener.
///
/// Computeds evaluated inside `f` still track their own dependencies; only
/// edges to the outer listener are suppressed.
///
/// ```rust
/// use tether_core::reactive::{sample, Signal, Subscription};
///
/// let pointer = Signal::new(3);
/// let sub = Subscription::new({
///     let pointer = pointer.clone();
///     move || {
///         let _ = sample(|| pointer.get());
///     }
/// });
/// assert_eq!(sub.dependency_count(), 0);
/// # sub.dispose();
/// ```
pub fn sample<R>(f: impl FnOnce() -> R) -> R {
    let _scope = ReactiveContext::untracked();
    f()
}
