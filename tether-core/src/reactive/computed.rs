//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when one of
//! its dependencies changes.
//!
//! # How Computeds Work
//!
//! 1. On first access, the computed runs its function and caches the result.
//!
//! 2. When accessed again, if no dependency has changed, returns the cache.
//!
//! 3. When a dependency changes, the computed is marked dirty. Nothing is
//!    recomputed at that point.
//!
//! 4. On next access, the computed drops every edge from its previous run,
//!    re-runs its function under tracking and records the new edges.
//!
//! # Why This Matters
//!
//! Marking is flag-based, so a computed that sits below several paths from
//! the same signal (a diamond) recomputes once per read, not once per path.
//! Computeds that are never read stay dirty and cost nothing.
//!
//! A computed is itself a source: reading it inside another computed or a
//! subscription registers an edge, so invalidation propagates transitively.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::trace;

use super::context::{sample, ReactiveContext};
use super::subscriber::{Listener, ListenerRef, ListenerSet, NodeId, Source};
use crate::error::{self, ReactiveError, Result};

/// Dirty state for a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed (or the computed never ran). Recompute on read.
    Dirty,
}

struct ComputedNode<T> {
    id: NodeId,
    label: Option<String>,
    weak_self: Weak<ComputedNode<T>>,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    state: Mutex<MemoState>,
    /// Sources read during the last evaluation.
    dependencies: Mutex<IndexMap<NodeId, Weak<dyn Source>>>,
    listeners: Mutex<ListenerSet>,
    compute_count: Mutex<usize>,
}

/// Leaves the node dirty when its evaluation fails, so the next read retries.
struct Evaluation<'a, T> {
    node: &'a ComputedNode<T>,
}

impl<T> Drop for Evaluation<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            *self.node.state.lock() = MemoState::Dirty;
        }
    }
}

impl<T> ComputedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("computed `{}` {}", label, self.id),
            None => format!("computed {}", self.id),
        }
    }

    fn read(&self) -> T {
        // Only this thread's frames count: another thread evaluating the same
        // node concurrently is not a cycle.
        if ReactiveContext::is_evaluating(self.id) {
            ReactiveError::CyclicDependency {
                node: self.describe(),
            }
            .raise();
        }

        if ReactiveContext::is_active() {
            if let Some(me) = self.weak_self.upgrade() {
                ReactiveContext::track(me);
            }
        }

        let cached = if *self.state.lock() == MemoState::Clean {
            self.value.read().clone()
        } else {
            None
        };

        match cached {
            Some(value) => value,
            None => self.recompute(),
        }
    }

    /// Re-run the function under tracking, rebuilding the dependency set.
    fn recompute(&self) -> T {
        let _evaluation = Evaluation { node: self };

        self.detach_all();
        // Cleared before running so a write during evaluation re-dirties it.
        *self.state.lock() = MemoState::Clean;

        let listener: Weak<dyn Listener> = self.weak_self.clone();
        let new_value = {
            let _ctx = ReactiveContext::enter(ListenerRef::weak(self.id, listener));
            error::attribute(|| self.describe(), || (self.compute)())
        };

        *self.value.write() = Some(new_value.clone());
        *self.compute_count.lock() += 1;
        trace!(
            computed = %self.id,
            dependencies = self.dependencies.lock().len(),
            "recomputed"
        );

        new_value
    }

    fn detach_all(&self) {
        let previous = std::mem::take(&mut *self.dependencies.lock());
        for (_, source) in previous {
            if let Some(source) = source.upgrade() {
                source.detach(self.id);
            }
        }
    }
}

impl<T> Listener for ComputedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn label(&self) -> String {
        self.describe()
    }

    fn track(&self, source_id: NodeId, source: Weak<dyn Source>) {
        self.dependencies.lock().entry(source_id).or_insert(source);
    }

    fn invalidate(&self) {
        *self.state.lock() = MemoState::Dirty;
    }

    fn dependents(&self) -> SmallVec<[ListenerRef; 8]> {
        self.listeners.lock().snapshot()
    }

    fn is_eager(&self) -> bool {
        false
    }
}

impl<T> Source for ComputedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn attach(&self, listener: ListenerRef) {
        self.listeners.lock().insert(listener);
    }

    fn detach(&self, listener: NodeId) {
        self.listeners.lock().remove(listener);
    }
}

impl<T> Drop for ComputedNode<T> {
    fn drop(&mut self) {
        for (_, source) in self.dependencies.get_mut().drain(..) {
            if let Some(source) = source.upgrade() {
                source.detach(self.id);
            }
        }
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Cloning a computed yields another handle to the same node. When the last
/// handle is dropped the node detaches itself from all of its sources.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::{Computed, Signal};
///
/// let count = Signal::new(2);
/// let doubled = Computed::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    node: Arc<ComputedNode<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new computed with the given function.
    ///
    /// The function is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(None, compute)
    }

    /// Create a named computed. The name appears in error diagnostics.
    pub fn named<F>(label: impl Into<String>, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Some(label.into()), compute)
    }

    fn build<F>(label: Option<String>, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let node = Arc::new_cyclic(|weak_self| ComputedNode {
            id: NodeId::new(),
            label,
            weak_self: weak_self.clone(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: Mutex::new(MemoState::Dirty),
            dependencies: Mutex::new(IndexMap::new()),
            listeners: Mutex::new(ListenerSet::new()),
            compute_count: Mutex::new(0),
        });
        Self { node }
    }

    /// Get the computed's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a reactive context this also registers the current computation
    /// as a dependent.
    ///
    /// # Panics
    ///
    /// Unwinds with a [`ReactiveError`] payload if the computed is read while
    /// it is evaluating, or if its function panics. Use [`Computed::try_get`]
    /// to receive the error instead.
    pub fn get(&self) -> T {
        self.node.read()
    }

    /// Get the current value, returning evaluation failures as an error.
    pub fn try_get(&self) -> Result<T> {
        error::catch(|| self.node.read())
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        sample(|| self.node.read())
    }

    /// Same as [`Computed::get_untracked`].
    pub fn sample(&self) -> T {
        self.get_untracked()
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.node.state.lock()
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.node.value.read().is_some()
    }

    /// Number of times the function has completed.
    pub fn compute_count(&self) -> usize {
        *self.node.compute_count.lock()
    }

    /// Number of sources read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.node.dependencies.lock().len()
    }

    /// Number of live listeners reading this computed.
    pub fn dependent_count(&self) -> usize {
        let mut listeners = self.node.listeners.lock();
        listeners.snapshot();
        listeners.len()
    }
}

/// Create a computed. Shorthand for [`Computed::new`].
pub fn computed<T, F>(compute: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Computed::new(compute)
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.node.id)
            .field("label", &self.node.label)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
