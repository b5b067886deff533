//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: a mutable cell that holds a
//! value and tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/subscription),
//!    the signal registers that context as a listener.
//!
//! 2. When a signal is written with a value that differs from the current one
//!    under its equality policy, the runtime invalidates every listener.
//!
//! 3. Dependent computeds are marked dirty; dependent subscriptions re-run.
//!
//! # Thread Safety
//!
//! Handles are `Send + Sync` and the value lives behind a `parking_lot`
//! lock, but dependency tracking is per thread. No lock is held while
//! listeners run, so listeners may freely read and write signals.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::subscriber::{ListenerRef, ListenerSet, NodeId, Source};
use crate::error::{self, Result};

type EqualsFn<T> = dyn Fn(&T, &T) -> bool + Send + Sync;

struct SignalInner<T> {
    id: NodeId,
    value: RwLock<T>,
    listeners: Mutex<ListenerSet>,
    equals: Box<EqualsFn<T>>,
}

impl<T> Source for SignalInner<T>
where
    T: Send + Sync + 'static,
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

/// A reactive signal holding a value of type T.
///
/// Cloning a signal yields another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies listeners)
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal that skips writes equal to the current value.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(value, |current, next| current == next)
    }

    /// Create a new signal with a custom equality policy.
    ///
    /// A write is ignored when `equals(current, next)` returns `true`. Pass
    /// `|_, _| false` to notify on every write.
    pub fn with_equality<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SignalInner {
                id: NodeId::new(),
                value: RwLock::new(value),
                listeners: Mutex::new(ListenerSet::new()),
                equals: Box::new(equals),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a listener.
    pub fn get(&self) -> T {
        if ReactiveContext::is_active() {
            ReactiveContext::track(self.inner.clone());
        }
        self.inner.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Same as [`Signal::get_untracked`].
    pub fn sample(&self) -> T {
        self.get_untracked()
    }

    /// Borrow the current value, registering a dependency like [`Signal::get`].
    ///
    /// The value stays read-locked while `f` runs; writing this signal from
    /// inside `f` deadlocks.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if ReactiveContext::is_active() {
            ReactiveContext::track(self.inner.clone());
        }
        f(&self.inner.value.read())
    }

    /// Set a new value and notify listeners.
    ///
    /// Writes equal to the current value are ignored. Dependent subscriptions
    /// re-run before this returns (unless a batch is open); a failure inside
    /// one of them is re-raised here.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.inner.value.write();
            if (self.inner.equals)(&*guard, &value) {
                trace!(signal = %self.inner.id, "write skipped: value unchanged");
                return;
            }
            *guard = value;
        }

        let listeners = self.inner.listeners.lock().snapshot();
        Runtime::propagate(self.inner.id, listeners);
    }

    /// Set a new value, returning a failure from a dependent subscription as
    /// an error instead of unwinding.
    pub fn try_set(&self, value: T) -> Result<()> {
        error::catch(|| self.set(value))
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_untracked();
        self.set(f(&current));
    }

    /// Get the number of live listeners.
    pub fn subscriber_count(&self) -> usize {
        let mut listeners = self.inner.listeners.lock();
        listeners.snapshot();
        listeners.len()
    }
}

/// Create a signal. Shorthand for [`Signal::new`].
pub fn signal<T>(value: T) -> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    Signal::new(value)
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.inner.listeners.lock().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
