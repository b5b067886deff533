//! Subscription Implementation
//!
//! A Subscription is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Subscriptions Work
//!
//! 1. When created, the subscription runs its function immediately to
//!    establish initial dependencies.
//!
//! 2. When any dependency changes, the subscription re-runs synchronously
//!    inside the write (or when the enclosing [`batch`](super::batch) ends).
//!
//! 3. Before re-running, the subscription runs its cleanups, drops every edge
//!    from its previous run and tracks new ones during execution.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; subscriptions do not.
//! - Computeds are lazy (compute on access); subscriptions are eager.
//! - Signals hold subscriptions strongly: a subscription stays alive until it
//!   is disposed, even if every handle to it is dropped.
//!
//! # Cleanup
//!
//! # Self-writes
//!
//! A subscription that writes one of its own dependencies is not re-entered.
//! The write marks it for another run, which starts as soon as the current
//! run returns. A subscription that is still re-triggering itself after
//! [`MAX_SELF_RERUNS`] such runs fails with [`ReactiveError::Runaway`].
//!
//! A running subscription can register cleanups with [`on_cleanup`]. They run
//! before the next re-run and when the subscription is disposed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::context::ReactiveContext;
use super::subscriber::{CleanupFn, Listener, ListenerRef, NodeId, Source};
use crate::error::{self, ReactiveError, Result};

/// Upper bound on back-to-back runs caused by a subscription's own writes.
pub const MAX_SELF_RERUNS: usize = 100;

struct SubscriptionNode {
    id: NodeId,
    label: Option<String>,
    weak_self: Weak<SubscriptionNode>,
    effect: Box<dyn Fn() + Send + Sync>,
    dependencies: Mutex<IndexMap<NodeId, Weak<dyn Source>>>,
    cleanups: Mutex<Vec<CleanupFn>>,
    disposed: AtomicBool,
    running: AtomicBool,
    rerun_pending: AtomicBool,
    run_count: AtomicUsize,
}

/// Resets the running and pending flags on every exit path.
struct Running<'a> {
    running: &'a AtomicBool,
    pending: &'a AtomicBool,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.pending.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

impl SubscriptionNode {
    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("subscription `{}` {}", label, self.id),
            None => format!("subscription {}", self.id),
        }
    }

    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(subscription = %self.id, "re-entrant trigger deferred until the current run returns");
            self.rerun_pending.store(true, Ordering::SeqCst);
            return;
        }
        let _running = Running {
            running: &self.running,
            pending: &self.rerun_pending,
        };

        self.run_once();

        let mut reruns = 0;
        while self.rerun_pending.swap(false, Ordering::SeqCst) && !self.is_disposed() {
            reruns += 1;
            if reruns > MAX_SELF_RERUNS {
                ReactiveError::Runaway {
                    node: self.describe(),
                    reruns: MAX_SELF_RERUNS,
                }
                .raise();
            }
            self.run_once();
        }
    }

    fn run_once(&self) {
        self.run_cleanups();
        self.detach_all();

        let Some(me) = self.weak_self.upgrade() else {
            return;
        };
        {
            let _ctx = ReactiveContext::enter(ListenerRef::strong(me));
            error::attribute(|| self.describe(), || (self.effect)());
        }

        self.run_count.fetch_add(1, Ordering::SeqCst);
    }

    fn detach_all(&self) {
        let previous = std::mem::take(&mut *self.dependencies.lock());
        for (_, source) in previous {
            if let Some(source) = source.upgrade() {
                source.detach(self.id);
            }
        }
    }

    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in cleanups {
            cleanup();
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(subscription = %self.id, "disposing");
        self.detach_all();
        self.run_cleanups();
    }
}

impl Listener for SubscriptionNode {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn label(&self) -> String {
        self.describe()
    }

    fn track(&self, source_id: NodeId, source: Weak<dyn Source>) {
        self.dependencies.lock().entry(source_id).or_insert(source);
    }

    fn invalidate(&self) {}

    fn rerun(&self) {
        self.execute();
    }

    fn is_eager(&self) -> bool {
        true
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn add_cleanup(&self, cleanup: CleanupFn) -> Option<CleanupFn> {
        if self.is_disposed() {
            return Some(cleanup);
        }
        self.cleanups.lock().push(cleanup);
        None
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// This handle is also the subscription's dispose handle. Dropping it does
/// not dispose the subscription; call [`Subscription::dispose`].
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use tether_core::reactive::{Signal, Subscription};
///
/// let count = Signal::new(0);
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let sub = Subscription::new({
///     let (count, seen) = (count.clone(), seen.clone());
///     move || seen.lock().unwrap().push(count.get())
/// });
///
/// count.set(5);
/// sub.dispose();
/// count.set(6);
///
/// assert_eq!(*seen.lock().unwrap(), vec![0, 5]);
/// ```
#[derive(Clone)]
pub struct Subscription {
    node: Arc<SubscriptionNode>,
}

/// Handle returned by [`subscribe`]; disposing it stops the subscription.
pub type DisposeHandle = Subscription;

impl Subscription {
    /// Create a new subscription with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    ///
    /// # Panics
    ///
    /// Unwinds with a [`ReactiveError`](crate::ReactiveError) payload if the
    /// first run fails. Use [`Subscription::try_new`] to receive the error.
    pub fn new<F>(effect: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(None, effect)
    }

    /// Create a named subscription. The name appears in error diagnostics.
    pub fn named<F>(label: impl Into<String>, effect: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(Some(label.into()), effect)
    }

    /// Create a subscription, returning a failure of the first run as an
    /// error. A subscription whose first run failed is disposed.
    pub fn try_new<F>(effect: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::start(Self::node(None, effect))
    }

    /// Run a fresh node for the first time. A node whose first run failed is
    /// disposed, so nothing it tracked before failing keeps it alive.
    fn start(node: Arc<SubscriptionNode>) -> Result<Self> {
        match error::catch(|| node.execute()) {
            Ok(()) => Ok(Self { node }),
            Err(err) => {
                node.dispose();
                Err(err)
            }
        }
    }

    fn node<F>(label: Option<String>, effect: F) -> Arc<SubscriptionNode>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new_cyclic(|weak_self| SubscriptionNode {
            id: NodeId::new(),
            label,
            weak_self: weak_self.clone(),
            effect: Box::new(effect),
            dependencies: Mutex::new(IndexMap::new()),
            cleanups: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            rerun_pending: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        })
    }

    fn build<F>(label: Option<String>, effect: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        match Self::start(Self::node(label, effect)) {
            Ok(subscription) => subscription,
            Err(err) => err.raise(),
        }
    }

    /// Get the subscription's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// Dispose of the subscription.
    ///
    /// Detaches from every dependency and runs pending cleanups. After
    /// disposal the subscription never runs again. Idempotent.
    pub fn dispose(&self) {
        self.node.dispose();
    }

    /// Check if the subscription has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.node.is_disposed()
    }

    /// Get the number of times the subscription has completed a run.
    pub fn run_count(&self) -> usize {
        self.node.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies from the last run.
    pub fn dependency_count(&self) -> usize {
        self.node.dependencies.lock().len()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.node.id)
            .field("label", &self.node.label)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Create a subscription. Shorthand for [`Subscription::new`].
pub fn subscribe<F>(effect: F) -> DisposeHandle
where
    F: Fn() + Send + Sync + 'static,
{
    Subscription::new(effect)
}

/// Create a subscription, returning a failed first run as an error.
pub fn try_subscribe<F>(effect: F) -> Result<DisposeHandle>
where
    F: Fn() + Send + Sync + 'static,
{
    Subscription::try_new(effect)
}

/// Register a cleanup on the subscription that is currently running.
///
/// The cleanup runs before the subscription's next run and when it is
/// disposed. Returns `false` (and drops `cleanup`) when no subscription is
/// running.
pub fn on_cleanup<F>(cleanup: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    let owner = ReactiveContext::current_owner().and_then(|owner| owner.upgrade());
    let Some(owner) = owner else {
        warn!("on_cleanup called outside of a running subscription");
        return false;
    };

    match owner.add_cleanup(Box::new(cleanup)) {
        None => true,
        Some(_) => {
            warn!(owner = %owner.label(), "on_cleanup ignored: owner does not run cleanups");
            false
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
