//! Node identity and the listener/source seams of the dependency graph.
//!
//! Every reactive node (signal, computed, subscription) gets a [`NodeId`].
//! Anything that can be invalidated implements [`Listener`]; anything that can
//! be read under tracking implements [`Source`]. Computeds are both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

/// Unique identifier for a node in the reactive graph.
///
/// IDs are shared across signals, computeds and subscriptions, so a computed
/// has a single identity whether it is acting as a source or as a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cleanup callback registered by a running subscription.
pub type CleanupFn = Box<dyn FnOnce() + Send + 'static>;

/// A node that can be invalidated when one of its sources changes.
///
/// Computeds are lazy (`is_eager() == false`): invalidation only flips their
/// dirty flag and the runtime keeps walking to their own dependents.
/// Subscriptions are eager: the runtime collects them and calls `rerun` once
/// every lazy node touched by the write has been marked.
pub trait Listener: Send + Sync {
    /// Identity of this listener.
    fn node_id(&self) -> NodeId;

    /// Human-readable name used in diagnostics.
    fn label(&self) -> String;

    /// Record that `source` was read during the current evaluation.
    fn track(&self, source_id: NodeId, source: Weak<dyn Source>);

    /// Mark this listener as stale.
    fn invalidate(&self);

    /// Listeners that must be invalidated transitively after this one.
    fn dependents(&self) -> SmallVec<[ListenerRef; 8]> {
        SmallVec::new()
    }

    /// Re-run the listener body (eager listeners only).
    fn rerun(&self) {}

    /// Whether invalidation should trigger an immediate re-run.
    fn is_eager(&self) -> bool;

    /// Whether the listener has been disposed and must never run again.
    fn is_disposed(&self) -> bool {
        false
    }

    /// Register a cleanup to run before the next re-run or on disposal.
    ///
    /// Returns the callback back when this listener does not support cleanups.
    fn add_cleanup(&self, cleanup: CleanupFn) -> Option<CleanupFn> {
        Some(cleanup)
    }
}

/// A node that can be read under tracking and holds a set of listeners.
pub trait Source: Send + Sync {
    /// Identity of this source.
    fn node_id(&self) -> NodeId;

    /// Add `listener` to the listener set. Idempotent per listener ID.
    fn attach(&self, listener: ListenerRef);

    /// Remove the listener with the given ID, if present.
    fn detach(&self, listener: NodeId);
}

#[derive(Clone)]
enum Link {
    Weak(Weak<dyn Listener>),
    Strong(Arc<dyn Listener>),
}

/// Reference from a source to one of its listeners.
///
/// Computeds are referenced weakly so that dropping the last handle destroys
/// them; subscriptions are referenced strongly and live until disposed.
#[derive(Clone)]
pub struct ListenerRef {
    id: NodeId,
    link: Link,
}

impl ListenerRef {
    /// A reference that does not keep the listener alive.
    pub fn weak(id: NodeId, listener: Weak<dyn Listener>) -> Self {
        Self {
            id,
            link: Link::Weak(listener),
        }
    }

    /// A reference that keeps the listener alive.
    pub fn strong(listener: Arc<dyn Listener>) -> Self {
        Self {
            id: listener.node_id(),
            link: Link::Strong(listener),
        }
    }

    /// ID of the referenced listener.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Resolve the reference, returning `None` if the listener is gone.
    pub fn upgrade(&self) -> Option<Arc<dyn Listener>> {
        match &self.link {
            Link::Weak(weak) => weak.upgrade(),
            Link::Strong(strong) => Some(Arc::clone(strong)),
        }
    }

    /// Whether the listener can still be invoked.
    pub fn is_live(&self) -> bool {
        match &self.link {
            Link::Weak(weak) => weak.strong_count() > 0,
            Link::Strong(strong) => !strong.is_disposed(),
        }
    }
}

impl std::fmt::Debug for ListenerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRef")
            .field("id", &self.id)
            .field("strong", &matches!(self.link, Link::Strong(_)))
            .finish()
    }
}

/// Ordered set of listeners held by a source.
///
/// Insertion order is preserved so that fan-out is deterministic.
#[derive(Debug, Default)]
pub(crate) struct ListenerSet {
    entries: IndexMap<NodeId, ListenerRef>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a listener; returns `false` if it was already present.
    pub(crate) fn insert(&mut self, listener: ListenerRef) -> bool {
        if self.entries.contains_key(&listener.id()) {
            return false;
        }
        self.entries.insert(listener.id(), listener);
        true
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> bool {
        self.entries.shift_remove(&id).is_some()
    }

    /// Copy out the live listeners, pruning dead entries on the way.
    pub(crate) fn snapshot(&mut self) -> SmallVec<[ListenerRef; 8]> {
        self.entries.retain(|_, listener| listener.is_live());
        self.entries.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubListener {
        id: NodeId,
    }

    impl Listener for StubListener {
        fn node_id(&self) -> NodeId {
            self.id
        }

        fn label(&self) -> String {
            format!("stub {}", self.id)
        }

        fn track(&self, _source_id: NodeId, _source: Weak<dyn Source>) {}

        fn invalidate(&self) {}

        fn is_eager(&self) -> bool {
            false
        }
    }

    fn stub_listener() -> Arc<dyn Listener> {
        Arc::new(StubListener { id: NodeId::new() })
    }

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        let id3 = NodeId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn listener_set_insert_is_idempotent() {
        let listener = stub_listener();
        let mut set = ListenerSet::new();

        assert!(set.insert(ListenerRef::strong(listener.clone())));
        assert!(!set.insert(ListenerRef::strong(listener.clone())));
        assert_eq!(set.len(), 1);

        assert!(set.remove(listener.node_id()));
        assert!(!set.remove(listener.node_id()));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn snapshot_prunes_dropped_weak_listeners() {
        let kept = stub_listener();
        let dropped = stub_listener();
        let mut set = ListenerSet::new();

        set.insert(ListenerRef::weak(kept.node_id(), Arc::downgrade(&kept)));
        set.insert(ListenerRef::weak(dropped.node_id(), Arc::downgrade(&dropped)));
        drop(dropped);

        let snapshot = set.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), kept.node_id());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let listeners: Vec<_> = (0..4).map(|_| stub_listener()).collect();
        let mut set = ListenerSet::new();
        for listener in listeners.iter().rev() {
            set.insert(ListenerRef::strong(listener.clone()));
        }

        let order: Vec<_> = set.snapshot().iter().map(ListenerRef::id).collect();
        let expected: Vec<_> = listeners.iter().rev().map(|l| l.node_id()).collect();
        assert_eq!(order, expected);
    }
}
