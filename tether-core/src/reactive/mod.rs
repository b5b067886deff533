//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds, and
//! subscriptions. These primitives form the foundation of Tether's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed or subscription), the signal
//! automatically registers that context as a listener. When the signal's value
//! changes, all listeners are invalidated.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It is marked dirty
//! when one of its dependencies changes and re-evaluates on its next read.
//!
//! ## Subscriptions
//!
//! A Subscription is a side-effecting computation that re-runs whenever its
//! dependencies change. Subscriptions are used to push reactive state out to
//! the rest of the program, such as swapping a scheduling policy.
//!
//! ## Sampling
//!
//! [`sample`] reads values without registering dependencies on the enclosing
//! computation.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, register the dependency.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod signal;
mod context;
mod subscriber;
mod computed;
mod subscription;
mod runtime;

pub use signal::{signal, Signal};
pub use context::{sample, ReactiveContext};
pub use subscriber::{CleanupFn, Listener, ListenerRef, NodeId, Source};
pub use computed::{computed, Computed, MemoState};
pub use subscription::{
    on_cleanup, subscribe, try_subscribe, DisposeHandle, Subscription, MAX_SELF_RERUNS,
};
pub use runtime::{batch, Runtime};

pub use crate::error::ReactiveError;
