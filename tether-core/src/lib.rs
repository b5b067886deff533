//! Tether Core
//!
//! This crate provides the core runtime for the Tether fine-grained reactive
//! library. It implements:
//!
//! - Reactive primitives (signals, computeds, subscriptions)
//! - Automatic dependency tracking with sampling and batching
//! - Pluggable scheduling policies for driving loops
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `scheduler`: Scheduling policies, timing backends and the frame loop
//! - `config`: Serde-backed runtime configuration
//! - `error`: The error taxonomy shared by all of the above
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use tether_core::reactive::{Computed, Signal, Subscription};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = Computed::new({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create a subscription
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let sub = Subscription::new({
//!     let (count, doubled, log) = (count.clone(), doubled.clone(), log.clone());
//!     move || log.lock().unwrap().push((count.get(), doubled.get()))
//! });
//!
//! // Update the signal; the subscription runs again before `set` returns
//! count.set(5);
//! assert_eq!(*log.lock().unwrap(), vec![(0, 0), (5, 10)]);
//! # sub.dispose();
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod scheduler;

pub use config::{RuntimeConfig, SchedulerConfig};
pub use error::{ReactiveError, Result};
pub use reactive::{
    batch, computed, on_cleanup, sample, signal, subscribe, Computed, DisposeHandle, Signal,
    Subscription,
};
pub use scheduler::{
    install_scheduler, request_next, scheduler_policy, set_scheduler_policy, FrameLoop,
    ManualBackend, Scheduler, SchedulerPolicy, TimingBackend, TokioBackend,
};
