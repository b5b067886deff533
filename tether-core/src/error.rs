//! Error types for the reactive runtime.
//!
//! Evaluation failures cannot be returned through `Signal::get`, so they
//! travel as an unwinding panic whose payload is a [`ReactiveError`]. The
//! `try_*` entry points turn that payload back into a `Result`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::error;

/// Errors surfaced by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computed was read while it was still evaluating.
    #[error("cyclic dependency: {node} was read while it was still evaluating")]
    CyclicDependency { node: String },

    /// A computed body or subscription effect panicked.
    #[error("{node} failed: {message}")]
    Effect { node: String, message: String },

    /// A subscription kept writing its own dependencies and never settled.
    #[error("{node} kept re-triggering itself after {reruns} re-runs")]
    Runaway { node: String, reruns: usize },

    /// No scheduler is installed on the calling thread.
    #[error("no scheduler is installed on this thread")]
    NoScheduler,

    /// A timing backend could not be created.
    #[error("timing backend unavailable: {0}")]
    Backend(String),

    /// Configuration failed to parse or validate.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

impl ReactiveError {
    /// Abort the current evaluation with this error.
    pub(crate) fn raise(self) -> ! {
        error!(error = %self, "reactive evaluation aborted");
        panic::resume_unwind(Box::new(self))
    }
}

/// Run a node body, attributing any foreign panic to `node`.
///
/// Panics that already carry a [`ReactiveError`] pass through untouched so
/// the innermost failing node keeps the blame.
pub(crate) fn attribute<R>(node: impl FnOnce() -> String, body: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(payload) => {
            if payload.is::<ReactiveError>() {
                panic::resume_unwind(payload);
            }
            ReactiveError::Effect {
                node: node(),
                message: payload_message(payload.as_ref()),
            }
            .raise()
        }
    }
}

/// Run `f`, converting a reactive failure into an `Err`.
///
/// Panics that did not originate in a reactive node are resumed unchanged.
pub fn catch<R>(f: impl FnOnce() -> R) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<ReactiveError>() {
            Ok(err) => Err(*err),
            Err(other) => panic::resume_unwind(other),
        },
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
