//! Scheduling policies.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// When the next iteration of a driving loop should run.
///
/// Policies are plain data; a [`TimingBackend`](super::TimingBackend)
/// provides the mechanism. Text form (used by `Display`/`FromStr`):
/// `animation-frame`, `delay(100)`, `idle(50)`, `deferred`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SchedulerPolicy {
    /// Run on the next display frame.
    AnimationFrame,

    /// Run after a fixed delay, in milliseconds. `Delay { ms: 0 }` is a
    /// zero-delay timer and still goes through the timer queue.
    Delay { ms: u64 },

    /// Run when the system is idle, but no later than `timeout_ms`.
    Idle { timeout_ms: u64 },

    /// Run on the next turn of the event loop, ahead of any timer.
    Deferred,
}

impl SchedulerPolicy {
    /// Delay used by the fixed-delay preset.
    pub const DEFAULT_DELAY_MS: u64 = 100;

    /// Upper bound used by the idle preset.
    pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 50;

    /// The selectable policies offered to users by default.
    pub fn presets() -> Vec<SchedulerPolicy> {
        vec![
            SchedulerPolicy::AnimationFrame,
            SchedulerPolicy::Delay {
                ms: Self::DEFAULT_DELAY_MS,
            },
            SchedulerPolicy::Idle {
                timeout_ms: Self::DEFAULT_IDLE_TIMEOUT_MS,
            },
            SchedulerPolicy::Delay { ms: 0 },
        ]
    }

    /// Delay for `Delay`, timeout for `Idle`, zero otherwise.
    pub fn duration(&self) -> Duration {
        match self {
            SchedulerPolicy::Delay { ms } => Duration::from_millis(*ms),
            SchedulerPolicy::Idle { timeout_ms } => Duration::from_millis(*timeout_ms),
            SchedulerPolicy::AnimationFrame | SchedulerPolicy::Deferred => Duration::ZERO,
        }
    }
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        SchedulerPolicy::AnimationFrame
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerPolicy::AnimationFrame => f.write_str("animation-frame"),
            SchedulerPolicy::Delay { ms } => write!(f, "delay({ms})"),
            SchedulerPolicy::Idle { timeout_ms } => write!(f, "idle({timeout_ms})"),
            SchedulerPolicy::Deferred => f.write_str("deferred"),
        }
    }
}

impl FromStr for SchedulerPolicy {
    type Err = ReactiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "animation-frame" => return Ok(SchedulerPolicy::AnimationFrame),
            "deferred" => return Ok(SchedulerPolicy::Deferred),
            "delay" => {
                return Ok(SchedulerPolicy::Delay {
                    ms: Self::DEFAULT_DELAY_MS,
                })
            }
            "idle" => {
                return Ok(SchedulerPolicy::Idle {
                    timeout_ms: Self::DEFAULT_IDLE_TIMEOUT_MS,
                })
            }
            _ => {}
        }

        let (name, arg) = s
            .strip_suffix(')')
            .and_then(|rest| rest.split_once('('))
            .ok_or_else(|| ReactiveError::Config(format!("unknown scheduler policy `{s}`")))?;
        let millis: u64 = arg.trim().parse().map_err(|_| {
            ReactiveError::Config(format!("invalid milliseconds `{arg}` in policy `{s}`"))
        })?;

        match name.trim() {
            "delay" => Ok(SchedulerPolicy::Delay { ms: millis }),
            "idle" => Ok(SchedulerPolicy::Idle { timeout_ms: millis }),
            _ => Err(ReactiveError::Config(format!("unknown scheduler policy `{s}`"))),
        }
    }
}
