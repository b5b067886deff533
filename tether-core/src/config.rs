//! Runtime configuration.
//!
//! Configuration is plain serde data, usually loaded from JSON:
//!
//! ```json
//! {
//!   "scheduler": {
//!     "policy": { "kind": "delay", "ms": 100 },
//!     "frame_interval_us": 16667
//!   }
//! }
//! ```
//!
//! Every field is optional and falls back to its default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};
use crate::scheduler::{SchedulerPolicy, DEFAULT_FRAME_INTERVAL};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Policy in force when the scheduler is created.
    pub policy: SchedulerPolicy,

    /// Frame interval for animation-frame scheduling, in microseconds.
    pub frame_interval_us: u64,

    /// Policies offered for selection.
    pub presets: Vec<SchedulerPolicy>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulerPolicy::default(),
            frame_interval_us: DEFAULT_FRAME_INTERVAL.as_micros() as u64,
            presets: SchedulerPolicy::presets(),
        }
    }
}

impl SchedulerConfig {
    /// Frame interval as a duration.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(self.frame_interval_us)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.frame_interval_us == 0 {
            return Err(ReactiveError::Config(
                "scheduler.frame_interval_us must be greater than zero".to_string(),
            ));
        }
        if self.presets.is_empty() {
            return Err(ReactiveError::Config(
                "scheduler.presets must not be empty".to_string(),
            ));
        }
        if !self.presets.contains(&self.policy) {
            return Err(ReactiveError::Config(format!(
                "scheduler.policy `{}` is not one of scheduler.presets",
                self.policy
            )));
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ReactiveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ReactiveError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()
    }
}
