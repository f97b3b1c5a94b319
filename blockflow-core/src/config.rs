//! Runtime Configuration

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Number of scheduler priority levels. Level 0 drains first.
pub const PRIORITY_LEVELS: usize = 4;

/// Settings shared by a root and every job below it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Priority for blocks whose function does not declare one.
    pub default_priority: u8,

    /// Maximum number of block runs in a single drain.
    ///
    /// `None` means unbounded: a binding cycle without a fixed point keeps
    /// the drain spinning.
    pub iteration_limit: Option<usize>,

    /// Events kept until [`Root::take_events`](crate::graph::Root::take_events)
    /// drains them. Past this, the oldest are dropped.
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_priority: 1,
            iteration_limit: None,
            event_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        if usize::from(config.default_priority) >= PRIORITY_LEVELS {
            return Err(FlowError::Config(format!(
                "default_priority must be below {PRIORITY_LEVELS}, got {}",
                config.default_priority
            )));
        }
        if config.iteration_limit == Some(0) {
            return Err(FlowError::Config("iteration_limit must be positive".into()));
        }
        Ok(config)
    }
}
