//! Error and Event Types
//!
//! Two kinds of failure exist in the runtime:
//!
//! - [`FlowError`] is returned by fallible API entry points (parsing a
//!   snapshot or a configuration).
//! - [`FunctionError`] is returned by a behavior's `run`. It never escapes
//!   the scheduler: the failing block's outputs are cleared and a
//!   [`FlowEvent`] is recorded instead.

use thiserror::Error;

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("snapshot must be a JSON object, got {0}")]
    InvalidSnapshot(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("block `{0}` has been destroyed")]
    Destroyed(String),

    #[error("invalid runtime config: {0}")]
    Config(String),
}

/// Errors raised by a function while it runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("input `{name}` is not a number")]
    NotANumber { name: String },

    #[error("{0}")]
    Failed(String),
}

/// Something the runtime wants its host to know about.
///
/// Events are collected on the job context and drained with
/// [`Root::take_events`](crate::graph::Root::take_events).
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// `#is` named a type the registry does not know.
    UnknownType { path: String, type_name: String },

    /// A function's `run` returned an error.
    ExecutionFailed {
        path: String,
        type_name: String,
        message: String,
    },

    /// A drain exceeded the configured iteration limit and was aborted.
    IterationLimit { path: String, iterations: usize },
}
