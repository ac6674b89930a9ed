//! Node-level error types.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine never retries a node: any variant marks the owning execution
/// as failed. Executors that talk to flaky services should retry internally
/// (and stay idempotent) before giving up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The node ran and could not complete its work.
    #[error("{0}")]
    Failed(String),

    /// The node's `parameters` are missing a field or hold the wrong shape.
    #[error("invalid parameter '{parameter}': {message}")]
    InvalidParameter {
        parameter: String,
        message: String,
    },
}

impl NodeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

/// Returned by [`crate::ExecutorRegistry::resolve`] when nothing is
/// registered under a node type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no executor registered for node type '{0}'")]
pub struct UnknownNodeType(pub String);
