//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use nodes::NodeError;

use crate::store::StoreError;

/// Broad failure classes. Decides what the worker does with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The definition or the step itself is wrong; retrying cannot help.
    Configuration,
    /// A node executor reported a failure.
    Executor,
    /// A store or the queue is unavailable; left to the host queue's retry
    /// policy.
    Infrastructure,
}

/// Errors produced by the workflow engine (triggering + step processing).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Configuration errors ------

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("workflow {0} is not active")]
    WorkflowInactive(Uuid),

    #[error("workflow {0} has no 'start' node")]
    MissingStartNode(Uuid),

    #[error("node '{node_id}' has unknown type '{node_type}'")]
    UnknownNodeType {
        node_id: String,
        node_type: String,
    },

    /// Routing (static `next` or an outcome's `next_node`) named a node that
    /// is not in the graph.
    #[error("node '{from}' routes to unknown node '{target}'")]
    UnknownNode {
        from: String,
        target: String,
    },

    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// A step arrived for an execution that does not exist.
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    // ------ Executor errors ------

    #[error("node '{node_id}' failed: {source}")]
    Executor {
        node_id: String,
        #[source]
        source: NodeError,
    },

    // ------ Infrastructure errors ------

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WorkflowNotFound(_)
            | Self::WorkflowInactive(_)
            | Self::MissingStartNode(_)
            | Self::UnknownNodeType { .. }
            | Self::UnknownNode { .. }
            | Self::InvalidDefinition(_)
            | Self::ExecutionNotFound(_) => ErrorKind::Configuration,
            Self::Executor { .. } => ErrorKind::Executor,
            Self::Store(_) | Self::Queue(_) | Self::Serialization(_) => ErrorKind::Infrastructure,
        }
    }
}
