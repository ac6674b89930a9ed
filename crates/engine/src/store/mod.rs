//! Persistence contracts the engine drives.
//!
//! Workflow definitions are read-only to the engine. Each execution keeps a
//! copy of the definition it was created from, so edits to a workflow never
//! reach runs already under way. Execution records and their node logs are
//! written only by the step currently processing an execution, so
//! implementations need no cross-writer locking beyond what their own
//! durability requires.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use nodes::Payload;

use crate::models::{
    ExecutionRecord, ExecutionStatus, NodeCompletionRecord, NodeCompletionStatus,
    WorkflowDefinition,
};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    /// Status updates are refused once an execution is completed or failed.
    #[error("execution {0} is already in a terminal state")]
    TerminalExecution(Uuid),

    /// A persisted value could not be mapped back onto the domain model.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

/// Input to [`ExecutionStateStore::create_execution`].
#[derive(Debug, Clone)]
pub struct NewExecution {
    /// Stored with the record and served back by
    /// [`ExecutionStateStore::workflow_for_execution`].
    pub definition: WorkflowDefinition,
    pub payload: Payload,
    pub triggered_by: Option<String>,
}

/// The node log entry for one visit.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeVisit {
    pub node_id: String,
    pub status: NodeCompletionStatus,
    pub error_message: Option<String>,
}

/// Fields changed alongside a status update. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPatch {
    pub current_node_id: Option<String>,
    pub payload: Option<Payload>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionPatch {
    pub fn at_node(node_id: impl Into<String>) -> Self {
        Self {
            current_node_id: Some(node_id.into()),
            ..Self::default()
        }
    }
}

/// Read-only lookup of workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError>;
}

/// Lifecycle records of runs and their append-only node logs.
#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    /// Create a `pending` record. The store assigns the id and `started_at`.
    async fn create_execution(&self, new: NewExecution) -> Result<ExecutionRecord, StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Move a non-terminal execution to `status` and apply `patch`.
    ///
    /// # Errors
    /// [`StoreError::TerminalExecution`] if the record is already completed
    /// or failed.
    async fn update_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError>;

    /// Append one entry to the execution's node log.
    async fn record_node_completion(
        &self,
        id: Uuid,
        node_id: &str,
        status: NodeCompletionStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Append `visit` to the node log and move the execution to `status` as
    /// one write. Either both land or neither does.
    ///
    /// # Errors
    /// [`StoreError::TerminalExecution`] if the record is already completed
    /// or failed; nothing is written in that case.
    async fn record_step(
        &self,
        id: Uuid,
        visit: &NodeVisit,
        status: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError>;

    /// The node log in append order.
    async fn node_completions(&self, id: Uuid) -> Result<Vec<NodeCompletionRecord>, StoreError>;

    /// The definition the execution was created from, as it was at that
    /// moment.
    async fn workflow_for_execution(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError>;

    /// Executions of one workflow, newest first.
    async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
}
