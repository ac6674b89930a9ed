//! The `NodeExecutor` trait — the contract every node type must fulfil.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{NodeConfig, NodeError, Outcome, Payload};

/// Run-level context passed to every node during execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the workflow definition being run.
    pub workflow_id: Uuid,
    /// ID of the current execution.
    pub execution_id: Uuid,
    /// Who or what started the run (user id, webhook name, …).
    pub triggered_by: Option<String>,
    /// When the execution record was created.
    pub started_at: DateTime<Utc>,
}

/// The core node trait.
///
/// Implementations must be idempotent: the host queue delivers steps
/// at-least-once and the engine does not deduplicate. Executors with
/// external side effects should carry their own dedup key in `parameters`.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Execute `node` against the current payload and return this node's
    /// outcome. The payload is read-only; changes travel in the outcome.
    async fn execute(
        &self,
        node: &NodeConfig,
        payload: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Outcome, NodeError>;
}
