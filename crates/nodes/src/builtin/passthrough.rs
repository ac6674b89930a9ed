//! Pass-through node used for `noop`, `start` and `trigger`.

use async_trait::async_trait;

use crate::{ExecutionContext, NodeConfig, NodeError, NodeExecutor, Outcome, Payload};

/// Does nothing and routes by the node's static `next`.
///
/// Bound to `noop`, `start` and `trigger`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughNode;

#[async_trait]
impl NodeExecutor for PassthroughNode {
    async fn execute(
        &self,
        _node: &NodeConfig,
        _payload: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Outcome, NodeError> {
        Ok(Outcome::new())
    }
}
