//! `set` node.

use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutionContext, NodeConfig, NodeError, NodeExecutor, Outcome, Payload};

/// Writes the `values` object from its parameters into the payload.
///
/// A `next_node` entry inside `values` routes like any other outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetNode;

#[async_trait]
impl NodeExecutor for SetNode {
    async fn execute(
        &self,
        node: &NodeConfig,
        _payload: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Outcome, NodeError> {
        match node.parameter("values") {
            Some(Value::Object(values)) => Ok(Outcome::from(values.clone())),
            Some(_) => Err(NodeError::invalid_parameter("values", "expected an object")),
            None => Err(NodeError::invalid_parameter("values", "missing")),
        }
    }
}
