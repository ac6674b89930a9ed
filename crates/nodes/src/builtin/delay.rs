//! `delay` node.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{ExecutionContext, NodeConfig, NodeError, NodeExecutor, Outcome, Payload};

/// Sleeps for `parameters.seconds` before continuing.
///
/// The worker slot is held for the whole delay, so long waits belong in a
/// scheduler, not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    async fn execute(
        &self,
        node: &NodeConfig,
        _payload: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Outcome, NodeError> {
        let seconds = match node.parameter("seconds") {
            None | Some(Value::Null) => 0.0,
            Some(v) => v
                .as_f64()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| NodeError::invalid_parameter("seconds", "expected a non-negative number"))?,
        };

        let wait = Duration::try_from_secs_f64(seconds)
            .map_err(|e| NodeError::invalid_parameter("seconds", format!("{seconds} is out of range: {e}")))?;

        if !wait.is_zero() {
            debug!(execution_id = %ctx.execution_id, node_id = %node.id, seconds, "delaying");
            tokio::time::sleep(wait).await;
        }

        Ok(Outcome::new().with("delayed_seconds", seconds))
    }
}
