//! Built-in control-flow node types.
//!
//! Business nodes (send-email, publish-post, …) live outside this crate and
//! are registered next to these at start-up.

mod condition;
mod delay;
mod passthrough;
mod set;

use std::sync::Arc;

pub use condition::{ConditionNode, Operator};
pub use delay::DelayNode;
pub use passthrough::PassthroughNode;
pub use set::SetNode;

use crate::RegistryBuilder;

/// Register every built-in node type on `builder`.
pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register("noop", Arc::new(PassthroughNode))
        .register("start", Arc::new(PassthroughNode))
        .register("trigger", Arc::new(PassthroughNode))
        .register("condition", Arc::new(ConditionNode))
        .register("set", Arc::new(SetNode))
        .register("delay", Arc::new(DelayNode))
}

#[cfg(test)]
pub(crate) fn test_ctx() -> crate::ExecutionContext {
    crate::ExecutionContext {
        workflow_id: uuid::Uuid::new_v4(),
        execution_id: uuid::Uuid::new_v4(),
        triggered_by: None,
        started_at: chrono::Utc::now(),
    }
}
