//! `MockNode` — a test double for `NodeExecutor`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::{ExecutionContext, NodeConfig, NodeError, NodeExecutor, Outcome, Payload};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Succeed with a specific outcome.
    Return(Outcome),
    /// Fail with a `NodeError::Failed`.
    Fail(String),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// `(node id, payload)` seen by this executor, in call order.
    pub calls: Arc<Mutex<Vec<(String, Payload)>>>,
}

impl MockNode {
    /// Create a mock that always succeeds with the given outcome.
    pub fn returning(name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Return(outcome),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Fail(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this executor has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Node ids this executor ran for, in call order.
    pub fn visited(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Payloads this executor received, in call order.
    pub fn payloads(&self) -> Vec<Payload> {
        self.calls.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait]
impl NodeExecutor for MockNode {
    async fn execute(
        &self,
        node: &NodeConfig,
        payload: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Outcome, NodeError> {
        self.calls
            .lock()
            .unwrap()
            .push((node.id.clone(), payload.clone()));

        match &self.behaviour {
            MockBehaviour::Return(outcome) => Ok(outcome.clone()),
            MockBehaviour::Fail(msg) => Err(NodeError::Failed(msg.clone())),
        }
    }
}
