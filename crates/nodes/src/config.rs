//! Node configuration, payload and outcome types.
//!
//! Defined here (in the nodes crate) so both the engine and individual node
//! implementations can import them without a circular dependency.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved outcome key a node uses to override its static `next` routing.
pub const NEXT_NODE_KEY: &str = "next_node";

/// The schema-less key/value bag threaded through every node of a run.
pub type Payload = serde_json::Map<String, Value>;

fn default_node_type() -> String {
    "noop".to_owned()
}

/// A single node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique identifier within the workflow. May be omitted in a keyed
    /// graph document, in which case the map key is used.
    #[serde(default)]
    pub id: String,
    /// Maps to a registered `NodeExecutor`. Defaults to `noop`.
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    /// Arbitrary configuration handed to the executor.
    #[serde(default)]
    pub parameters: Value,
    /// Static routing hint; `None` routes to `end` unless the outcome says
    /// otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            parameters: Value::Null,
            next: None,
        }
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Look up a single parameter by key.
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }
}

/// What a node hands back to the engine on success.
///
/// Everything except [`NEXT_NODE_KEY`] is shallow-merged into the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outcome(Payload);

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Route to `node_id` instead of the node's static `next`.
    pub fn route_to(self, node_id: impl Into<String>) -> Self {
        self.with(NEXT_NODE_KEY, node_id.into())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The routing override, if the node supplied a string `next_node`.
    pub fn next_node(&self) -> Option<&str> {
        self.0.get(NEXT_NODE_KEY).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the data to merge and the routing override.
    ///
    /// The reserved key is always removed from the data, even when its value
    /// is not a string.
    pub fn into_parts(mut self) -> (Payload, Option<String>) {
        let next = match self.0.remove(NEXT_NODE_KEY) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        (self.0, next)
    }
}

impl From<Payload> for Outcome {
    fn from(map: Payload) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_config_defaults_type_and_parameters() {
        let node: NodeConfig = serde_json::from_value(json!({ "next": "n1" })).unwrap();
        assert_eq!(node.node_type, "noop");
        assert_eq!(node.parameters, Value::Null);
        assert_eq!(node.next.as_deref(), Some("n1"));
        assert!(node.id.is_empty());
    }

    #[test]
    fn node_config_reads_type_field() {
        let node: NodeConfig =
            serde_json::from_value(json!({ "id": "a", "type": "condition" })).unwrap();
        assert_eq!(node.node_type, "condition");
        assert_eq!(node.next, None);
    }

    #[test]
    fn outcome_strips_routing_key() {
        let outcome = Outcome::new().with("score", 10).route_to("n9");
        assert_eq!(outcome.next_node(), Some("n9"));

        let (data, next) = outcome.into_parts();
        assert_eq!(next.as_deref(), Some("n9"));
        assert_eq!(Value::Object(data), json!({ "score": 10 }));
    }

    #[test]
    fn non_string_next_node_is_ignored() {
        let outcome = Outcome::new().with(NEXT_NODE_KEY, 7);
        assert_eq!(outcome.next_node(), None);

        let (data, next) = outcome.into_parts();
        assert!(next.is_none());
        assert!(data.is_empty());
    }
}
