//! `condition` node: compares one payload field and branches.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{ExecutionContext, NodeConfig, NodeError, NodeExecutor, Outcome, Payload};

/// Comparison applied by a `condition` node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    Exists,
}

impl Operator {
    /// Apply the operator to the payload value (`None` when the field is
    /// absent) and the configured comparison value.
    pub fn evaluate(self, actual: Option<&Value>, expected: &Value) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self {
            Self::Equals => loosely_equal(actual, expected),
            Self::NotEquals => !loosely_equal(actual, expected),
            Self::GreaterThan => compare(actual, expected).is_some_and(|o| o.is_gt()),
            Self::LessThan => compare(actual, expected).is_some_and(|o| o.is_lt()),
            Self::Contains => contains(actual, expected),
            Self::NotContains => !contains(actual, expected),
            Self::Exists => !actual.is_null(),
        }
    }
}

/// Evaluates `parameters.field <operator> parameters.value` against the
/// payload.
///
/// The outcome always carries `condition_result`. When `true_next` or
/// `false_next` is configured for the matching branch, the node routes there;
/// otherwise it falls through to its static `next`.
///
/// `field` accepts a dotted path (`lead.email`) into nested objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionNode;

#[async_trait]
impl NodeExecutor for ConditionNode {
    async fn execute(
        &self,
        node: &NodeConfig,
        payload: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Outcome, NodeError> {
        let field = node
            .parameter("field")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::invalid_parameter("field", "expected a string"))?;

        let operator = match node.parameter("operator") {
            None => Operator::default(),
            Some(raw) => Operator::deserialize(raw)
                .map_err(|e| NodeError::invalid_parameter("operator", e.to_string()))?,
        };
        let expected = node.parameter("value").unwrap_or(&Value::Null);

        let result = operator.evaluate(lookup(payload, field), expected);

        let branch = if result { "true_next" } else { "false_next" };
        let mut outcome = Outcome::new().with("condition_result", result);
        match node.parameter(branch) {
            None | Some(Value::Null) => {}
            Some(Value::String(target)) => outcome = outcome.route_to(target.clone()),
            Some(_) => return Err(NodeError::invalid_parameter(branch, "expected a node id")),
        }

        Ok(outcome)
    }
}

fn lookup<'a>(payload: &'a Payload, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = payload.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => match (actual, expected) {
            (Value::String(a), Value::Bool(b)) | (Value::Bool(b), Value::String(a)) => {
                a == &b.to_string()
            }
            _ => false,
        },
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (actual, expected) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), needle) => items.iter().any(|item| loosely_equal(item, needle)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_ctx;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn operators() {
        assert!(Operator::Equals.evaluate(Some(&json!("10")), &json!(10)));
        assert!(Operator::NotEquals.evaluate(Some(&json!("a")), &json!("b")));
        assert!(Operator::GreaterThan.evaluate(Some(&json!(75)), &json!("50")));
        assert!(!Operator::GreaterThan.evaluate(None, &json!(50)));
        assert!(Operator::LessThan.evaluate(Some(&json!("apple")), &json!("banana")));
        assert!(Operator::Contains.evaluate(Some(&json!("hello world")), &json!("world")));
        assert!(Operator::Contains.evaluate(Some(&json!(["a", "b"])), &json!("b")));
        assert!(Operator::NotContains.evaluate(None, &json!("x")));
        assert!(Operator::Exists.evaluate(Some(&json!(0)), &Value::Null));
        assert!(!Operator::Exists.evaluate(Some(&Value::Null), &Value::Null));
    }

    #[tokio::test]
    async fn routes_to_matching_branch() {
        let node = NodeConfig::new("check", "condition")
            .with_parameters(json!({
                "field": "lead.score",
                "operator": "greater_than",
                "value": 50,
                "true_next": "hot",
                "false_next": "cold",
            }))
            .with_next("fallback");

        let hot = payload(json!({ "lead": { "score": 80 } }));
        let outcome = ConditionNode.execute(&node, &hot, &test_ctx()).await.unwrap();
        assert_eq!(outcome.get("condition_result"), Some(&json!(true)));
        assert_eq!(outcome.next_node(), Some("hot"));

        let cold = payload(json!({ "lead": { "score": 10 } }));
        let outcome = ConditionNode.execute(&node, &cold, &test_ctx()).await.unwrap();
        assert_eq!(outcome.get("condition_result"), Some(&json!(false)));
        assert_eq!(outcome.next_node(), Some("cold"));
    }

    #[tokio::test]
    async fn without_branches_falls_through() {
        let node = NodeConfig::new("check", "condition")
            .with_parameters(json!({ "field": "plan", "value": "pro" }));

        let outcome = ConditionNode
            .execute(&node, &payload(json!({ "plan": "pro" })), &test_ctx())
            .await
            .unwrap();
        assert_eq!(outcome.get("condition_result"), Some(&json!(true)));
        assert_eq!(outcome.next_node(), None);
    }

    #[tokio::test]
    async fn unknown_operator_is_rejected() {
        let node = NodeConfig::new("check", "condition")
            .with_parameters(json!({ "field": "plan", "operator": "matches" }));

        let err = ConditionNode
            .execute(&node, &Payload::new(), &test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidParameter { parameter, .. } if parameter == "operator"));
    }
}
