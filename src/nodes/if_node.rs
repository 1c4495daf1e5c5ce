//! IF node - conditional branching.
//!
//! Items satisfying the conditions form the stored output (the true
//! branch); the false branch is implicitly empty under the single-stored-
//! output convention.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::expression;
use crate::workflow::{Item, NodeDef};

/// IF node implementation.
pub struct IfNode;

impl IfNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IfNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct IfConfig {
    conditions: Vec<Condition>,
    #[serde(default = "default_combine")]
    combine: String, // "all" | "any"
}

#[derive(Debug, Deserialize)]
struct Condition {
    left: Value,
    operator: String,
    #[serde(default)]
    right: Value,
}

fn default_combine() -> String {
    "all".to_string()
}

#[async_trait]
impl NodeExecutor for IfNode {
    fn node_type(&self) -> &str {
        "if"
    }

    fn description(&self) -> &str {
        "Keep items whose conditions hold; the rest prune downstream work"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let config: IfConfig = serde_json::from_value(node.parameters.clone())
            .map_err(|e| Error::Node(format!("Invalid if parameters: {}", e)))?;

        if config.conditions.is_empty() {
            return Err(Error::Node("if node requires at least one condition".to_string()));
        }
        let combine = config.combine.to_lowercase();
        if combine != "all" && combine != "any" {
            return Err(Error::Node(format!(
                "Invalid combine '{}', expected 'all' or 'any'",
                config.combine
            )));
        }

        let mut passing = Vec::new();
        for item in input {
            let current = std::slice::from_ref(&item);
            let mut results = Vec::with_capacity(config.conditions.len());
            for condition in &config.conditions {
                let left = expression::render_parameters(&condition.left, ctx, current);
                let right = expression::render_parameters(&condition.right, ctx, current);
                results.push(evaluate_condition(&left, &condition.operator, &right)?);
            }
            let keep = if combine == "any" {
                results.iter().any(|r| *r)
            } else {
                results.iter().all(|r| *r)
            };
            if keep {
                passing.push(item);
            }
        }

        Ok(passing)
    }
}

fn evaluate_condition(left: &Value, operator: &str, right: &Value) -> Result<bool> {
    match operator {
        "equals" => Ok(loose_eq(left, right)),
        "notEquals" | "not_equals" => Ok(!loose_eq(left, right)),
        "contains" => match left {
            Value::String(s) => Ok(right.as_str().map(|n| s.contains(n)).unwrap_or(false)),
            Value::Array(items) => Ok(items.contains(right)),
            Value::Object(map) => Ok(right.as_str().map(|k| map.contains_key(k)).unwrap_or(false)),
            _ => Ok(false),
        },
        "isEmpty" => Ok(match left {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(m) => m.is_empty(),
            _ => false,
        }),
        "gt" | "lt" | "gte" | "lte" => {
            let l = as_f64(left).ok_or_else(|| {
                Error::Node(format!("Operator '{}' requires numeric left operand", operator))
            })?;
            let r = as_f64(right).ok_or_else(|| {
                Error::Node(format!("Operator '{}' requires numeric right operand", operator))
            })?;
            Ok(match operator {
                "gt" => l > r,
                "lt" => l < r,
                "gte" => l >= r,
                "lte" => l <= r,
                _ => false,
            })
        }
        "regex" => {
            let pattern = right
                .as_str()
                .ok_or_else(|| Error::Node("regex operator requires string pattern".to_string()))?;
            let text = match left {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let regex = regex_lite::Regex::new(pattern)
                .map_err(|e| Error::Node(format!("Invalid regex '{}': {}", pattern, e)))?;
            Ok(regex.is_match(&text))
        }
        _ => Err(Error::Node(format!("Unsupported operator '{}'", operator))),
    }
}

/// Numbers compare numerically even when one side arrives as a string.
fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (as_f64(left), as_f64(right)) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Workflow;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        let workflow: Workflow =
            serde_json::from_value(json!({"name": "wf", "nodes": [], "connections": {}})).unwrap();
        ExecutionContext::new(Arc::new(workflow))
    }

    fn node(parameters: Value) -> NodeDef {
        serde_json::from_value(json!({
            "id": "1", "name": "If", "type": "if", "parameters": parameters
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_if_keeps_passing_items() {
        let executor = IfNode::new();
        let mut ctx = ctx();
        let out = executor
            .execute(
                &node(json!({"conditions": [
                    {"left": "={{ $json.x }}", "operator": "equals", "right": 2}
                ]})),
                vec![Item::new(json!({"x": 1})), Item::new(json!({"x": 2}))],
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].json, json!({"x": 2}));
    }

    #[tokio::test]
    async fn test_if_no_match_yields_empty() {
        let executor = IfNode::new();
        let mut ctx = ctx();
        let out = executor
            .execute(
                &node(json!({"conditions": [
                    {"left": "={{ $json.x }}", "operator": "equals", "right": 2}
                ]})),
                vec![Item::new(json!({"x": 1}))],
                &mut ctx,
            )
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_if_any_combine() {
        let executor = IfNode::new();
        let mut ctx = ctx();
        let out = executor
            .execute(
                &node(json!({
                    "combine": "any",
                    "conditions": [
                        {"left": "={{ $json.a }}", "operator": "gt", "right": 10},
                        {"left": "={{ $json.b }}", "operator": "equals", "right": "yes"}
                    ]
                })),
                vec![Item::new(json!({"a": 1, "b": "yes"}))],
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_operators() {
        assert!(evaluate_condition(&json!("abc"), "contains", &json!("b")).unwrap());
        assert!(evaluate_condition(&json!([1, 2]), "contains", &json!(2)).unwrap());
        assert!(evaluate_condition(&json!(5), "gte", &json!(5)).unwrap());
        assert!(evaluate_condition(&json!("7"), "gt", &json!(6)).unwrap());
        assert!(evaluate_condition(&json!(""), "isEmpty", &Value::Null).unwrap());
        assert!(evaluate_condition(&json!("x-42"), "regex", &json!(r"x-\d+")).unwrap());
        assert!(evaluate_condition(&json!("a"), "unknown", &json!("b")).is_err());
    }
}
