//! Code node - run an inline script over the input items.
//!
//! Scripts run on a blocking thread under a wall-clock timeout (10 s
//! default) and an operation cap. Sandboxing to a hostile-multi-tenant
//! standard is explicitly not attempted.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::timeout;

use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::workflow::{Item, NodeDef};

const MAX_OPERATIONS: u64 = 5_000_000;

/// Code node implementation.
pub struct CodeNode;

impl CodeNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CodeNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct CodeConfig {
    script: String,

    /// "runOnceForAllItems" (default) or "runOnceForEachItem"
    #[serde(default = "default_mode")]
    mode: String,

    #[serde(default = "default_timeout", rename = "timeoutSeconds")]
    timeout_seconds: u64,
}

fn default_mode() -> String {
    "runOnceForAllItems".to_string()
}

fn default_timeout() -> u64 {
    10
}

#[async_trait]
impl NodeExecutor for CodeNode {
    fn node_type(&self) -> &str {
        "code"
    }

    fn description(&self) -> &str {
        "Run an inline script over the input items"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        _ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let config: CodeConfig = serde_json::from_value(node.parameters.clone())
            .map_err(|e| Error::Node(format!("Invalid code parameters: {}", e)))?;

        let budget = std::time::Duration::from_secs(config.timeout_seconds.max(1));

        match config.mode.as_str() {
            "runOnceForAllItems" => {
                let jsons: Vec<Value> = input.iter().map(|i| i.json.clone()).collect();
                let script = config.script.clone();
                let result = run_script(script, "items", Value::Array(jsons), budget).await?;
                match result {
                    Value::Array(values) => Ok(values.iter().map(Item::normalize).collect()),
                    Value::Null => Ok(Vec::new()),
                    single => Ok(vec![Item::normalize(&single)]),
                }
            }
            "runOnceForEachItem" => {
                let mut output = Vec::with_capacity(input.len());
                for item in &input {
                    let result =
                        run_script(config.script.clone(), "item", item.json.clone(), budget)
                            .await?;
                    if !result.is_null() {
                        output.push(Item {
                            json: result,
                            binary: item.binary.clone(),
                        });
                    }
                }
                Ok(output)
            }
            other => Err(Error::Node(format!(
                "Invalid code mode '{}', expected runOnceForAllItems/runOnceForEachItem",
                other
            ))),
        }
    }
}

async fn run_script(
    script: String,
    binding: &'static str,
    value: Value,
    budget: std::time::Duration,
) -> Result<Value> {
    let task = tokio::task::spawn_blocking(move || -> Result<Value> {
        let mut engine = rhai::Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);

        let mut scope = rhai::Scope::new();
        let dynamic = rhai::serde::to_dynamic(&value)
            .map_err(|e| Error::Node(format!("Script input conversion failed: {}", e)))?;
        scope.push_dynamic(binding, dynamic);

        let result = engine
            .eval_with_scope::<rhai::Dynamic>(&mut scope, &script)
            .map_err(|e| Error::Node(format!("Script failed: {}", e)))?;

        rhai::serde::from_dynamic(&result)
            .map_err(|e| Error::Node(format!("Script output conversion failed: {}", e)))
    });

    match timeout(budget, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(Error::Node(format!("Script task failed: {}", join))),
        Err(_) => Err(Error::Node(format!(
            "Script timed out after {}s",
            budget.as_secs()
        ))),
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
            "id": "1", "name": "Code", "type": "code", "parameters": parameters
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_code_all_items() {
        let executor = CodeNode::new();
        let mut ctx = ctx();
        let out = executor
            .execute(
                &node(json!({"script": "items.map(|it| #{ n: it.n * 2 })"})),
                vec![Item::new(json!({"n": 1})), Item::new(json!({"n": 2}))],
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].json, json!({"n": 2}));
        assert_eq!(out[1].json, json!({"n": 4}));
    }

    #[tokio::test]
    async fn test_code_each_item() {
        let executor = CodeNode::new();
        let mut ctx = ctx();
        let out = executor
            .execute(
                &node(json!({
                    "mode": "runOnceForEachItem",
                    "script": "#{ tagged: item.n }"
                })),
                vec![Item::new(json!({"n": 7}))],
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(out[0].json, json!({"tagged": 7}));
    }

    #[tokio::test]
    async fn test_code_syntax_error() {
        let executor = CodeNode::new();
        let mut ctx = ctx();
        let err = executor
            .execute(
                &node(json!({"script": "let x = "})),
                vec![Item::new(json!({}))],
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NODE_ERROR");
    }
}
