//! Agent node - AI composite with tool dispatch.
//!
//! The agent reads its model over `ai_languageModel`, optional seed
//! context over `ai_memory`, and dispatches its `ai_tool` providers on
//! demand: when the model answers with a `{"tool": ..., "input": ...}`
//! call, the named tool node is executed through the registry and the
//! observation is fed back into the conversation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::llm::{complete, resolve_model, ChainConfig};
use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::expression;
use crate::workflow::{providers_on_channel, Item, NodeDef};

const MAX_TOOL_ROUNDS: usize = 5;

/// Agent node implementation.
pub struct AgentNode {
    client: Client,
}

impl AgentNode {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for AgentNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    tool: String,
    #[serde(default)]
    input: Value,
}

#[async_trait]
impl NodeExecutor for AgentNode {
    fn node_type(&self) -> &str {
        "agent"
    }

    fn description(&self) -> &str {
        "Run a prompt through the wired model with on-demand tool dispatch"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let model = resolve_model(node, ctx)?;
        let api_key = model
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::CredentialMissing(format!(
                    "API_KEY not provided for agent node '{}'",
                    node.name
                ))
            })?
            .to_string();

        let workflow = ctx.workflow.clone();
        let tools = providers_on_channel(&workflow.connections, &workflow, &node.name, "ai_tool");
        let memory = providers_on_channel(&workflow.connections, &workflow, &node.name, "ai_memory")
            .into_iter()
            .next()
            .and_then(|provider| ctx.output(&provider).and_then(|items| items.first()).cloned());

        let rendered = expression::render_parameters(&node.parameters, ctx, &input);
        let config: ChainConfig = serde_json::from_value(rendered)
            .map_err(|e| Error::Node(format!("Invalid agent parameters: {}", e)))?;

        let mut system = config.system.clone().unwrap_or_default();
        if !tools.is_empty() {
            system.push_str(&format!(
                "\nAvailable tools: {}. To call one, answer with JSON: {{\"tool\": \"<name>\", \"input\": {{...}}}}.",
                tools.join(", ")
            ));
        }
        if let Some(memory_item) = &memory {
            system.push_str(&format!("\nContext: {}", memory_item.json));
        }

        let mut prompt = config.prompt.clone();
        let mut rounds = 0;

        loop {
            let round_config = ChainConfig {
                prompt: prompt.clone(),
                system: if system.is_empty() {
                    None
                } else {
                    Some(system.clone())
                },
                response_format: "text".to_string(),
                timeout_seconds: config.timeout_seconds,
            };
            let answer = complete(&self.client, &model, &api_key, &round_config).await?;

            let Some(call) = parse_tool_call(&answer) else {
                info!(node = %node.name, rounds, "agent finished");
                return Ok(vec![Item::new(json!({ "text": answer }))]);
            };

            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                warn!(node = %node.name, "agent exceeded tool-round limit");
                return Ok(vec![Item::new(json!({ "text": answer }))]);
            }

            let observation = self.dispatch_tool(&call, &tools, ctx).await?;
            debug!(tool = %call.tool, "tool observation collected");
            prompt = format!(
                "{}\n\nTool '{}' returned: {}\nContinue, or answer directly.",
                config.prompt, call.tool, observation
            );
        }
    }
}

impl AgentNode {
    async fn dispatch_tool(
        &self,
        call: &ToolCall,
        tools: &[String],
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        if !tools.iter().any(|t| t == &call.tool) {
            return Ok(json!({"error": format!("unknown tool '{}'", call.tool)}));
        }

        let workflow = ctx.workflow.clone();
        let tool_node = workflow
            .find_node(&call.tool)
            .ok_or_else(|| Error::Workflow(format!("tool node '{}' not found", call.tool)))?;

        let registry = ctx
            .registry
            .clone()
            .ok_or_else(|| Error::Node("agent has no registry to dispatch tools".to_string()))?;

        let tool_input = vec![Item::new(call.input.clone())];
        match registry.execute(tool_node, tool_input, ctx).await {
            Ok(items) => {
                let jsons: Vec<Value> = items.into_iter().map(|i| i.json).collect();
                Ok(Value::Array(jsons))
            }
            // Tool failures become observations; the model decides how to
            // proceed.
            Err(e) => Ok(json!({"error": e.to_string()})),
        }
    }
}

fn parse_tool_call(answer: &str) -> Option<ToolCall> {
    let trimmed = answer.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if start >= end {
        return None;
    }
    let call: ToolCall = serde_json::from_str(&trimmed[start..=end]).ok()?;
    Some(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Workflow;
    use std::sync::Arc;

    #[test]
    fn test_parse_tool_call() {
        let call = parse_tool_call(r#"{"tool": "Search", "input": {"q": "rust"}}"#).unwrap();
        assert_eq!(call.tool, "Search");
        assert_eq!(call.input["q"], json!("rust"));

        assert!(parse_tool_call("plain answer").is_none());
        assert!(parse_tool_call(r#"{"notool": true}"#).is_none());
    }

    #[tokio::test]
    async fn test_agent_without_key_is_credential_missing() {
        let workflow: Workflow = serde_json::from_value(json!({
            "name": "wf",
            "nodes": [
                {"id": "a", "name": "Agent", "type": "agent", "parameters": {"prompt": "hi"}}
            ],
            "connections": {}
        }))
        .unwrap();
        let node = workflow.nodes[0].clone();
        let mut ctx = ExecutionContext::new(Arc::new(workflow));

        let err = AgentNode::new()
            .execute(&node, vec![Item::new(json!({}))], &mut ctx)
            .await
            .unwrap_err();
        assert!(err.is_credential_missing());
    }
}
