//! Language-model nodes.
//!
//! `languageModel` is a capability provider: it emits its model
//! configuration as an item, consumed over the `ai_languageModel` channel.
//! `chainLlm` is the composite that reads the provider through the
//! context's committed outputs and calls an OpenAI-compatible chat
//! endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::expression;
use crate::workflow::{aux_provider, Item, NodeDef};

/// Model configuration carried on the `ai_languageModel` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default, rename = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_provider() -> String {
    "openrouter".to_string()
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

impl ModelConfig {
    fn endpoint(&self) -> String {
        if let Some(base) = &self.base_url {
            return base.clone();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1/chat/completions".to_string(),
            _ => "https://openrouter.ai/api/v1/chat/completions".to_string(),
        }
    }
}

/// languageModel capability provider.
pub struct LanguageModelNode;

impl LanguageModelNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LanguageModelNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for LanguageModelNode {
    fn node_type(&self) -> &str {
        "languageModel"
    }

    fn description(&self) -> &str {
        "Provide a language-model configuration to AI composite nodes"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        _input: Vec<Item>,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let mut config: ModelConfig = serde_json::from_value(node.parameters.clone())
            .map_err(|e| Error::Node(format!("Invalid languageModel parameters: {}", e)))?;

        // Empty keys fall back to the token bag so injection and direct
        // parameterization behave the same.
        if config.api_key.as_deref().map(str::is_empty).unwrap_or(true) {
            config.api_key = ["openAiApiKey", "openRouterApiKey", "anthropicApiKey"]
                .iter()
                .find_map(|name| ctx.token(name))
                .map(|s| s.to_string());
        }

        Ok(vec![Item::new(serde_json::to_value(&config)?)])
    }
}

/// chainLlm composite node.
pub struct ChainLlmNode {
    client: Client,
}

impl ChainLlmNode {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for ChainLlmNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChainConfig {
    #[serde(default, alias = "text")]
    pub(crate) prompt: String,
    #[serde(default)]
    pub(crate) system: Option<String>,
    #[serde(default = "default_response_format", rename = "responseFormat")]
    pub(crate) response_format: String,
    #[serde(default = "default_timeout", rename = "timeoutSeconds")]
    pub(crate) timeout_seconds: u64,
}

fn default_response_format() -> String {
    "text".to_string()
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl NodeExecutor for ChainLlmNode {
    fn node_type(&self) -> &str {
        "chainLlm"
    }

    fn description(&self) -> &str {
        "Run a prompt through the wired language model, once per item"
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
                    "API_KEY not provided for chainLlm node '{}'",
                    node.name
                ))
            })?
            .to_string();

        let mut output = Vec::with_capacity(input.len());
        for item in &input {
            let current = std::slice::from_ref(item);
            let rendered = expression::render_parameters(&node.parameters, ctx, current);
            let config: ChainConfig = serde_json::from_value(rendered)
                .map_err(|e| Error::Node(format!("Invalid chainLlm parameters: {}", e)))?;

            let content =
                complete(&self.client, &model, &api_key, &config).await?;
            output.push(Item::new(shape_response(&content, &config.response_format)));
        }
        Ok(output)
    }
}

/// Read the model configuration from the node's `ai_languageModel`
/// provider; fall back to the node's own parameters when no provider is
/// wired.
pub(crate) fn resolve_model(node: &NodeDef, ctx: &ExecutionContext) -> Result<ModelConfig> {
    let workflow = ctx.workflow.clone();
    if let Some(provider) = aux_provider(&workflow, &node.name, "ai_languageModel") {
        if let Some(items) = ctx.output(&provider) {
            if let Some(item) = items.first() {
                return serde_json::from_value(item.json.clone())
                    .map_err(|e| Error::Node(format!("Invalid model provider output: {}", e)));
            }
        }
        debug!(provider = %provider, "model provider produced no output");
    }

    let mut model: ModelConfig = serde_json::from_value(node.parameters.clone())
        .unwrap_or_else(|_| ModelConfig {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            temperature: None,
        });
    if model.api_key.as_deref().map(str::is_empty).unwrap_or(true) {
        model.api_key = ["openAiApiKey", "openRouterApiKey", "anthropicApiKey"]
            .iter()
            .find_map(|name| ctx.token(name))
            .map(|s| s.to_string());
    }
    Ok(model)
}

pub(crate) async fn complete(
    client: &Client,
    model: &ModelConfig,
    api_key: &str,
    config: &ChainConfig,
) -> Result<String> {
    let mut messages = Vec::new();
    if let Some(system) = &config.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": config.prompt}));

    let mut body = json!({
        "model": model.model,
        "messages": messages,
    });
    if let Some(temperature) = model.temperature {
        body["temperature"] = json!(temperature);
    }

    let start = std::time::Instant::now();
    let response = client
        .post(model.endpoint())
        .bearer_auth(api_key)
        .timeout(std::time::Duration::from_secs(config.timeout_seconds))
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(Error::Node(format!("LLM API error ({}): {}", status, text)));
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| Error::Node(format!("Failed to parse LLM response: {}", e)))?;

    info!("LLM completion received ({}ms)", start.elapsed().as_millis());

    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| Error::Node("LLM response contained no choices".to_string()))
}

fn shape_response(content: &str, response_format: &str) -> Value {
    if response_format == "json" {
        match serde_json::from_str(content) {
            Ok(parsed) => return parsed,
            Err(e) => {
                warn!("Failed to parse LLM response as JSON: {}", e);
                if let Some(extracted) = extract_json(content) {
                    return extracted;
                }
            }
        }
    }
    json!({ "text": content })
}

/// Try to extract JSON from a string that may contain extra text.
fn extract_json(s: &str) -> Option<Value> {
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (s.find(open), s.rfind(close)) {
            if start < end {
                if let Ok(parsed) = serde_json::from_str(&s[start..=end]) {
                    return Some(parsed);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Workflow;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn chain_workflow() -> Workflow {
        serde_json::from_value(json!({
            "name": "wf",
            "nodes": [
                {"id": "m", "name": "Model", "type": "languageModel",
                 "parameters": {"provider": "openai", "model": "gpt-4o", "apiKey": "sk-1"}},
                {"id": "c", "name": "Chain", "type": "chainLlm",
                 "parameters": {"prompt": "hi"}}
            ],
            "connections": {
                "Model": {"ai_languageModel": [[{"node": "Chain"}]]}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_language_model_emits_config() {
        let workflow = Arc::new(chain_workflow());
        let node = workflow.find_node("Model").unwrap().clone();
        let mut ctx = ExecutionContext::new(workflow);

        let out = LanguageModelNode::new()
            .execute(&node, Vec::new(), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out[0].json["model"], json!("gpt-4o"));
        assert_eq!(out[0].json["apiKey"], json!("sk-1"));
    }

    #[tokio::test]
    async fn test_language_model_falls_back_to_tokens() {
        let workflow = Arc::new(chain_workflow());
        let node = workflow.find_node("Model").unwrap().clone();
        let mut node = node;
        node.parameters = json!({"provider": "openai", "model": "gpt-4o"});
        let mut tokens = HashMap::new();
        tokens.insert("openAiApiKey".to_string(), "sk-token".to_string());
        let mut ctx = ExecutionContext::new(workflow).with_tokens(tokens);

        let out = LanguageModelNode::new()
            .execute(&node, Vec::new(), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out[0].json["apiKey"], json!("sk-token"));
    }

    #[test]
    fn test_resolve_model_from_provider_output() {
        let workflow = Arc::new(chain_workflow());
        let model_node = workflow.find_node("Model").unwrap().clone();
        let chain_node = workflow.find_node("Chain").unwrap().clone();
        let mut ctx = ExecutionContext::new(workflow);
        ctx.commit_output(
            &model_node,
            vec![Item::new(json!({"provider": "openai", "model": "gpt-4o", "apiKey": "sk-9"}))],
        );

        let model = resolve_model(&chain_node, &ctx).unwrap();
        assert_eq!(model.model, "gpt-4o");
        assert_eq!(model.api_key.as_deref(), Some("sk-9"));
    }

    #[tokio::test]
    async fn test_chain_llm_without_key_is_credential_missing() {
        let workflow = Arc::new(chain_workflow());
        let chain_node = workflow.find_node("Chain").unwrap().clone();
        let mut ctx = ExecutionContext::new(workflow);
        // Provider executed but carried no key.
        let model_node = ctx.workflow.find_node("Model").unwrap().clone();
        ctx.commit_output(
            &model_node,
            vec![Item::new(json!({"provider": "openai", "model": "gpt-4o"}))],
        );

        let err = ChainLlmNode::new()
            .execute(&chain_node, vec![Item::new(json!({}))], &mut ctx)
            .await
            .unwrap_err();
        assert!(err.is_credential_missing());
        assert!(err.to_string().contains("API_KEY not provided"));
    }

    #[test]
    fn test_extract_json() {
        let s = "Result: {\"urgency\": \"high\"} done";
        assert_eq!(extract_json(s).unwrap()["urgency"], json!("high"));
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn test_endpoint_defaults() {
        let model = ModelConfig {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            base_url: None,
            temperature: None,
        };
        assert!(model.endpoint().contains("api.openai.com"));

        let model = ModelConfig {
            provider: "openrouter".to_string(),
            base_url: Some("http://localhost:9999/v1".to_string()),
            ..model
        };
        assert_eq!(model.endpoint(), "http://localhost:9999/v1");
    }
}
