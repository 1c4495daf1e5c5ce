//! HTTP request node.
//!
//! Runs once per input item with url/headers/body rendered against that
//! item. Default timeout is 30 seconds per request.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::expression;
use crate::workflow::{Item, NodeDef};

/// HTTP request node.
pub struct HttpRequestNode {
    client: Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct HttpConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: Option<Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    authentication: Option<AuthConfig>,
    #[serde(default = "default_timeout", rename = "timeoutSeconds")]
    timeout_seconds: u64,
    /// Return raw text instead of parsing JSON
    #[serde(default, rename = "rawResponse")]
    raw_response: bool,
}

#[derive(Debug, Deserialize)]
struct AuthConfig {
    #[serde(rename = "type")]
    auth_type: String,
    #[serde(default)]
    token: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    30
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> &str {
        "httpRequest"
    }

    fn description(&self) -> &str {
        "Make HTTP requests (GET, POST, PUT, DELETE, PATCH)"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let mut output = Vec::with_capacity(input.len());
        for item in &input {
            let current = std::slice::from_ref(item);
            let rendered = expression::render_parameters(&node.parameters, ctx, current);
            let config: HttpConfig = serde_json::from_value(rendered)
                .map_err(|e| Error::Node(format!("Invalid httpRequest parameters: {}", e)))?;
            output.push(self.request(&config).await?);
        }
        Ok(output)
    }
}

impl HttpRequestNode {
    async fn request(&self, config: &HttpConfig) -> Result<Item> {
        debug!("HTTP {} {}", config.method, config.url);

        let mut request = match config.method.to_uppercase().as_str() {
            "GET" => self.client.get(&config.url),
            "POST" => self.client.post(&config.url),
            "PUT" => self.client.put(&config.url),
            "DELETE" => self.client.delete(&config.url),
            "PATCH" => self.client.patch(&config.url),
            "HEAD" => self.client.head(&config.url),
            other => return Err(Error::Node(format!("Unknown HTTP method: {}", other))),
        };

        if let Some(auth) = &config.authentication {
            if auth.auth_type == "bearer" {
                let token = auth
                    .token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        Error::CredentialMissing(
                            "access token not provided for httpRequest bearer auth".to_string(),
                        )
                    })?;
                request = request.bearer_auth(token);
            }
        }

        if let Some(headers) = config.headers.as_ref().and_then(|h| h.as_object()) {
            for (key, value) in headers {
                let header_value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(key, header_value);
            }
        }

        if let Some(body) = &config.body {
            request = request.json(body);
        }

        request = request.timeout(std::time::Duration::from_secs(config.timeout_seconds));

        let start = std::time::Instant::now();
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body_text = response.text().await.map_err(|e| {
            Error::Node(format!(
                "Failed to read HTTP response body from {}: {}",
                config.url, e
            ))
        })?;

        if status >= 400 {
            return Err(Error::Node(format!(
                "HTTP {} {} -> {}: {}",
                config.method, config.url, status, body_text
            )));
        }

        let body: Value = if config.raw_response {
            Value::String(body_text)
        } else {
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text))
        };

        info!(
            "HTTP {} {} -> {} ({}ms)",
            config.method,
            config.url,
            status,
            start.elapsed().as_millis()
        );

        Ok(Item::new(json!({
            "status": status,
            "body": body,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Workflow;
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        let workflow: Workflow =
            serde_json::from_value(json!({"name": "wf", "nodes": [], "connections": {}})).unwrap();
        ExecutionContext::new(Arc::new(workflow))
    }

    fn node(parameters: Value) -> NodeDef {
        serde_json::from_value(json!({
            "id": "1", "name": "Fetch", "type": "httpRequest", "parameters": parameters
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_bearer_auth_without_token_is_credential_missing() {
        let executor = HttpRequestNode::new();
        let mut ctx = ctx();
        let err = executor
            .execute(
                &node(json!({
                    "url": "https://example.com",
                    "authentication": {"type": "bearer", "token": ""}
                })),
                vec![Item::new(json!({}))],
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert!(err.is_credential_missing());
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let executor = HttpRequestNode::new();
        let mut ctx = ctx();
        let err = executor
            .execute(
                &node(json!({"url": "https://example.com", "method": "TELEPORT"})),
                vec![Item::new(json!({}))],
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NODE_ERROR");
    }

    #[test]
    fn test_config_defaults() {
        let config: HttpConfig =
            serde_json::from_value(json!({"url": "https://example.com"})).unwrap();
        assert_eq!(config.method, "GET");
        assert_eq!(config.timeout_seconds, 30);
        assert!(!config.raw_response);
    }
}
