//! Token-name normalization and credential injection.
//!
//! External callers hand over tokens under provider-specific names
//! (`google_oauth_token`, `openai_key`, ...); normalization maps them onto
//! the canonical names the executors expect. Workflow preprocessing then
//! walks the prepared graph and fills empty credential parameters from the
//! normalized bag. Trigger nodes are exempt: their parameters describe
//! schedules, not credentials.

use std::collections::HashMap;

use serde_json::Value;

use crate::engine::ExecutionContext;
use crate::expression;
use crate::workflow::Workflow;

/// Default external -> canonical token-name table.
fn canonical_name(external: &str) -> Option<&'static str> {
    match external {
        "google_oauth_token" | "google_access_token" | "google_token" => Some("googleAccessToken"),
        "openai_api_key" | "openai_key" => Some("openAiApiKey"),
        "openrouter_api_key" | "openrouter_key" | "open_router_key" => Some("openRouterApiKey"),
        "anthropic_api_key" | "claude_api_key" => Some("anthropicApiKey"),
        "huggingface_api_key" | "hf_token" => Some("huggingFaceApiKey"),
        "slack_token" | "slack_access_token" => Some("slackAccessToken"),
        "tiktok_access_token" | "tiktok_token" => Some("tiktokAccessToken"),
        "notion_token" | "notion_api_key" => Some("notionAccessToken"),
        "airtable_api_key" => Some("airtableApiKey"),
        _ => None,
    }
}

/// Candidate token names tried, in order, when filling a recognized
/// credential-parameter key.
fn fill_candidates(key: &str) -> Option<&'static [&'static str]> {
    match key {
        "apiKey" | "api_key" => Some(&[
            "openAiApiKey",
            "openRouterApiKey",
            "anthropicApiKey",
            "huggingFaceApiKey",
        ]),
        "accessToken" | "access_token" | "token" => Some(&[
            "googleAccessToken",
            "slackAccessToken",
            "tiktokAccessToken",
            "notionAccessToken",
        ]),
        // Named equivalents fill only from their own canonical token.
        "openAiApiKey" => Some(&["openAiApiKey"]),
        "openRouterApiKey" => Some(&["openRouterApiKey"]),
        "anthropicApiKey" => Some(&["anthropicApiKey"]),
        "huggingFaceApiKey" => Some(&["huggingFaceApiKey"]),
        "googleAccessToken" => Some(&["googleAccessToken"]),
        "slackAccessToken" => Some(&["slackAccessToken"]),
        "tiktokAccessToken" => Some(&["tiktokAccessToken"]),
        "notionAccessToken" => Some(&["notionAccessToken"]),
        "airtableApiKey" => Some(&["airtableApiKey"]),
        _ => None,
    }
}

/// Normalize a raw token map. Caller-supplied overrides take precedence
/// over the default table; unknown keys pass through unchanged.
pub fn normalize_tokens(
    raw: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut normalized = HashMap::new();
    for (key, value) in raw {
        let canonical = overrides
            .get(key)
            .map(|s| s.as_str())
            .or_else(|| canonical_name(key))
            .unwrap_or(key.as_str());
        normalized.insert(canonical.to_string(), value.clone());
    }
    normalized
}

/// Walk the prepared workflow and inject tokens: evaluate `$tokens`
/// expressions, replace bare `$tokens.X` strings, and fill empty
/// credential parameters (including under nested `authentication.*` and
/// `credentials.*` sub-objects) from the first available candidate token.
pub fn preprocess_workflow(workflow: &mut Workflow, tokens: &HashMap<String, String>) {
    // The evaluator only needs the token bag here; the graph itself is
    // irrelevant to `$tokens` resolution.
    let empty = Workflow {
        name: workflow.name.clone(),
        nodes: Vec::new(),
        connections: Default::default(),
    };
    let ctx = ExecutionContext::new(std::sync::Arc::new(empty)).with_tokens(tokens.clone());

    for node in &mut workflow.nodes {
        if crate::nodes::is_trigger(&node.node_type) {
            continue;
        }
        node.parameters = inject_value(&node.parameters, tokens, &ctx);
    }
}

fn inject_value(
    value: &Value,
    tokens: &HashMap<String, String>,
    ctx: &ExecutionContext,
) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let injected = inject_value(v, tokens, ctx);
                    let filled = fill_credential(key, injected, tokens);
                    (key.clone(), filled)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| inject_value(v, tokens, ctx))
                .collect(),
        ),
        Value::String(s) => inject_string(s, tokens, ctx),
        other => other.clone(),
    }
}

fn inject_string(s: &str, tokens: &HashMap<String, String>, ctx: &ExecutionContext) -> Value {
    // Bare `$tokens.X` reference without interpolation braces.
    if let Some(name) = s.trim().strip_prefix("$tokens.") {
        if let Some(value) = tokens.get(name.trim()) {
            return Value::String(value.clone());
        }
        return Value::String(s.to_string());
    }

    if s.contains("{{") && s.contains("$tokens") {
        return expression::render_string(s, ctx, &[]);
    }

    Value::String(s.to_string())
}

fn fill_credential(key: &str, value: Value, tokens: &HashMap<String, String>) -> Value {
    let empty = match &value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    };
    if !empty {
        return value;
    }
    let Some(candidates) = fill_candidates(key) else {
        return value;
    };
    for candidate in candidates {
        if let Some(secret) = tokens.get(*candidate) {
            return Value::String(secret.clone());
        }
    }
    value
}
