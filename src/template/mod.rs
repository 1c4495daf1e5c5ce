//! Template preparation: parameter substitution and credential
//! placeholder resolution over a deep-copied workflow.
//!
//! Parameter placeholders are `{{NAME}}` with `NAME` matching
//! `[A-Z0-9_]+` — distinct from the expression language, whose lowercase
//! and dotted forms pass through untouched.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tracing::debug;

use crate::workflow::Workflow;

const PLACEHOLDER: &str = r"\{\{\s*([A-Z0-9_]+)\s*\}\}";

/// Credential-type key -> canonical token name. The table is a function:
/// no key maps to two canonical names.
pub fn credential_type_token(cred_type: &str) -> Option<&'static str> {
    match cred_type {
        "openRouterApi" => Some("openRouterApiKey"),
        "openAiApi" => Some("openAiApiKey"),
        "anthropicApi" => Some("anthropicApiKey"),
        "huggingFaceApi" => Some("huggingFaceApiKey"),
        "googleDriveOAuth2Api" | "googleSheetsOAuth2Api" | "gmailOAuth2" | "googleApi" => {
            Some("googleAccessToken")
        }
        "slackApi" | "slackOAuth2Api" => Some("slackAccessToken"),
        "tiktokApi" => Some("tiktokAccessToken"),
        "notionApi" => Some("notionAccessToken"),
        "airtableTokenApi" => Some("airtableApiKey"),
        _ => None,
    }
}

/// The result of preparing a template for one invocation.
#[derive(Debug, Clone)]
pub struct PreparedTemplate {
    pub workflow: Workflow,
    /// Canonical token name -> developer-key secret, resolved from
    /// `{{CRED_NAME}}` credential placeholders.
    pub resolved_credentials: HashMap<String, String>,
}

/// Prepare a workflow template: substitute `{{NAME}}` parameters through
/// every string value, then resolve credential placeholders against the
/// developer keys. The input workflow is deep-copied; the template itself
/// is never mutated.
pub fn prepare_template(
    template: &Workflow,
    params: &HashMap<String, Value>,
    developer_keys: &HashMap<String, String>,
) -> PreparedTemplate {
    let mut workflow = template.clone();
    let mut resolved_credentials = HashMap::new();

    for node in &mut workflow.nodes {
        node.parameters = substitute_value(&node.parameters, params);

        if let Some(credentials) = node.credentials.as_mut() {
            resolve_credentials(credentials, developer_keys, &mut resolved_credentials);
        }
    }

    PreparedTemplate {
        workflow,
        resolved_credentials,
    }
}

/// Substitute placeholders through one JSON tree.
pub fn substitute_value(value: &Value, params: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => substitute_string(s, params),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, params)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| substitute_value(v, params)).collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_string(s: &str, params: &HashMap<String, Value>) -> Value {
    let re = regex_lite::Regex::new(PLACEHOLDER).expect("static regex");

    // A string that is exactly one placeholder takes the typed parameter
    // value rather than a string coercion.
    if let Some(caps) = re.captures(s.trim()) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(s.trim().len()) {
            if let Some(value) = params.get(&caps[1]) {
                if !value.is_string() {
                    return value.clone();
                }
            }
        }
    }

    let replaced = re.replace_all(s, |caps: &regex_lite::Captures| {
        match params.get(&caps[1]) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            // Unknown placeholders are left untouched.
            None => caps[0].to_string(),
        }
    });

    Value::String(replaced.to_string())
}

/// Resolve `{"id": "{{CRED_NAME}}"}` credential entries. When the
/// developer keys carry `CRED_NAME`, the credential-type key is mapped to
/// its canonical token name and the secret is emitted; the entry is marked
/// resolved so executors skip their own lookup.
fn resolve_credentials(
    credentials: &mut Value,
    developer_keys: &HashMap<String, String>,
    resolved: &mut HashMap<String, String>,
) {
    let re = regex_lite::Regex::new(r"^\{\{([A-Z0-9_]+)\}\}$").expect("static regex");
    let Some(map) = credentials.as_object_mut() else {
        return;
    };

    for (cred_type, entry) in map.iter_mut() {
        let Some(entry_map) = entry.as_object_mut() else {
            continue;
        };
        let Some(id) = entry_map.get("id").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(caps) = re.captures(id) else {
            continue;
        };
        let Some(secret) = developer_keys.get(&caps[1]) else {
            continue;
        };

        match credential_type_token(cred_type) {
            Some(canonical) => {
                resolved.insert(canonical.to_string(), secret.clone());
                entry_map.insert("resolved".to_string(), Value::Bool(true));
            }
            None => {
                debug!(cred_type = %cred_type, "no canonical token for credential type");
            }
        }
    }
}

/// The set of parameter names a workflow requires: every `{{NAME}}`
/// found while walking all string values.
pub fn required_parameters(workflow: &Workflow) -> BTreeSet<String> {
    let re = regex_lite::Regex::new(PLACEHOLDER).expect("static regex");
    let mut names = BTreeSet::new();
    for node in &workflow.nodes {
        collect_placeholders(&node.parameters, &re, &mut names);
        if let Some(credentials) = &node.credentials {
            collect_placeholders(credentials, &re, &mut names);
        }
    }
    names
}

fn collect_placeholders(value: &Value, re: &regex_lite::Regex, names: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for caps in re.captures_iter(s) {
                names.insert(caps[1].to_string());
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_placeholders(v, re, names);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_placeholders(v, re, names);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> Workflow {
        serde_json::from_value(json!({
            "name": "tmpl",
            "nodes": [
                {
                    "id": "1",
                    "name": "Fetch",
                    "type": "httpRequest",
                    "parameters": {
                        "url": "https://api.example.com/{{CHANNEL_ID}}/items",
                        "limit": "{{MAX_ITEMS}}",
                        "expr": "{{ $json.field }}"
                    }
                },
                {
                    "id": "2",
                    "name": "Summarize",
                    "type": "chainLlm",
                    "parameters": {"prompt": "Summarize {{TOPIC}}"},
                    "credentials": {
                        "openRouterApi": {"id": "{{OPENROUTER_KEY}}", "name": "OpenRouter"}
                    }
                }
            ],
            "connections": {}
        }))
        .unwrap()
    }

    #[test]
    fn test_substitution_string_and_typed() {
        let mut params = HashMap::new();
        params.insert("CHANNEL_ID".to_string(), json!("abc"));
        params.insert("MAX_ITEMS".to_string(), json!(25));
        params.insert("TOPIC".to_string(), json!("rust"));

        let prepared = prepare_template(&template(), &params, &HashMap::new());
        let fetch = prepared.workflow.find_node("Fetch").unwrap();
        assert_eq!(
            fetch.parameters["url"],
            json!("https://api.example.com/abc/items")
        );
        // Whole-string placeholder keeps the number typed.
        assert_eq!(fetch.parameters["limit"], json!(25));
        // Expression-language forms are not parameter placeholders.
        assert_eq!(fetch.parameters["expr"], json!("{{ $json.field }}"));
    }

    #[test]
    fn test_unknown_placeholder_left_untouched() {
        let prepared = prepare_template(&template(), &HashMap::new(), &HashMap::new());
        let fetch = prepared.workflow.find_node("Fetch").unwrap();
        assert_eq!(
            fetch.parameters["url"],
            json!("https://api.example.com/{{CHANNEL_ID}}/items")
        );
        assert_eq!(fetch.parameters["limit"], json!("{{MAX_ITEMS}}"));
    }

    #[test]
    fn test_credential_resolution() {
        let mut keys = HashMap::new();
        keys.insert("OPENROUTER_KEY".to_string(), "sk-or-123".to_string());

        let prepared = prepare_template(&template(), &HashMap::new(), &keys);
        assert_eq!(
            prepared.resolved_credentials.get("openRouterApiKey"),
            Some(&"sk-or-123".to_string())
        );
        let node = prepared.workflow.find_node("Summarize").unwrap();
        let entry = &node.credentials.as_ref().unwrap()["openRouterApi"];
        assert_eq!(entry["resolved"], json!(true));
    }

    #[test]
    fn test_credential_without_developer_key_untouched() {
        let prepared = prepare_template(&template(), &HashMap::new(), &HashMap::new());
        assert!(prepared.resolved_credentials.is_empty());
        let node = prepared.workflow.find_node("Summarize").unwrap();
        let entry = &node.credentials.as_ref().unwrap()["openRouterApi"];
        assert!(entry.get("resolved").is_none());
    }

    #[test]
    fn test_required_parameters() {
        let names = required_parameters(&template());
        let expected: BTreeSet<String> = ["CHANNEL_ID", "MAX_ITEMS", "TOPIC", "OPENROUTER_KEY"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_template_is_not_mutated() {
        let template = template();
        let mut params = HashMap::new();
        params.insert("TOPIC".to_string(), json!("rust"));
        let _ = prepare_template(&template, &params, &HashMap::new());
        let node = template.find_node("Summarize").unwrap();
        assert_eq!(node.parameters["prompt"], json!("Summarize {{TOPIC}}"));
    }

    #[test]
    fn test_preparation_is_deterministic() {
        let mut params = HashMap::new();
        params.insert("CHANNEL_ID".to_string(), json!("abc"));
        params.insert("MAX_ITEMS".to_string(), json!(10));
        params.insert("TOPIC".to_string(), json!("t"));
        let a = prepare_template(&template(), &params, &HashMap::new());
        let b = prepare_template(&template(), &params, &HashMap::new());
        assert_eq!(
            serde_json::to_value(&a.workflow).unwrap(),
            serde_json::to_value(&b.workflow).unwrap()
        );
    }
}
