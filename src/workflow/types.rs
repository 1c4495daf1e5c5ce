//! Workflow type definitions.
//!
//! A workflow is a directed graph of typed nodes. Edges are grouped by
//! channel: `main` carries item sequences, the `ai_*` channels wire
//! capability providers (models, memory, tools) into consumer nodes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The data-carrying channel.
pub const CHANNEL_MAIN: &str = "main";

/// The tool-capability channel. Sources of these edges are executed on
/// demand by their consumer, never as graph roots.
pub const CHANNEL_AI_TOOL: &str = "ai_tool";

/// Auxiliary capability channels. They create scheduling dependencies but
/// never contribute to a consumer's main input.
pub const AUX_CHANNELS: &[&str] = &[
    "ai_languageModel",
    "ai_memory",
    "ai_tool",
    "ai_embedding",
    "ai_textSplitter",
    "ai_vectorStore",
    "ai_document",
];

/// Edge channel classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Main,
    Auxiliary,
}

impl Channel {
    pub fn classify(name: &str) -> Channel {
        if name == CHANNEL_MAIN {
            Channel::Main
        } else {
            Channel::Auxiliary
        }
    }
}

/// One connection record: the target node (by name or id) and the input
/// index on the target side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub node: String,
    #[serde(default)]
    pub index: u32,
}

/// source node name -> channel -> output slots -> connection records.
///
/// An empty slot is meaningful: it records that the branch exists but
/// produced nothing.
pub type Connections = HashMap<String, HashMap<String, Vec<Vec<ConnectionTarget>>>>;

/// A complete workflow definition. Immutable during an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub connections: Connections,
}

/// Failure policy for a single node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnError {
    #[default]
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "continueErrorOutput")]
    ContinueErrorOutput,
}

/// A node (operation) in the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    /// Fallback alias; references resolve by `name` first, then `id`.
    #[serde(default)]
    pub id: String,

    pub name: String,

    /// Node type (httpRequest, set, if, chainLlm, ...)
    #[serde(rename = "type")]
    pub node_type: String,

    /// Node-specific parameter tree
    #[serde(default = "empty_parameters")]
    pub parameters: Value,

    /// Credential references keyed by credential type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,

    #[serde(default, rename = "onError")]
    pub on_error: OnError,
}

fn empty_parameters() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Workflow {
    /// Resolve a node reference by name (first match wins) or id.
    pub fn find_node(&self, key: &str) -> Option<&NodeDef> {
        self.nodes
            .iter()
            .find(|n| n.name == key)
            .or_else(|| self.nodes.iter().find(|n| n.id == key))
    }

    /// Whether any node resolves the given reference.
    pub fn resolves(&self, key: &str) -> bool {
        self.find_node(key).is_some()
    }
}

/// A binary attachment on an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryPayload {
    /// Base64-encoded bytes
    pub data: String,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl BinaryPayload {
    /// Encode raw bytes into a payload.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        use base64::Engine as _;
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: None,
            file_name: None,
        }
    }

    /// Decode the payload back into bytes.
    pub fn bytes(&self) -> crate::error::Result<Vec<u8>> {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| crate::error::Error::Node(format!("Invalid binary payload: {}", e)))
    }
}

/// The unit of data on a `main` edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub json: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<HashMap<String, BinaryPayload>>,
}

impl Item {
    pub fn new(json: Value) -> Self {
        Self { json, binary: None }
    }

    /// The error-item shape stored when a node fails recoverably.
    pub fn error(message: &str) -> Self {
        Self::new(serde_json::json!({ "error": message }))
    }

    /// Wrap initial invocation data as an item sequence: an object becomes
    /// a single item, a sequence is normalized element by element.
    pub fn from_initial_data(data: &Value) -> Vec<Item> {
        match data {
            Value::Null => Vec::new(),
            Value::Array(elements) => elements.iter().map(Item::normalize).collect(),
            other => vec![Item::new(other.clone())],
        }
    }

    /// Normalize one value into an item: `{json: ..., binary?: ...}` shapes
    /// deserialize as-is, anything else is wrapped as the `json` field.
    pub fn normalize(value: &Value) -> Item {
        if let Value::Object(map) = value {
            if map.contains_key("json") {
                if let Ok(item) = serde_json::from_value::<Item>(value.clone()) {
                    return item;
                }
            }
        }
        Item::new(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_on_error_deserializes_aliases() {
        let node: NodeDef = serde_json::from_value(json!({
            "name": "A", "type": "set", "onError": "continueErrorOutput"
        }))
        .unwrap();
        assert_eq!(node.on_error, OnError::ContinueErrorOutput);

        let node: NodeDef = serde_json::from_value(json!({
            "name": "B", "type": "set"
        }))
        .unwrap();
        assert_eq!(node.on_error, OnError::Stop);
    }

    #[test]
    fn test_find_node_name_then_id() {
        let workflow: Workflow = serde_json::from_value(json!({
            "name": "wf",
            "nodes": [
                {"id": "n1", "name": "Fetch", "type": "httpRequest"},
                {"id": "n2", "name": "Parse", "type": "code"}
            ],
            "connections": {}
        }))
        .unwrap();

        assert_eq!(workflow.find_node("Fetch").unwrap().id, "n1");
        assert_eq!(workflow.find_node("n2").unwrap().name, "Parse");
        assert!(workflow.find_node("nope").is_none());
    }

    #[test]
    fn test_find_node_duplicate_names_first_wins() {
        let workflow: Workflow = serde_json::from_value(json!({
            "name": "wf",
            "nodes": [
                {"id": "a", "name": "Dup", "type": "set", "parameters": {"tag": 1}},
                {"id": "b", "name": "Dup", "type": "set", "parameters": {"tag": 2}}
            ],
            "connections": {}
        }))
        .unwrap();

        assert_eq!(workflow.find_node("Dup").unwrap().id, "a");
    }

    #[test]
    fn test_initial_data_wrapping() {
        let items = Item::from_initial_data(&json!({"x": 1}));
        assert_eq!(items, vec![Item::new(json!({"x": 1}))]);

        let items = Item::from_initial_data(&json!([{"x": 1}, {"json": {"y": 2}}]));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].json, json!({"x": 1}));
        assert_eq!(items[1].json, json!({"y": 2}));

        assert!(Item::from_initial_data(&Value::Null).is_empty());
    }

    #[test]
    fn test_binary_roundtrip() {
        let payload = BinaryPayload::from_bytes(b"hello");
        assert_eq!(payload.bytes().unwrap(), b"hello");
    }

    #[test]
    fn test_connection_target_default_index() {
        let target: ConnectionTarget = serde_json::from_value(json!({"node": "B"})).unwrap();
        assert_eq!(target.index, 0);
    }
}
