//! Set node - assign fields on each item.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::expression;
use crate::workflow::{Item, NodeDef};

/// Set node implementation.
pub struct SetNode;

impl SetNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SetNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SetConfig {
    /// field name -> value (expressions allowed)
    #[serde(default)]
    fields: serde_json::Map<String, Value>,

    /// Drop all input fields and keep only the assigned ones
    #[serde(default, rename = "keepOnlySet")]
    keep_only_set: bool,
}

#[async_trait]
impl NodeExecutor for SetNode {
    fn node_type(&self) -> &str {
        "set"
    }

    fn description(&self) -> &str {
        "Assign fields on every item, optionally dropping the rest"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let config: SetConfig = serde_json::from_value(node.parameters.clone())
            .map_err(|e| Error::Node(format!("Invalid set parameters: {}", e)))?;

        let mut output = Vec::with_capacity(input.len());
        for item in &input {
            let current = std::slice::from_ref(item);
            let mut json = if config.keep_only_set {
                serde_json::Map::new()
            } else {
                item.json.as_object().cloned().unwrap_or_default()
            };

            for (name, raw) in &config.fields {
                let value = expression::render_parameters(raw, ctx, current);
                json.insert(name.clone(), value);
            }

            output.push(Item {
                json: Value::Object(json),
                binary: item.binary.clone(),
            });
        }

        Ok(output)
    }
}
