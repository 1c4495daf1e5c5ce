//! Merge node - combine items arriving from multiple sources.
//!
//! The engine already concatenates all incoming `main` edges in source
//! iteration order; append mode passes that sequence through, combine
//! folds every item's fields into one.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::workflow::{Item, NodeDef};

/// Merge node implementation.
pub struct MergeNode;

impl MergeNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MergeNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct MergeConfig {
    #[serde(default = "default_mode")]
    mode: String, // append | combine
}

fn default_mode() -> String {
    "append".to_string()
}

#[async_trait]
impl NodeExecutor for MergeNode {
    fn node_type(&self) -> &str {
        "merge"
    }

    fn description(&self) -> &str {
        "Combine inputs by appending items or folding their fields"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        _ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let config: MergeConfig = serde_json::from_value(node.parameters.clone())
            .map_err(|e| Error::Node(format!("Invalid merge parameters: {}", e)))?;

        match config.mode.to_lowercase().as_str() {
            "append" => Ok(input),
            "combine" => {
                let mut combined = serde_json::Map::new();
                for item in &input {
                    if let Value::Object(map) = &item.json {
                        for (k, v) in map {
                            combined.insert(k.clone(), v.clone());
                        }
                    } else {
                        return Err(Error::Node(
                            "merge combine mode requires object items".to_string(),
                        ));
                    }
                }
                Ok(vec![Item::new(Value::Object(combined))])
            }
            other => Err(Error::Node(format!(
                "Invalid merge mode '{}', expected append/combine",
                other
            ))),
        }
    }
}
