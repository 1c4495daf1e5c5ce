//! Limit node - keep the first N items.

use async_trait::async_trait;
use serde::Deserialize;

use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::workflow::{Item, NodeDef};

/// Limit node implementation.
pub struct LimitNode;

impl LimitNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LimitNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct LimitConfig {
    #[serde(default = "default_max", rename = "maxItems")]
    max_items: usize,
}

fn default_max() -> usize {
    1
}

#[async_trait]
impl NodeExecutor for LimitNode {
    fn node_type(&self) -> &str {
        "limit"
    }

    fn description(&self) -> &str {
        "Keep at most the first N items"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        mut input: Vec<Item>,
        _ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let config: LimitConfig = serde_json::from_value(node.parameters.clone())
            .map_err(|e| Error::Node(format!("Invalid limit parameters: {}", e)))?;
        input.truncate(config.max_items);
        Ok(input)
    }
}
