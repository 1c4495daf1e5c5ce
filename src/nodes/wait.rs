//! Wait node - pause execution for a user-specified duration.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::workflow::{Item, NodeDef};

/// Wait node that pauses execution and passes its input through.
pub struct WaitNode;

impl WaitNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WaitNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct WaitConfig {
    #[serde(default = "default_amount")]
    amount: f64,

    /// "ms", "s", "m", or "h"
    #[serde(default = "default_unit")]
    unit: String,
}

fn default_amount() -> f64 {
    1.0
}

fn default_unit() -> String {
    "s".to_string()
}

fn duration_ms(config: &WaitConfig) -> Result<u64> {
    if config.amount < 0.0 {
        return Err(Error::Node("Wait duration cannot be negative".to_string()));
    }
    let factor = match config.unit.as_str() {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        other => {
            return Err(Error::Node(format!(
                "Invalid wait unit '{}', expected ms/s/m/h",
                other
            )))
        }
    };
    Ok((config.amount * factor) as u64)
}

#[async_trait]
impl NodeExecutor for WaitNode {
    fn node_type(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Pause execution for a specified duration"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        _ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let config: WaitConfig = serde_json::from_value(node.parameters.clone())
            .map_err(|e| Error::Node(format!("Invalid wait parameters: {}", e)))?;

        let wait_ms = duration_ms(&config)?;
        if wait_ms > 0 {
            info!(node = %node.name, wait_ms, "wait node pausing");
            tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
        }

        Ok(input)
    }
}
