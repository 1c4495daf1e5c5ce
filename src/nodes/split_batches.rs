//! splitInBatches node - emit one batch of the input per invocation.
//!
//! Batch state (`all_items`, `cursor`, `total_batches`) lives in the
//! context's batch-state map keyed by node name, so it persists across
//! engine invocations within one polling series. The entry resets after
//! the final batch is emitted.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::NodeExecutor;
use crate::engine::{BatchState, ExecutionContext};
use crate::error::{Error, Result};
use crate::workflow::{Item, NodeDef};

/// splitInBatches node implementation.
pub struct SplitInBatchesNode;

impl SplitInBatchesNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SplitInBatchesNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SplitConfig {
    #[serde(default = "default_batch_size", rename = "batchSize")]
    batch_size: usize,
}

fn default_batch_size() -> usize {
    10
}

#[async_trait]
impl NodeExecutor for SplitInBatchesNode {
    fn node_type(&self) -> &str {
        "splitInBatches"
    }

    fn description(&self) -> &str {
        "Emit the input in fixed-size batches, one batch per invocation"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let config: SplitConfig = serde_json::from_value(node.parameters.clone())
            .map_err(|e| Error::Node(format!("Invalid splitInBatches parameters: {}", e)))?;
        if config.batch_size == 0 {
            return Err(Error::Node("batchSize must be >= 1".to_string()));
        }

        let state = ctx
            .batch_states
            .entry(node.name.clone())
            .or_insert_with(|| {
                let total_batches = input.len().div_ceil(config.batch_size);
                BatchState {
                    all_items: input,
                    cursor: 0,
                    total_batches,
                }
            });

        let start = state.cursor * config.batch_size;
        let end = (start + config.batch_size).min(state.all_items.len());
        let batch: Vec<Item> = state.all_items[start..end].to_vec();
        state.cursor += 1;

        debug!(
            node = %node.name,
            batch = state.cursor,
            total = state.total_batches,
            size = batch.len(),
            "emitting batch"
        );

        if state.cursor >= state.total_batches {
            ctx.batch_states.remove(&node.name);
        }

        Ok(batch)
    }
}
