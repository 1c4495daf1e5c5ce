//! Sticky-note node - UI annotation, never executed.

use async_trait::async_trait;

use super::NodeExecutor;
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::workflow::{Item, NodeDef};

/// Sticky-note placeholder. The engine filters these out of scheduling;
/// the executor exists so the type is registered and validation passes.
pub struct StickyNoteNode;

impl StickyNoteNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StickyNoteNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for StickyNoteNode {
    fn node_type(&self) -> &str {
        "stickyNote"
    }

    fn description(&self) -> &str {
        "Canvas annotation with no runtime behavior"
    }

    async fn execute(
        &self,
        _node: &NodeDef,
        _input: Vec<Item>,
        _ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        Ok(Vec::new())
    }
}
