//! Node registry - string-keyed dispatch to executors.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    AgentNode, ChainLlmNode, CodeNode, DriveTriggerNode, HttpRequestNode, IfNode,
    LanguageModelNode, LimitNode, ManualTriggerNode, MergeNode, NodeExecutor, ScheduleTriggerNode,
    SetNode, SplitInBatchesNode, StickyNoteNode, WaitNode, WebhookNode,
};
use crate::engine::ExecutionContext;
use crate::error::{Error, Result};
use crate::workflow::{Item, NodeDef};

/// Registry of available node types.
#[derive(Clone)]
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    /// Create a new registry with the built-in executors.
    pub fn new() -> Self {
        let mut registry = Self {
            executors: HashMap::new(),
        };

        registry.register(Arc::new(ManualTriggerNode::new()));
        registry.register(Arc::new(ScheduleTriggerNode::new()));
        registry.register(Arc::new(WebhookNode::new()));
        registry.register(Arc::new(DriveTriggerNode::new()));
        registry.register(Arc::new(SetNode::new()));
        registry.register(Arc::new(CodeNode::new()));
        registry.register(Arc::new(IfNode::new()));
        registry.register(Arc::new(MergeNode::new()));
        registry.register(Arc::new(LimitNode::new()));
        registry.register(Arc::new(SplitInBatchesNode::new()));
        registry.register(Arc::new(WaitNode::new()));
        registry.register(Arc::new(HttpRequestNode::new()));
        registry.register(Arc::new(LanguageModelNode::new()));
        registry.register(Arc::new(ChainLlmNode::new()));
        registry.register(Arc::new(AgentNode::new()));
        registry.register(Arc::new(StickyNoteNode::new()));

        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .insert(executor.node_type().to_string(), executor);
    }

    /// Get an executor by node type.
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    /// Check if a node type is registered.
    pub fn has(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// Dispatch a node to its executor.
    pub async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>> {
        let executor = self
            .get(&node.node_type)
            .ok_or_else(|| Error::Workflow(format!("no executor for node type: {}", node.node_type)))?;
        executor.execute(node, input, ctx).await
    }

    /// List all registered node types.
    pub fn list(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
