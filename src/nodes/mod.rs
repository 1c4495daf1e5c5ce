//! Node executors.
//!
//! Every node type implements the uniform contract: take the gathered
//! input items and the execution context, return an output sequence or
//! fail. Multi-output nodes return the single sequence of their active
//! branch; slot selection is the engine's concern.

mod agent;
mod code;
mod http;
mod if_node;
mod limit;
mod llm;
mod merge;
mod registry;
mod set;
mod split_batches;
mod sticky;
mod triggers;
mod wait;

pub use agent::AgentNode;
pub use code::CodeNode;
pub use http::HttpRequestNode;
pub use if_node::IfNode;
pub use limit::LimitNode;
pub use llm::{ChainLlmNode, LanguageModelNode};
pub use merge::MergeNode;
pub use registry::NodeRegistry;
pub use set::SetNode;
pub use split_batches::SplitInBatchesNode;
pub use sticky::StickyNoteNode;
pub use triggers::{DriveTriggerNode, ManualTriggerNode, ScheduleTriggerNode, WebhookNode};
pub use wait::WaitNode;

use async_trait::async_trait;

use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::workflow::{Item, NodeDef};

/// Whether a node type is a trigger. Triggers may execute with empty
/// input and are exempt from empty-input propagation and token injection.
pub fn is_trigger(node_type: &str) -> bool {
    node_type.to_ascii_lowercase().contains("trigger") || node_type == "webhook"
}

/// Trait that all node executors implement.
///
/// Executors treat the context as read-only except for `memory`,
/// `errors`, and `batch_states`; their own output is committed by the
/// engine after `execute` returns.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The node type this executor handles (e.g. "httpRequest").
    fn node_type(&self) -> &str;

    /// Execute the node against its gathered input.
    async fn execute(
        &self,
        node: &NodeDef,
        input: Vec<Item>,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<Item>>;

    /// Get a description of this node type.
    fn description(&self) -> &str {
        "A workflow node"
    }
}
