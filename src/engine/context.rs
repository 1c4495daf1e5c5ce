//! Per-invocation execution context.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeFailure;
use crate::nodes::NodeRegistry;
use crate::workflow::{Item, NodeDef, Workflow};

/// Per-node batching state for `splitInBatches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub all_items: Vec<Item>,
    pub cursor: usize,
    pub total_batches: usize,
}

/// Everything one invocation carries: committed node outputs, recorded
/// failures, the prepared workflow, the token bag, polling state, and
/// per-node scratch memory.
///
/// Executors treat this as read-only except for `memory`, `errors`, and
/// `batch_states`; outputs are committed by the engine alone.
#[derive(Clone)]
pub struct ExecutionContext {
    pub workflow: Arc<Workflow>,

    /// Committed outputs, keyed by both node name and node id.
    pub outputs: HashMap<String, Vec<Item>>,

    pub errors: Vec<NodeFailure>,

    /// Canonical token name -> secret value.
    pub tokens: HashMap<String, String>,

    pub initial_data: Value,

    /// Lower bound of the window a polling trigger considers.
    pub polling_cursor: Option<DateTime<Utc>>,

    /// Natural keys already emitted by the polling trigger in prior ticks.
    pub processed_set: HashSet<String>,

    pub batch_states: HashMap<String, BatchState>,

    /// Component-private per-node state, keyed by node name.
    pub memory: HashMap<String, Value>,

    /// Set by the engine so composite executors can dispatch tool nodes.
    pub registry: Option<Arc<NodeRegistry>>,
}

impl ExecutionContext {
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self {
            workflow,
            outputs: HashMap::new(),
            errors: Vec::new(),
            tokens: HashMap::new(),
            initial_data: Value::Null,
            polling_cursor: None,
            processed_set: HashSet::new(),
            batch_states: HashMap::new(),
            memory: HashMap::new(),
            registry: None,
        }
    }

    pub fn with_tokens(mut self, tokens: HashMap<String, String>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_initial_data(mut self, initial_data: Value) -> Self {
        self.initial_data = initial_data;
        self
    }

    pub fn with_polling_cursor(mut self, cursor: DateTime<Utc>) -> Self {
        self.polling_cursor = Some(cursor);
        self
    }

    pub fn with_processed_set(mut self, processed: HashSet<String>) -> Self {
        self.processed_set = processed;
        self
    }

    /// Commit a node's output under both its name and its id. Outputs are
    /// set exactly once per node per execution.
    pub fn commit_output(&mut self, node: &NodeDef, items: Vec<Item>) {
        if !node.id.is_empty() && node.id != node.name {
            self.outputs.insert(node.id.clone(), items.clone());
        }
        self.outputs.insert(node.name.clone(), items);
    }

    /// Look up a committed output by name or id.
    pub fn output(&self, key: &str) -> Option<&Vec<Item>> {
        self.outputs.get(key)
    }

    pub fn token(&self, name: &str) -> Option<&str> {
        self.tokens.get(name).map(|s| s.as_str())
    }
}

/// Top-level invocation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub success: bool,
    pub outputs: HashMap<String, Vec<Item>>,
    pub errors: Vec<NodeFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// Output of the node, preferring name over id keying (both resolve).
    pub fn output(&self, key: &str) -> Option<&Vec<Item>> {
        self.outputs.get(key)
    }
}
