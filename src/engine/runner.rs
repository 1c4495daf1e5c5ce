//! The graph runner.
//!
//! Executes a prepared workflow as a sequence of passes: in each pass,
//! every node whose sources (on any channel) have all committed an output
//! is scheduled. Gathered `main` input that is empty prunes the node
//! (unless it is a trigger), executor failures follow the per-node
//! failure policy, and a pass without progress on an incomplete graph is
//! a stall.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::context::{ExecutionContext, RunReport};
use crate::error::{Error, NodeFailure};
use crate::nodes::{is_trigger, NodeRegistry};
use crate::workflow::{
    entry_nodes, incoming_sources, is_ui_only, items_for_target, validate_workflow, Item, NodeDef,
};

/// Workflow execution engine.
pub struct Engine {
    registry: Arc<NodeRegistry>,
}

impl Engine {
    /// Create a new engine over a node registry.
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Execute the context's workflow to completion.
    ///
    /// Returns the top-level report; abort-class failures carry a
    /// top-level error string alongside the partial outputs.
    pub async fn run(&self, ctx: &mut ExecutionContext) -> RunReport {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let workflow = ctx.workflow.clone();
        ctx.registry = Some(self.registry.clone());

        info!(
            execution_id = %execution_id,
            workflow = %workflow.name,
            nodes = workflow.nodes.len(),
            "starting execution"
        );

        if let Err(e) = self.validate(&workflow) {
            return abort(ctx, e);
        }

        let entries: HashSet<String> = entry_nodes(&workflow)
            .iter()
            .map(|n| n.name.clone())
            .collect();
        if entries.is_empty() {
            return abort(ctx, Error::Workflow("no entry nodes".to_string()));
        }

        let initial_items = Item::from_initial_data(&ctx.initial_data);

        let mut executed: HashSet<String> = HashSet::new();
        let schedulable: Vec<NodeDef> = workflow
            .nodes
            .iter()
            .filter(|n| !is_ui_only(&n.node_type))
            .cloned()
            .collect();

        // Bound proportional to node count; a graph that iterates past it
        // has cycled.
        let max_passes = std::cmp::max(1000, schedulable.len() * 10);
        let mut passes = 0usize;

        loop {
            passes += 1;
            if passes > max_passes {
                let unexecuted = unexecuted_names(&schedulable, &executed);
                return abort(ctx, Error::Stall(unexecuted));
            }

            let mut progress = false;

            for node in &schedulable {
                if executed.contains(&node.name) {
                    continue;
                }
                let ready = incoming_sources(&workflow, &node.name)
                    .iter()
                    .all(|source| executed.contains(source));
                if !ready {
                    continue;
                }

                let input = if entries.contains(&node.name) {
                    initial_items.clone()
                } else {
                    items_for_target(&workflow, &ctx.outputs, &node.name)
                };

                // Empty-input propagation: nothing arrived and this is not
                // a trigger, so the executor is never invoked.
                if input.is_empty() && !is_trigger(&node.node_type) {
                    debug!(node = %node.name, "empty input, pruning");
                    ctx.commit_output(node, Vec::new());
                    executed.insert(node.name.clone());
                    progress = true;
                    continue;
                }

                debug!(node = %node.name, node_type = %node.node_type, items = input.len(), "executing node");

                match self.registry.execute(node, input, ctx).await {
                    Ok(items) => {
                        info!(node = %node.name, items = items.len(), "node completed");
                        ctx.commit_output(node, items);
                    }
                    Err(e) if recoverable(node, &e) => {
                        let message = e.to_string();
                        warn!(node = %node.name, error = %message, "node failed, continuing with error output");
                        ctx.errors.push(NodeFailure::new(&node.name, &message));
                        ctx.commit_output(node, vec![Item::error(&message)]);
                    }
                    Err(e) => {
                        error!(node = %node.name, error = %e, "node failed, aborting");
                        ctx.errors.push(NodeFailure::new(&node.name, &e.to_string()));
                        return abort(ctx, e);
                    }
                }
                executed.insert(node.name.clone());
                progress = true;
            }

            if executed.len() == schedulable.len() {
                break;
            }
            if !progress {
                let unexecuted = unexecuted_names(&schedulable, &executed);
                return abort(ctx, Error::Stall(unexecuted));
            }
        }

        info!(
            execution_id = %execution_id,
            workflow = %workflow.name,
            passes,
            errors = ctx.errors.len(),
            "execution finished"
        );

        RunReport {
            success: ctx.errors.is_empty(),
            outputs: ctx.outputs.clone(),
            errors: ctx.errors.clone(),
            error: None,
        }
    }

    fn validate(&self, workflow: &crate::workflow::Workflow) -> crate::error::Result<()> {
        validate_workflow(workflow)?;
        for node in &workflow.nodes {
            if is_ui_only(&node.node_type) {
                continue;
            }
            if !self.registry.has(&node.node_type) {
                return Err(Error::Workflow(format!(
                    "no executor for node type: {}",
                    node.node_type
                )));
            }
        }
        Ok(())
    }
}

/// Whether a failure is recovered locally: the credential-missing
/// dry-run case, or the node opted into error output.
fn recoverable(node: &NodeDef, error: &Error) -> bool {
    error.is_credential_missing() || node.on_error == crate::workflow::OnError::ContinueErrorOutput
}

fn unexecuted_names(schedulable: &[NodeDef], executed: &HashSet<String>) -> Vec<String> {
    schedulable
        .iter()
        .filter(|n| !executed.contains(&n.name))
        .map(|n| n.name.clone())
        .collect()
}

fn abort(ctx: &ExecutionContext, error: Error) -> RunReport {
    RunReport {
        success: false,
        outputs: ctx.outputs.clone(),
        errors: ctx.errors.clone(),
        error: Some(error.to_string()),
    }
}
