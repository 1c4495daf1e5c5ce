//! Graph helpers: edge resolution, entry selection, and validation.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use super::types::{Connections, Item, NodeDef, Workflow, CHANNEL_AI_TOOL, CHANNEL_MAIN};
use crate::error::{Error, Result};

/// UI-only node types never execute and never block readiness.
pub fn is_ui_only(node_type: &str) -> bool {
    node_type == "stickyNote" || node_type.ends_with(".stickyNote")
}

/// Names of nodes that appear as the source of any `ai_tool` edge. These
/// are executed on demand by their consumer, not as graph roots.
pub fn tool_provider_names(workflow: &Workflow) -> HashSet<String> {
    let mut providers = HashSet::new();
    for (source, channels) in &workflow.connections {
        if channels.contains_key(CHANNEL_AI_TOOL) {
            if let Some(node) = workflow.find_node(source) {
                providers.insert(node.name.clone());
            }
        }
    }
    providers
}

/// Entry nodes: not the target of any edge on any channel, excluding
/// UI-only nodes and tool providers.
pub fn entry_nodes(workflow: &Workflow) -> Vec<&NodeDef> {
    let mut targeted: HashSet<String> = HashSet::new();
    for channels in workflow.connections.values() {
        for slots in channels.values() {
            for slot in slots {
                for record in slot {
                    if let Some(node) = workflow.find_node(&record.node) {
                        targeted.insert(node.name.clone());
                    }
                }
            }
        }
    }

    let tool_providers = tool_provider_names(workflow);

    workflow
        .nodes
        .iter()
        .filter(|n| !is_ui_only(&n.node_type))
        .filter(|n| !targeted.contains(&n.name))
        .filter(|n| !tool_providers.contains(&n.name))
        .collect()
}

/// Canonical names of every node with an edge (any channel) into `target`.
/// UI-only sources are ignored: they never execute and must not block
/// readiness.
pub fn incoming_sources(workflow: &Workflow, target: &str) -> Vec<String> {
    let mut sources = Vec::new();
    for (source, channels) in &workflow.connections {
        let Some(source_node) = workflow.find_node(source) else {
            continue;
        };
        if is_ui_only(&source_node.node_type) {
            continue;
        }
        let feeds_target = channels.values().any(|slots| {
            slots.iter().any(|slot| {
                slot.iter().any(|record| {
                    workflow
                        .find_node(&record.node)
                        .map(|n| n.name == target)
                        .unwrap_or(false)
                })
            })
        });
        if feeds_target && !sources.contains(&source_node.name) {
            sources.push(source_node.name.clone());
        }
    }
    sources
}

/// Gather the `main` input for `target` from committed outputs.
///
/// Every slot's connection records are walked; a source's stored output is
/// appended once per matching record, and only when non-empty. The stored
/// output is a single sequence regardless of which slot carried the edge
/// (the active-branch convention for multi-output nodes) — this function is
/// the one adapter through which per-slot semantics would change.
pub fn items_for_target(
    workflow: &Workflow,
    outputs: &HashMap<String, Vec<Item>>,
    target: &str,
) -> Vec<Item> {
    let mut input = Vec::new();
    for (source, channels) in &workflow.connections {
        let Some(source_node) = workflow.find_node(source) else {
            continue;
        };
        let Some(slots) = channels.get(CHANNEL_MAIN) else {
            continue;
        };
        let Some(items) = outputs.get(&source_node.name) else {
            continue;
        };
        if items.is_empty() {
            continue;
        }
        for slot in slots {
            for record in slot {
                let resolved = workflow
                    .find_node(&record.node)
                    .map(|n| n.name == target)
                    .unwrap_or(false);
                if resolved {
                    input.extend(items.iter().cloned());
                }
            }
        }
    }
    input
}

/// Validate workflow structure before execution.
///
/// Checks: every edge endpoint resolves to exactly one node, and no
/// connection source is unknown. Duplicate node names are tolerated (first
/// match wins) but surfaced as a warning.
pub fn validate_workflow(workflow: &Workflow) -> Result<()> {
    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.name.as_str()) {
            warn!(
                workflow = %workflow.name,
                node = %node.name,
                "duplicate node name, references resolve to the first occurrence"
            );
        }
    }

    for (source, channels) in &workflow.connections {
        if !workflow.resolves(source) {
            return Err(Error::Workflow(format!(
                "connection source '{}' does not resolve to a node",
                source
            )));
        }
        for slots in channels.values() {
            for slot in slots {
                for record in slot {
                    if !workflow.resolves(&record.node) {
                        return Err(Error::Workflow(format!(
                            "connection target '{}' (from '{}') does not resolve to a node",
                            record.node, source
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Find the first provider feeding `consumer` on the given auxiliary
/// channel, by canonical name.
pub fn aux_provider(workflow: &Workflow, consumer: &str, channel: &str) -> Option<String> {
    providers_on_channel(&workflow.connections, workflow, consumer, channel)
        .into_iter()
        .next()
}

/// All providers feeding `consumer` on the given auxiliary channel.
pub fn providers_on_channel(
    connections: &Connections,
    workflow: &Workflow,
    consumer: &str,
    channel: &str,
) -> Vec<String> {
    let mut providers = Vec::new();
    for (source, channels) in connections {
        let Some(slots) = channels.get(channel) else {
            continue;
        };
        let feeds = slots.iter().any(|slot| {
            slot.iter().any(|record| {
                workflow
                    .find_node(&record.node)
                    .map(|n| n.name == consumer)
                    .unwrap_or(false)
            })
        });
        if feeds {
            if let Some(node) = workflow.find_node(source) {
                providers.push(node.name.clone());
            }
        }
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow(value: serde_json::Value) -> Workflow {
        serde_json::from_value(value).unwrap()
    }

    fn linear() -> Workflow {
        workflow(json!({
            "name": "linear",
            "nodes": [
                {"id": "1", "name": "A", "type": "manualTrigger"},
                {"id": "2", "name": "B", "type": "set"}
            ],
            "connections": {
                "A": {"main": [[{"node": "B", "index": 0}]]}
            }
        }))
    }

    #[test]
    fn test_entry_nodes_linear() {
        let wf = linear();
        let entries: Vec<_> = entry_nodes(&wf).iter().map(|n| n.name.clone()).collect();
        assert_eq!(entries, vec!["A"]);
    }

    #[test]
    fn test_entry_excludes_sticky_and_tool_providers() {
        let wf = workflow(json!({
            "name": "wf",
            "nodes": [
                {"id": "1", "name": "Note", "type": "stickyNote"},
                {"id": "2", "name": "Search", "type": "httpRequest"},
                {"id": "3", "name": "Agent", "type": "agent"},
                {"id": "4", "name": "Start", "type": "manualTrigger"}
            ],
            "connections": {
                "Search": {"ai_tool": [[{"node": "Agent", "index": 0}]]},
                "Start": {"main": [[{"node": "Agent", "index": 0}]]}
            }
        }));
        let entries: Vec<_> = entry_nodes(&wf).iter().map(|n| n.name.clone()).collect();
        assert_eq!(entries, vec!["Start"]);
    }

    #[test]
    fn test_no_entry_in_pure_cycle() {
        let wf = workflow(json!({
            "name": "cycle",
            "nodes": [
                {"id": "1", "name": "A", "type": "set"},
                {"id": "2", "name": "B", "type": "set"}
            ],
            "connections": {
                "A": {"main": [[{"node": "B"}]]},
                "B": {"main": [[{"node": "A"}]]}
            }
        }));
        assert!(entry_nodes(&wf).is_empty());
    }

    #[test]
    fn test_incoming_sources_any_channel() {
        let wf = workflow(json!({
            "name": "wf",
            "nodes": [
                {"id": "1", "name": "Model", "type": "languageModel"},
                {"id": "2", "name": "Chain", "type": "chainLlm"},
                {"id": "3", "name": "Start", "type": "manualTrigger"}
            ],
            "connections": {
                "Model": {"ai_languageModel": [[{"node": "Chain"}]]},
                "Start": {"main": [[{"node": "Chain"}]]}
            }
        }));
        let mut sources = incoming_sources(&wf, "Chain");
        sources.sort();
        assert_eq!(sources, vec!["Model", "Start"]);
    }

    #[test]
    fn test_items_for_target_skips_empty_outputs() {
        let wf = linear();
        let mut outputs = HashMap::new();
        outputs.insert("A".to_string(), Vec::new());
        assert!(items_for_target(&wf, &outputs, "B").is_empty());

        outputs.insert("A".to_string(), vec![Item::new(json!({"x": 1}))]);
        let gathered = items_for_target(&wf, &outputs, "B");
        assert_eq!(gathered.len(), 1);
        assert_eq!(gathered[0].json, json!({"x": 1}));
    }

    #[test]
    fn test_items_for_target_resolves_by_id() {
        let wf = workflow(json!({
            "name": "wf",
            "nodes": [
                {"id": "src", "name": "Source", "type": "manualTrigger"},
                {"id": "dst", "name": "Sink", "type": "set"}
            ],
            "connections": {
                "src": {"main": [[{"node": "dst"}]]}
            }
        }));
        let mut outputs = HashMap::new();
        outputs.insert("Source".to_string(), vec![Item::new(json!(1))]);
        let gathered = items_for_target(&wf, &outputs, "Sink");
        assert_eq!(gathered.len(), 1);
    }

    #[test]
    fn test_validate_unresolved_target() {
        let wf = workflow(json!({
            "name": "wf",
            "nodes": [{"id": "1", "name": "A", "type": "set"}],
            "connections": {
                "A": {"main": [[{"node": "Ghost"}]]}
            }
        }));
        let err = validate_workflow(&wf).unwrap_err();
        assert_eq!(err.code(), "WORKFLOW_ERROR");
    }

    #[test]
    fn test_aux_provider_lookup() {
        let wf = workflow(json!({
            "name": "wf",
            "nodes": [
                {"id": "1", "name": "Model", "type": "languageModel"},
                {"id": "2", "name": "Chain", "type": "chainLlm"}
            ],
            "connections": {
                "Model": {"ai_languageModel": [[{"node": "Chain"}]]}
            }
        }));
        assert_eq!(
            aux_provider(&wf, "Chain", "ai_languageModel"),
            Some("Model".to_string())
        );
        assert_eq!(aux_provider(&wf, "Chain", "ai_memory"), None);
    }
}
