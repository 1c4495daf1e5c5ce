//! Workflow definition: data model, graph helpers, and parsing.

mod graph;
mod parser;
mod types;

pub use graph::{
    aux_provider, entry_nodes, incoming_sources, is_ui_only, items_for_target,
    providers_on_channel, tool_provider_names, validate_workflow,
};
pub use parser::parse_workflow;
pub use types::{
    BinaryPayload, Channel, ConnectionTarget, Connections, Item, NodeDef, OnError, Workflow,
    AUX_CHANNELS, CHANNEL_AI_TOOL, CHANNEL_MAIN,
};
