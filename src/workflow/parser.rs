//! Workflow parsing from stored JSON documents.

use super::graph::validate_workflow;
use super::types::Workflow;
use crate::error::{Error, Result};

/// Parse and validate a workflow from its JSON source.
pub fn parse_workflow(definition: &str) -> Result<Workflow> {
    let workflow: Workflow = serde_json::from_str(definition)
        .map_err(|e| Error::Workflow(format!("invalid workflow definition: {}", e)))?;
    validate_workflow(&workflow)?;
    Ok(workflow)
}
