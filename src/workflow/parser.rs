//! Workflow Parser
//!
//! Handles loading and saving workflow definitions. Definitions are YAML;
//! JSON documents are accepted as-is since JSON is a subset of YAML.

use std::fs;

use log::{debug, info};
use thiserror::Error;

use super::model::Workflow;
use super::validator::validate_workflow;

/// Failure while loading a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Failed to read workflow file '{path}': {source}. Check that the file exists and is readable.")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse workflow definition: {0}. Check the file format.")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid workflow definition:\n{0}")]
    Invalid(String),

    #[error("Failed to write workflow file '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parses and validates a workflow from YAML or JSON text.
pub fn parse_workflow(content: &str) -> Result<Workflow, DefinitionError> {
    debug!("Definition content loaded ({} bytes)", content.len());

    let workflow: Workflow = serde_yaml::from_str(content)?;

    info!(
        "Parsed workflow '{}': {} steps, {} adapters",
        workflow.name,
        workflow.len(),
        workflow.adapters().len()
    );

    validate_workflow(&workflow).map_err(DefinitionError::Invalid)?;
    Ok(workflow)
}

/// Loads a workflow from a YAML or JSON file.
///
/// This function:
/// 1. Reads the file
/// 2. Parses steps, paths and payload expressions
/// 3. Validates the workflow structure
///
/// # Example
///
/// ```rust,no_run
/// use pipeflow::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipelines/file_ingest.yaml")?;
///     println!("Loaded {} steps", workflow.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: &str) -> Result<Workflow, DefinitionError> {
    info!("Loading workflow from: {}", path);

    let content = fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.to_string(),
        source,
    })?;

    parse_workflow(&content)
}

/// Saves a workflow to a YAML file.
pub fn save_workflow(workflow: &Workflow, path: &str) -> Result<(), DefinitionError> {
    let yaml_content = serde_yaml::to_string(workflow)?;
    fs::write(path, yaml_content).map_err(|source| DefinitionError::Write {
        path: path.to_string(),
        source,
    })?;
    info!("Workflow saved to: {}", path);
    Ok(())
}
