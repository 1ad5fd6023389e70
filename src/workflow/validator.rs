//! Workflow Validation
//!
//! Definition-time checks run before any step executes:
//! - Step field validation
//! - Unique step names within each pipeline
//! - Map concurrency bounds and nesting depth
//! - Adapter reference integrity (when the available adapters are known)

use std::collections::HashSet;

use log::{debug, info, warn};

use super::model::{Pipeline, Step, Workflow};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyWorkflowName,
    EmptyPipeline(String),
    DuplicateStepName(String),
    EmptyStepName,
    EmptyAdapter(String),
    UnknownAdapter { step: String, adapter: String },
    InvalidConcurrency(String),
    NestedMap { step: String, parent: String },
    ZeroTimeout,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWorkflowName => write!(f, "Workflow has an empty name"),
            Self::EmptyPipeline(owner) => write!(f, "Pipeline '{}' has no steps", owner),
            Self::DuplicateStepName(name) => write!(f, "Duplicate step name: '{}'", name),
            Self::EmptyStepName => write!(f, "Step has empty or whitespace-only name"),
            Self::EmptyAdapter(step) => write!(f, "Task '{}' has no adapter specified", step),
            Self::UnknownAdapter { step, adapter } => {
                write!(f, "Task '{}' references unknown adapter '{}'", step, adapter)
            }
            Self::InvalidConcurrency(step) => {
                write!(f, "Map '{}' must allow at least one concurrent item", step)
            }
            Self::NestedMap { step, parent } => {
                write!(f, "Map '{}' is nested inside map '{}' (only one level is supported)", step, parent)
            }
            Self::ZeroTimeout => write!(f, "Workflow timeout must be greater than zero"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates a single step's fields.
fn validate_step(step: &Step, known_adapters: Option<&HashSet<&str>>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.name().trim().is_empty() {
        errors.push(ValidationError::EmptyStepName);
        return errors;
    }

    match step {
        Step::Task(task) => {
            if task.adapter.trim().is_empty() {
                errors.push(ValidationError::EmptyAdapter(task.name.clone()));
            } else if let Some(known) = known_adapters {
                if !known.contains(task.adapter.as_str()) {
                    errors.push(ValidationError::UnknownAdapter {
                        step: task.name.clone(),
                        adapter: task.adapter.clone(),
                    });
                }
            }

            if let Some(retry) = &task.retry {
                if retry.max_attempts == 0 {
                    warn!("Task '{}': retry.max_attempts is 0, the call runs once", task.name);
                }
            }
        }
        Step::Map(map) => {
            if map.max_concurrency == Some(0) {
                errors.push(ValidationError::InvalidConcurrency(map.name.clone()));
            }
            if map.max_concurrency.is_none() {
                debug!("Map '{}' has no concurrency limit", map.name);
            }
        }
        Step::Pass(pass) => {
            if pass.parameters.is_none() && !pass.result_path.is_discard() {
                debug!("Pass '{}' is an identity step", pass.name);
            }
        }
    }

    errors
}

/// Validates one pipeline; `parent` is the enclosing map for iterators.
fn validate_pipeline(
    pipeline: &Pipeline,
    owner: &str,
    parent: Option<&str>,
    known_adapters: Option<&HashSet<&str>>,
    errors: &mut Vec<ValidationError>,
) {
    if pipeline.is_empty() {
        errors.push(ValidationError::EmptyPipeline(owner.to_string()));
        return;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &pipeline.steps {
        errors.extend(validate_step(step, known_adapters));

        if !step.name().trim().is_empty() && !seen.insert(step.name()) {
            errors.push(ValidationError::DuplicateStepName(step.name().to_string()));
        }

        if let Step::Map(map) = step {
            if let Some(parent) = parent {
                errors.push(ValidationError::NestedMap {
                    step: map.name.clone(),
                    parent: parent.to_string(),
                });
                continue;
            }
            validate_pipeline(&map.iterator, &map.name, Some(&map.name), known_adapters, errors);
        }
    }
}

/// Collects every validation error in the workflow.
///
/// `known_adapters` enables adapter-name checking; pass `None` when the
/// adapter set is not known at load time.
pub fn check_workflow(workflow: &Workflow, known_adapters: Option<&[&str]>) -> Vec<ValidationError> {
    let known: Option<HashSet<&str>> = known_adapters.map(|names| names.iter().copied().collect());
    let mut errors = Vec::new();

    if workflow.name.trim().is_empty() {
        errors.push(ValidationError::EmptyWorkflowName);
    }
    if workflow.timeout_secs == Some(0) {
        errors.push(ValidationError::ZeroTimeout);
    }

    validate_pipeline(&workflow.steps, &workflow.name, None, known.as_ref(), &mut errors);
    errors
}

/// Validates the entire workflow structure.
///
/// Performs the following checks:
/// 1. Workflow has a name and a non-zero timeout
/// 2. Every pipeline (top level and map iterators) is non-empty
/// 3. Step names are non-empty and unique within their pipeline
/// 4. Task steps name an adapter
/// 5. Map steps allow at least one concurrent item
/// 6. Maps are not nested inside map iterators
pub fn validate_workflow(workflow: &Workflow) -> Result<(), String> {
    info!("Validating workflow '{}' with {} steps", workflow.name, workflow.len());

    let errors = check_workflow(workflow, None);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(messages.join("\n"));
    }

    info!(
        "Workflow validated: {} steps, {} adapters",
        workflow.len(),
        workflow.adapters().len()
    );
    Ok(())
}

/// Quick validation that returns a list of error messages, including
/// adapter names not present in `known_adapters`.
pub fn quick_validate(workflow: &Workflow, known_adapters: &[&str]) -> Vec<String> {
    check_workflow(workflow, Some(known_adapters))
        .iter()
        .map(|e| e.to_string())
        .collect()
}
