//! Workflow Data Model
//!
//! Core data structures describing a pipeline and its steps.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: file-ingest
//! timeout_secs: 600
//! steps:
//!   - type: pass
//!     name: ValidateFile
//!     comment: always pass the validation
//!
//!   - type: task
//!     name: CopyFile
//!     adapter: storage:copyObject
//!     parameters:
//!       Bucket.$: $.destBucket
//!       Key.$: States.Format('process/{}', $.key)
//!       CopySource.$: States.Format('{}/inbox/{}', $.sourceBucket, $.key)
//!     result_path: $.copyResult
//!
//!   - type: map
//!     name: DeleteFiles
//!     items_path: $.filesToDelete
//!     result_path: discard
//!     iterator:
//!       - type: task
//!         name: DeleteFile
//!         adapter: storage:deleteObject
//!         parameters:
//!           Bucket.$: $.Bucket
//!           Key.$: $.Key
//!         result_path: discard
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path::{self, Path, PathError};
use super::payload::Payload;

/// Where a step's result goes once it succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResultPath {
    /// Replace the whole context (`$`).
    #[default]
    Replace,
    /// Install the result at a sub-path of the context.
    At(Path),
    /// Drop the result; the context is left as it was.
    Discard,
}

impl ResultPath {
    const DISCARD: &'static str = "discard";

    /// Merges `result` into `context`, returning the new context.
    ///
    /// The input context is left untouched so a failed merge cannot
    /// corrupt the caller's state.
    pub fn apply(&self, context: &Value, result: Value) -> Result<Value, PathError> {
        match self {
            ResultPath::Replace => Ok(result),
            ResultPath::At(p) => path::write(context, p, result),
            ResultPath::Discard => Ok(context.clone()),
        }
    }

    pub fn is_discard(&self) -> bool {
        matches!(self, ResultPath::Discard)
    }
}

impl TryFrom<String> for ResultPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim() == Self::DISCARD {
            return Ok(ResultPath::Discard);
        }
        let p = Path::parse(&value)?;
        Ok(if p.is_root() {
            ResultPath::Replace
        } else {
            ResultPath::At(p)
        })
    }
}

impl From<ResultPath> for String {
    fn from(result_path: ResultPath) -> Self {
        result_path.to_string()
    }
}

impl fmt::Display for ResultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultPath::Replace => write!(f, "$"),
            ResultPath::At(p) => write!(f, "{}", p),
            ResultPath::Discard => write!(f, "{}", Self::DISCARD),
        }
    }
}

/// Explicit retry configuration for a task's adapter call.
///
/// Only adapter failures are retried; path and payload errors are final.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Multiplier applied to the delay after each retry.
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_backoff_rate() -> f64 {
    2.0
}

impl RetryPolicy {
    /// Delay to wait after the given 1-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_rate.max(1.0).powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.interval_ms as f64 * factor) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            backoff_rate: default_backoff_rate(),
        }
    }
}

/// Installs an optional payload into the context.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PassStep {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Payload to build from the context; without one the step is an identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Payload>,

    #[serde(default)]
    pub result_path: ResultPath,
}

/// Invokes one adapter operation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskStep {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Adapter operation name, e.g. `storage:copyObject`.
    pub adapter: String,

    /// Adapter input; the whole context when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Payload>,

    /// Reshapes the raw adapter output before it is merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<Payload>,

    #[serde(default)]
    pub result_path: ResultPath,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// Runs a sub-pipeline once per element of a list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MapStep {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Path to the list of items.
    pub items_path: Path,

    /// Upper bound on concurrent branches; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Steps run for each item, starting from the item as context.
    pub iterator: Pipeline,

    #[serde(default)]
    pub result_path: ResultPath,
}

/// A single unit of execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Pass(PassStep),
    Task(TaskStep),
    Map(MapStep),
}

impl Step {
    /// Creates a Pass step with no payload.
    pub fn pass(name: impl Into<String>) -> Self {
        Step::Pass(PassStep {
            name: name.into().trim().to_string(),
            comment: None,
            parameters: None,
            result_path: ResultPath::Replace,
        })
    }

    /// Creates a Task step invoking `adapter` with the whole context as input.
    pub fn task(name: impl Into<String>, adapter: impl Into<String>) -> Self {
        Step::Task(TaskStep {
            name: name.into().trim().to_string(),
            comment: None,
            adapter: adapter.into().trim().to_string(),
            parameters: None,
            result_selector: None,
            result_path: ResultPath::Replace,
            retry: None,
        })
    }

    /// Creates a Map step over `items_path`.
    pub fn map(name: impl Into<String>, items_path: Path, iterator: Pipeline) -> Self {
        Step::Map(MapStep {
            name: name.into().trim().to_string(),
            comment: None,
            items_path,
            max_concurrency: None,
            iterator,
            result_path: ResultPath::Replace,
        })
    }

    /// Sets the payload of a Pass or Task step.
    pub fn with_parameters(mut self, parameters: Payload) -> Self {
        match &mut self {
            Step::Pass(s) => s.parameters = Some(parameters),
            Step::Task(s) => s.parameters = Some(parameters),
            Step::Map(_) => {}
        }
        self
    }

    /// Sets the result selector of a Task step.
    pub fn with_result_selector(mut self, selector: Payload) -> Self {
        if let Step::Task(s) = &mut self {
            s.result_selector = Some(selector);
        }
        self
    }

    /// Sets where the step's result is merged.
    pub fn with_result_path(mut self, result_path: ResultPath) -> Self {
        match &mut self {
            Step::Pass(s) => s.result_path = result_path,
            Step::Task(s) => s.result_path = result_path,
            Step::Map(s) => s.result_path = result_path,
        }
        self
    }

    /// Sets the concurrency cap of a Map step.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        if let Step::Map(s) = &mut self {
            s.max_concurrency = Some(max);
        }
        self
    }

    /// Sets the retry policy of a Task step.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        if let Step::Task(s) = &mut self {
            s.retry = Some(retry);
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Pass(s) => &s.name,
            Step::Task(s) => &s.name,
            Step::Map(s) => &s.name,
        }
    }

    pub fn comment(&self) -> Option<&str> {
        match self {
            Step::Pass(s) => s.comment.as_deref(),
            Step::Task(s) => s.comment.as_deref(),
            Step::Map(s) => s.comment.as_deref(),
        }
    }

    pub fn result_path(&self) -> &ResultPath {
        match self {
            Step::Pass(s) => &s.result_path,
            Step::Task(s) => &s.result_path,
            Step::Map(s) => &s.result_path,
        }
    }

    /// Short variant label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Pass(_) => "pass",
            Step::Task(_) => "task",
            Step::Map(_) => "map",
        }
    }
}

/// An ordered sequence of steps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Pipeline {
    pub steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Gets a step by name.
    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name() == name)
    }

    /// Returns the index of the named step.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == name)
    }
}

/// A complete, named workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Workflow {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Wall-clock budget for a whole run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    pub steps: Pipeline,
}

impl Workflow {
    /// Creates a workflow from a list of steps.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            timeout_secs: None,
            steps: Pipeline::new(steps),
        }
    }

    /// Sets the run budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Adapter names used anywhere in the workflow, sorted and deduplicated.
    pub fn adapters(&self) -> Vec<String> {
        fn collect(pipeline: &Pipeline, out: &mut Vec<String>) {
            for step in &pipeline.steps {
                match step {
                    Step::Task(task) => out.push(task.adapter.clone()),
                    Step::Map(map) => collect(&map.iterator, out),
                    Step::Pass(_) => {}
                }
            }
        }

        let mut adapters = Vec::new();
        collect(&self.steps, &mut adapters);
        adapters.sort();
        adapters.dedup();
        adapters
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
