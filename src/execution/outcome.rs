//! Step Errors and Run Outcomes
//!
//! [`StepError`] is the typed failure of a single step. [`RunOutcome`] is the
//! terminal record of a whole run, and [`RunReport`] wraps it with timing
//! information for persistence.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;

use crate::adapter::AdapterError;
use crate::monitoring::ExecutionTimeline;
use crate::workflow::path::{FormatError, PathError};
use crate::workflow::payload::PayloadError;

/// Failure of a single step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("path '{path}' not found")]
    NotFound { path: String },

    #[error("type mismatch at '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid path '{input}': {reason}")]
    InvalidPath { input: String, reason: String },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("{function} failed at '{path}': {reason}")]
    Intrinsic {
        function: &'static str,
        path: String,
        reason: String,
    },

    #[error("adapter '{adapter}' failed: {source}")]
    Adapter {
        adapter: String,
        #[source]
        source: AdapterError,
    },

    #[error("run exceeded its budget of {}s", .budget.as_secs_f64())]
    TimeoutExceeded { budget: Duration },

    #[error("map item {item_index} failed at step {step_index} ('{step_name}'): {source}")]
    MapItemFailure {
        item_index: usize,
        step_index: usize,
        step_name: String,
        #[source]
        source: Box<StepError>,
    },

    #[error("map branch aborted: {0}")]
    BranchAborted(String),
}

impl StepError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::NotFound { .. } => "NotFound",
            StepError::TypeMismatch { .. } => "TypeMismatch",
            StepError::InvalidPath { .. } => "InvalidPath",
            StepError::Format(_) => "FormatError",
            StepError::Intrinsic { .. } => "IntrinsicError",
            StepError::Adapter { .. } => "AdapterError",
            StepError::TimeoutExceeded { .. } => "TimeoutExceeded",
            StepError::MapItemFailure { .. } => "MapItemFailure",
            StepError::BranchAborted(_) => "BranchAborted",
        }
    }

    /// The innermost error, following map item failures down.
    pub fn root_cause(&self) -> &StepError {
        match self {
            StepError::MapItemFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }

    fn to_json(&self) -> Value {
        let mut report = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let StepError::MapItemFailure {
            item_index,
            step_index,
            step_name,
            source,
        } = self
        {
            report["item_index"] = json!(item_index);
            report["step_index"] = json!(step_index);
            report["step_name"] = json!(step_name);
            report["cause"] = source.to_json();
        }
        report
    }
}

impl From<PathError> for StepError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::NotFound { path } => StepError::NotFound { path },
            PathError::TypeMismatch {
                path,
                expected,
                found,
            } => StepError::TypeMismatch {
                path,
                expected,
                found,
            },
            // Paths are parsed with the definition, so this only surfaces for
            // hand-built steps.
            PathError::Syntax { input, reason } => StepError::InvalidPath { input, reason },
        }
    }
}

impl From<PayloadError> for StepError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Path(e) => e.into(),
            PayloadError::Format(e) => StepError::Format(e),
            PayloadError::Intrinsic {
                function,
                path,
                reason,
            } => StepError::Intrinsic {
                function,
                path,
                reason,
            },
        }
    }
}

fn serialize_error<S: Serializer>(error: &StepError, serializer: S) -> Result<S::Ok, S::Error> {
    error.to_json().serialize(serializer)
}

fn serialize_budget<S: Serializer>(budget: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(budget.as_millis() as u64)
}

/// Terminal result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every step succeeded.
    Completed { context: Value },

    /// A step failed; `context` is the state after the last successful step.
    Failed {
        step_index: usize,
        step_name: String,
        #[serde(serialize_with = "serialize_error")]
        error: StepError,
        context: Value,
    },

    /// The budget ran out while `step_index` was in flight.
    TimedOut {
        step_index: usize,
        step_name: String,
        #[serde(rename = "budget_ms", serialize_with = "serialize_budget")]
        budget: Duration,
        context: Value,
    },
}

impl RunOutcome {
    /// The context as of the last successfully completed step.
    pub fn context(&self) -> &Value {
        match self {
            RunOutcome::Completed { context }
            | RunOutcome::Failed { context, .. }
            | RunOutcome::TimedOut { context, .. } => context,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    /// The error behind a non-completed outcome.
    pub fn error(&self) -> Option<StepError> {
        match self {
            RunOutcome::Completed { .. } => None,
            RunOutcome::Failed { error, .. } => Some(error.clone()),
            RunOutcome::TimedOut { budget, .. } => Some(StepError::TimeoutExceeded { budget: *budget }),
        }
    }

    /// Index of the step that failed or was interrupted.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            RunOutcome::Completed { .. } => None,
            RunOutcome::Failed { step_index, .. } | RunOutcome::TimedOut { step_index, .. } => {
                Some(*step_index)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Failed { .. } => "failed",
            RunOutcome::TimedOut { .. } => "timed out",
        }
    }
}

/// A run outcome with its timing, as written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Per-step durations in milliseconds, keyed by timeline id.
    pub durations: std::collections::BTreeMap<String, u128>,
    pub outcome: RunOutcome,
    /// Events recorded during this run.
    #[serde(skip)]
    pub timeline: ExecutionTimeline,
}

impl RunReport {
    /// Writes the report as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn adapter_failure() -> StepError {
        StepError::Adapter {
            adapter: "table:putItem".into(),
            source: AdapterError::Failed("throttled".into()),
        }
    }

    #[test]
    fn test_path_error_mapping() {
        let not_found: StepError = PathError::NotFound { path: "$.a".into() }.into();
        assert_eq!(not_found.kind(), "NotFound");

        let mismatch: StepError = PathError::TypeMismatch {
            path: "$.a[0]".into(),
            expected: "array",
            found: "string",
        }
        .into();
        assert_eq!(mismatch.kind(), "TypeMismatch");

        let syntax: StepError = PathError::Syntax {
            input: "$.a[".into(),
            reason: "unterminated '['".into(),
        }
        .into();
        assert_eq!(syntax.kind(), "InvalidPath");
        assert_eq!(
            syntax,
            StepError::InvalidPath {
                input: "$.a[".into(),
                reason: "unterminated '['".into(),
            }
        );
        assert!(syntax.to_string().contains("$.a["));
    }

    #[test]
    fn test_map_item_failure_root_cause() {
        let err = StepError::MapItemFailure {
            item_index: 2,
            step_index: 0,
            step_name: "InsertRecord".into(),
            source: Box::new(adapter_failure()),
        };
        assert_eq!(err.root_cause().kind(), "AdapterError");
        assert!(err.to_string().contains("map item 2"));

        let report = err.to_json();
        assert_eq!(report["item_index"], json!(2));
        assert_eq!(report["cause"]["kind"], json!("AdapterError"));
    }

    #[test]
    fn test_outcome_accessors() {
        let failed = RunOutcome::Failed {
            step_index: 3,
            step_name: "putItem".into(),
            error: adapter_failure(),
            context: json!({"k": 1}),
        };
        assert_eq!(failed.step_index(), Some(3));
        assert_eq!(failed.context(), &json!({"k": 1}));
        assert!(!failed.is_completed());

        let timed_out = RunOutcome::TimedOut {
            step_index: 3,
            step_name: "putItem".into(),
            budget: Duration::from_millis(200),
            context: json!({}),
        };
        assert_eq!(timed_out.error().map(|e| e.kind()), Some("TimeoutExceeded"));
        assert_eq!(timed_out.label(), "timed out");
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RunOutcome::TimedOut {
            step_index: 1,
            step_name: "slow".into(),
            budget: Duration::from_millis(1500),
            context: json!({"a": 1}),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], json!("timed_out"));
        assert_eq!(value["budget_ms"], json!(1500));

        let completed = serde_json::to_value(RunOutcome::Completed { context: json!([]) }).unwrap();
        assert_eq!(completed, json!({"status": "completed", "context": []}));
    }

    #[test]
    fn test_report_save() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("out/report.json");
        let now = Utc::now();
        let report = RunReport {
            workflow: "wf".into(),
            started_at: now,
            finished_at: now,
            elapsed_ms: 0,
            durations: Default::default(),
            outcome: RunOutcome::Failed {
                step_index: 0,
                step_name: "CopyFile".into(),
                error: adapter_failure(),
                context: json!({}),
            },
            timeline: ExecutionTimeline::new(),
        };
        report.save(&path).unwrap();

        let saved: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["outcome"]["status"], json!("failed"));
        assert_eq!(saved["outcome"]["error"]["kind"], json!("AdapterError"));
    }
}
