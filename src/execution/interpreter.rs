//! Pipeline Interpreter
//!
//! Walks a pipeline strictly left to right, threading one JSON context
//! through its steps. The context is committed only after a step succeeds,
//! so on failure (or when the enclosing future is dropped on timeout) it
//! holds the state as of the last completed step.

use std::sync::{Arc, Mutex};

use log::{debug, error, info};
use serde_json::Value;

use crate::adapter::StepAdapter;
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::model::{Pipeline, Step};

use super::map::MapExecutor;
use super::outcome::StepError;
use super::step::{run_pass, run_task};

/// A step failure together with where it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub step_index: usize,
    pub step_name: String,
    pub error: StepError,
}

/// Executes pipelines against an adapter.
///
/// Cheap to clone; clones share the adapter and the timeline, which is how
/// map branches report into the same run.
#[derive(Clone)]
pub struct Interpreter {
    adapter: Arc<dyn StepAdapter>,
    timeline: Arc<Mutex<ExecutionTimeline>>,
}

impl Interpreter {
    pub fn new(adapter: Arc<dyn StepAdapter>) -> Self {
        Self::with_timeline(adapter, Arc::new(Mutex::new(ExecutionTimeline::new())))
    }

    /// Creates an interpreter that records into an existing timeline.
    pub fn with_timeline(adapter: Arc<dyn StepAdapter>, timeline: Arc<Mutex<ExecutionTimeline>>) -> Self {
        Self { adapter, timeline }
    }

    pub fn timeline(&self) -> Arc<Mutex<ExecutionTimeline>> {
        Arc::clone(&self.timeline)
    }

    pub(crate) fn record(&self, step_id: &str, event_type: EventType) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.add_event(step_id, event_type);
        }
    }

    /// Runs `pipeline` from its first step.
    ///
    /// `context` is replaced after each successful step and `cursor` holds
    /// the index of the step currently in flight. `scope` prefixes timeline
    /// ids (empty at the top level).
    pub async fn execute_steps(
        &self,
        pipeline: &Pipeline,
        context: &mut Value,
        cursor: &mut usize,
        scope: &str,
    ) -> Result<(), StepFailure> {
        for (index, step) in pipeline.steps.iter().enumerate() {
            *cursor = index;
            let step_id = scoped(scope, step.name());

            self.record(&step_id, EventType::Started);
            debug!("Step {} '{}' ({}) started", index, step_id, step.kind());

            let result = match step {
                Step::Pass(pass) => run_pass(pass, context),
                Step::Task(task) => run_task(self.adapter.as_ref(), task, context).await,
                Step::Map(map) => MapExecutor::new(self.clone()).run_step(map, context, &step_id).await,
            };

            match result {
                Ok(next) => {
                    *context = next;
                    self.record(&step_id, EventType::Completed);
                    if scope.is_empty() {
                        info!("Step '{}' completed", step_id);
                    } else {
                        debug!("Step '{}' completed", step_id);
                    }
                }
                Err(error) => {
                    self.record(&step_id, EventType::Failed);
                    if scope.is_empty() {
                        error!("Step '{}' failed: {}", step_id, error);
                    } else {
                        debug!("Step '{}' failed: {}", step_id, error);
                    }
                    return Err(StepFailure {
                        step_index: index,
                        step_name: step.name().to_string(),
                        error,
                    });
                }
            }
        }

        Ok(())
    }

    /// Runs `pipeline` on a fresh context and returns the final context.
    pub async fn run_pipeline(&self, pipeline: &Pipeline, input: Value) -> Result<Value, StepFailure> {
        let mut context = input;
        let mut cursor = 0;
        self.execute_steps(pipeline, &mut context, &mut cursor, "").await?;
        Ok(context)
    }
}

fn scoped(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", scope, name)
    }
}
