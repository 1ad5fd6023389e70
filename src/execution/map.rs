//! Map Execution
//!
//! Bounded fan-out over a list with order-preserving fan-in.
//!
//! # Scheduling
//!
//! Each item runs the iterator pipeline on its own task, starting from the
//! item itself as context. A semaphore caps how many branches are in flight;
//! further items wait for a permit. Results land in a slot indexed by the
//! item's position, so output order matches input order whatever order the
//! branches finish in.
//!
//! The first failing branch fails the whole step. No new items are admitted
//! after that, and branches already running are detached rather than awaited:
//! their side effects cannot be unwound anyway.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::monitoring::EventType;
use crate::workflow::model::{MapStep, Pipeline};
use crate::workflow::path::{self, kind_of};

use super::interpreter::{Interpreter, StepFailure};
use super::outcome::StepError;

type BranchFuture = Pin<Box<dyn Future<Output = Result<Value, StepFailure>> + Send + 'static>>;

/// Runs a sub-pipeline once per item.
pub struct MapExecutor {
    interpreter: Interpreter,
}

impl MapExecutor {
    pub fn new(interpreter: Interpreter) -> Self {
        Self { interpreter }
    }

    /// Executes a Map step against `context`, returning the next context.
    pub async fn run_step(&self, step: &MapStep, context: &Value, step_id: &str) -> Result<Value, StepError> {
        let items = match path::read(context, &step.items_path)? {
            Value::Array(items) => items.clone(),
            other => {
                return Err(StepError::TypeMismatch {
                    path: step.items_path.to_string(),
                    expected: "array",
                    found: kind_of(other),
                })
            }
        };

        let results = self
            .run(items, step.max_concurrency, Arc::new(step.iterator.clone()), step_id)
            .await?;

        Ok(step.result_path.apply(context, Value::Array(results))?)
    }

    /// Runs `iterator` over `items` with at most `max_concurrency` branches
    /// in flight (unbounded when `None`).
    ///
    /// # Returns
    ///
    /// * `Ok(outputs)` - One output per item, in input order
    /// * `Err(MapItemFailure)` - The first branch failure observed
    pub async fn run(
        &self,
        items: Vec<Value>,
        max_concurrency: Option<usize>,
        iterator: Arc<Pipeline>,
        step_id: &str,
    ) -> Result<Vec<Value>, StepError> {
        let total = items.len();
        if total == 0 {
            debug!("Map '{}' has no items", step_id);
            return Ok(Vec::new());
        }

        let limit = max_concurrency.unwrap_or(total).clamp(1, total);
        info!(
            "Map '{}' over {} items (max concurrency: {})",
            step_id, total, limit
        );

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut pending = items.into_iter().enumerate().peekable();
        let mut results: Vec<Option<Value>> = vec![None; total];
        let mut branches: JoinSet<(usize, Result<Value, StepFailure>)> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                Some(joined) = branches.join_next(), if !branches.is_empty() => {
                    let (item_index, result) = match joined {
                        Ok(finished) => finished,
                        Err(e) => {
                            branches.detach_all();
                            return Err(StepError::BranchAborted(e.to_string()));
                        }
                    };

                    match result {
                        Ok(output) => results[item_index] = Some(output),
                        Err(failure) => {
                            let in_flight = branches.len();
                            branches.detach_all();
                            warn!(
                                "Map '{}' item {} failed; abandoning {} in-flight and {} pending items",
                                step_id,
                                item_index,
                                in_flight,
                                pending.len()
                            );
                            return Err(StepError::MapItemFailure {
                                item_index,
                                step_index: failure.step_index,
                                step_name: failure.step_name,
                                source: Box::new(failure.error),
                            });
                        }
                    }
                }

                permit = Arc::clone(&semaphore).acquire_owned(), if pending.peek().is_some() => {
                    let permit = permit.map_err(|e| StepError::BranchAborted(e.to_string()))?;
                    if let Some((item_index, item)) = pending.next() {
                        let branch_id = format!("{}[{}]", step_id, item_index);
                        let branch = run_branch(
                            self.interpreter.clone(),
                            Arc::clone(&iterator),
                            item,
                            branch_id,
                        );
                        branches.spawn(async move {
                            let result = branch.await;
                            drop(permit);
                            (item_index, result)
                        });
                    }
                }

                else => break,
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}

/// One map branch, boxed so the interpreter and the map executor can
/// recurse into each other.
fn run_branch(interpreter: Interpreter, iterator: Arc<Pipeline>, item: Value, branch_id: String) -> BranchFuture {
    Box::pin(async move {
        interpreter.record(&branch_id, EventType::Started);

        let mut context = item;
        let mut cursor = 0;
        let result = interpreter
            .execute_steps(&iterator, &mut context, &mut cursor, &branch_id)
            .await;

        match result {
            Ok(()) => {
                interpreter.record(&branch_id, EventType::Completed);
                Ok(context)
            }
            Err(failure) => {
                interpreter.record(&branch_id, EventType::Failed);
                Err(failure)
            }
        }
    })
}
