//! Workflow Execution Engine
//!
//! Run control around the interpreter:
//! - Wall-clock budget for the whole run
//! - Outcome construction (Completed / Failed / TimedOut)
//! - Per-run timeline and timing report
//! - Blocking entry point for synchronous callers

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info, warn};
use serde_json::Value;

use crate::adapter::StepAdapter;
use crate::monitoring::ExecutionTimeline;
use crate::workflow::Workflow;

use super::interpreter::Interpreter;
use super::outcome::{RunOutcome, RunReport};

/// Workflow execution engine.
///
/// The engine owns the adapter and the run budget. A workflow's own
/// `timeout_secs` applies unless the engine has a budget set, which wins.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use pipeflow::adapter::{MemoryObjectStore, MemoryTable, ServiceAdapter};
/// use pipeflow::execution::Engine;
/// use pipeflow::load_workflow;
/// use serde_json::json;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipelines/file_ingest.yaml")?;
///     let adapter = ServiceAdapter::new(
///         Arc::new(MemoryObjectStore::new()),
///         Arc::new(MemoryTable::new().with_table("StepfnExample", "id")),
///     );
///
///     let mut engine = Engine::new(Arc::new(adapter));
///     engine.set_timeout(Duration::from_secs(60));
///
///     let outcome = engine.start(&workflow, json!({"key": "f.json"}))?;
///     println!("{}", outcome.label());
///     Ok(())
/// }
/// ```
pub struct Engine {
    adapter: Arc<dyn StepAdapter>,
    timeout: Option<Duration>,
}

impl Engine {
    /// Creates an engine with no budget of its own.
    pub fn new(adapter: Arc<dyn StepAdapter>) -> Self {
        Self {
            adapter,
            timeout: None,
        }
    }

    /// Sets the run budget, overriding the workflow's own.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// The budget that applies to `workflow`, if any.
    pub fn budget_for(&self, workflow: &Workflow) -> Option<Duration> {
        self.timeout.or_else(|| workflow.timeout())
    }

    /// Executes the workflow and returns its outcome.
    pub async fn run(&self, workflow: &Workflow, input: Value) -> RunOutcome {
        self.execute(workflow, input).await.outcome
    }

    /// Executes the workflow and returns the outcome with timing details.
    ///
    /// The context is committed step by step; if the budget runs out the
    /// in-flight step is dropped (map branches are aborted) and the outcome
    /// carries the context as of the last completed step. Each call records
    /// into its own timeline, so runs may share one engine concurrently.
    pub async fn execute(&self, workflow: &Workflow, input: Value) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();

        let timeline = Arc::new(Mutex::new(ExecutionTimeline::new()));
        let interpreter = Interpreter::with_timeline(Arc::clone(&self.adapter), Arc::clone(&timeline));

        let budget = self.budget_for(workflow);
        info!(
            "Starting workflow '{}' ({} steps, budget: {})",
            workflow.name,
            workflow.len(),
            budget
                .map(|b| format!("{}s", b.as_secs_f64()))
                .unwrap_or_else(|| "none".to_string())
        );

        let mut context = input;
        let mut cursor = 0;

        let result = {
            let steps = interpreter.execute_steps(&workflow.steps, &mut context, &mut cursor, "");
            match budget {
                Some(budget) => tokio::time::timeout(budget, steps).await.map_err(|_| budget),
                None => Ok(steps.await),
            }
        };

        let outcome = match result {
            Ok(Ok(())) => {
                info!("Workflow '{}' completed", workflow.name);
                RunOutcome::Completed { context }
            }
            Ok(Err(failure)) => {
                error!(
                    "Workflow '{}' failed at step {} ('{}'): {}",
                    workflow.name, failure.step_index, failure.step_name, failure.error
                );
                RunOutcome::Failed {
                    step_index: failure.step_index,
                    step_name: failure.step_name,
                    error: failure.error,
                    context,
                }
            }
            Err(budget) => {
                let step_name = workflow
                    .steps
                    .steps
                    .get(cursor)
                    .map(|s| s.name().to_string())
                    .unwrap_or_default();
                warn!(
                    "Workflow '{}' timed out after {:.1}s during step {} ('{}')",
                    workflow.name,
                    budget.as_secs_f64(),
                    cursor,
                    step_name
                );
                if let Ok(mut timeline) = timeline.lock() {
                    timeline.interrupt_open_steps();
                }
                RunOutcome::TimedOut {
                    step_index: cursor,
                    step_name,
                    budget,
                    context,
                }
            }
        };

        let timeline = timeline
            .lock()
            .map(|timeline| timeline.clone())
            .unwrap_or_default();
        let durations: BTreeMap<String, u128> = timeline.get_durations().into_iter().collect();

        RunReport {
            workflow: workflow.name.clone(),
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            durations,
            outcome,
            timeline,
        }
    }

    /// Blocking entry point: runs the workflow on a fresh runtime.
    pub fn start(&self, workflow: &Workflow, input: Value) -> Result<RunOutcome, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        Ok(runtime.block_on(self.run(workflow, input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, MemoryObjectStore, MemoryTable, ObjectRef, ObjectStore, ServiceAdapter};
    use crate::execution::outcome::StepError;
    use crate::monitoring::EventType;
    use crate::workflow::parse_workflow;
    use async_trait::async_trait;
    use serde_json::json;

    const FILE_INGEST: &str = include_str!("../../pipelines/file_ingest.yaml");

    /// Fails one named operation, delegating everything else.
    struct FailOn {
        inner: ServiceAdapter,
        operation: &'static str,
    }

    #[async_trait]
    impl StepAdapter for FailOn {
        async fn invoke(&self, adapter: &str, input: Value) -> Result<Value, AdapterError> {
            if adapter == self.operation {
                return Err(AdapterError::Failed(format!("{} unavailable", adapter)));
            }
            self.inner.invoke(adapter, input).await
        }
    }

    /// Delays one named operation, delegating everything.
    struct SlowOn {
        inner: ServiceAdapter,
        operation: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl StepAdapter for SlowOn {
        async fn invoke(&self, adapter: &str, input: Value) -> Result<Value, AdapterError> {
            if adapter == self.operation {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.invoke(adapter, input).await
        }
    }

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        table: Arc<MemoryTable>,
    }

    impl Fixture {
        async fn with_file(body: &str) -> Self {
            let store = Arc::new(MemoryObjectStore::new());
            store
                .put_object(&ObjectRef::new("a", "inbox/f.json"), body.as_bytes().to_vec())
                .await
                .unwrap();
            let table = Arc::new(MemoryTable::new().with_table("StepfnExample", "id"));
            Self { store, table }
        }

        fn adapter(&self) -> ServiceAdapter {
            ServiceAdapter::new(self.store.clone(), self.table.clone())
        }
    }

    fn initial_context() -> Value {
        json!({"sourceBucket": "a", "destBucket": "b", "key": "f.json", "id": "1", "name": "x"})
    }

    fn file_ingest() -> Workflow {
        parse_workflow(FILE_INGEST).unwrap()
    }

    #[tokio::test]
    async fn test_happy_path() {
        let fixture = Fixture::with_file(r#"[{"id":"1","name":"x"}]"#).await;
        let engine = Engine::new(Arc::new(fixture.adapter()));

        let outcome = engine.run(&file_ingest(), initial_context()).await;

        match &outcome {
            RunOutcome::Completed { context } => {
                let files = context["filesToDelete"].as_array().unwrap();
                assert_eq!(files.len(), 2);
                assert_eq!(files[0], json!({"Bucket": "a", "Key": "inbox/f.json"}));
                assert_eq!(files[1], json!({"Bucket": "b", "Key": "process/f.json"}));
            }
            other => panic!("expected completion, got {:?}", other),
        }

        assert_eq!(fixture.table.len("StepfnExample"), 1);
        assert_eq!(
            fixture.table.get("StepfnExample", "1").unwrap()["name"],
            json!({"S": "x"})
        );
        assert_eq!(fixture.store.list(), vec![ObjectRef::new("b", "archive/f.json")]);
    }

    #[tokio::test]
    async fn test_map_results_merged_before_cleanup() {
        let fixture = Fixture::with_file(r#"[{"id":"1","name":"x"},{"id":"2","name":"y"}]"#).await;
        let engine = Engine::new(Arc::new(fixture.adapter()));

        let mut workflow = file_ingest();
        // Stop before the pass step replaces the context.
        workflow.steps.steps.truncate(5);

        let outcome = engine.run(&workflow, initial_context()).await;
        let context = outcome.context();
        assert!(outcome.is_completed());
        assert_eq!(
            context["putItemResponse"],
            json!([{"statusCode": 200}, {"statusCode": 200}])
        );
        assert_eq!(context["archiveResult"]["Key"], json!("archive/f.json"));
        assert_eq!(fixture.table.len("StepfnExample"), 2);
    }

    #[tokio::test]
    async fn test_empty_file_content() {
        let fixture = Fixture::with_file("[]").await;
        let engine = Engine::new(Arc::new(fixture.adapter()));

        let mut workflow = file_ingest();
        workflow.steps.steps.truncate(5);

        let outcome = engine.run(&workflow, initial_context()).await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.context()["putItemResponse"], json!([]));
        assert!(fixture.store.contains(&ObjectRef::new("b", "archive/f.json")));
        assert!(fixture.table.is_empty("StepfnExample"));
    }

    #[tokio::test]
    async fn test_read_failure_keeps_copy() {
        let fixture = Fixture::with_file(r#"[{"id":"1","name":"x"}]"#).await;
        let adapter = FailOn {
            inner: fixture.adapter(),
            operation: "storage:getObject",
        };
        let engine = Engine::new(Arc::new(adapter));

        let outcome = engine.run(&file_ingest(), initial_context()).await;

        match &outcome {
            RunOutcome::Failed {
                step_index,
                step_name,
                error,
                context,
            } => {
                assert_eq!(*step_index, 2);
                assert_eq!(step_name, "ReadFileContent");
                assert_eq!(error.kind(), "AdapterError");
                assert!(context.get("copyResult").is_some());
                assert!(context.get("getObject").is_none());
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(fixture.store.contains(&ObjectRef::new("b", "process/f.json")));
    }

    #[tokio::test]
    async fn test_map_item_failure_fails_run() {
        let fixture = Fixture::with_file(r#"[{"id":"1","name":"x"},{"name":"no id"}]"#).await;
        let engine = Engine::new(Arc::new(fixture.adapter()));

        let outcome = engine.run(&file_ingest(), initial_context()).await;

        assert_eq!(outcome.step_index(), Some(3));
        match outcome.error() {
            Some(StepError::MapItemFailure { item_index, step_name, .. }) => {
                assert_eq!(item_index, 1);
                assert_eq!(step_name, "InsertRecord");
            }
            other => panic!("expected map item failure, got {:?}", other),
        }
        assert!(outcome.context().get("putItemResponse").is_none());
        assert!(outcome.context().get("getObject").is_some());
    }

    #[tokio::test]
    async fn test_timeout_during_map() {
        let fixture = Fixture::with_file(r#"[{"id":"1","name":"x"}]"#).await;
        let adapter = SlowOn {
            inner: fixture.adapter(),
            operation: "table:putItem",
            delay: Duration::from_secs(5),
        };
        let mut engine = Engine::new(Arc::new(adapter));
        engine.set_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let report = engine.execute(&file_ingest(), initial_context()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        let outcome = report.outcome;

        match &outcome {
            RunOutcome::TimedOut {
                step_index,
                step_name,
                budget,
                context,
            } => {
                assert_eq!(*step_index, 3);
                assert_eq!(step_name, "putItem");
                assert_eq!(*budget, Duration::from_millis(200));
                assert_eq!(context["getObject"]["filecontent"], json!([{"id": "1", "name": "x"}]));
                assert!(context.get("putItemResponse").is_none());
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        assert!(report.timeline.open_steps().is_empty());
        assert!(report.timeline.count(EventType::Interrupted) >= 1);
    }

    #[tokio::test]
    async fn test_engine_budget_overrides_workflow() {
        let fixture = Fixture::with_file("[]").await;
        let mut engine = Engine::new(Arc::new(fixture.adapter()));
        let workflow = file_ingest();

        assert_eq!(engine.budget_for(&workflow), Some(Duration::from_secs(600)));
        engine.set_timeout(Duration::from_secs(5));
        assert_eq!(engine.budget_for(&workflow), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_report_durations() {
        let fixture = Fixture::with_file(r#"[{"id":"1","name":"x"}]"#).await;
        let engine = Engine::new(Arc::new(fixture.adapter()));

        let report = engine.execute(&file_ingest(), initial_context()).await;
        assert_eq!(report.workflow, "file-ingest");
        assert!(report.outcome.is_completed());
        assert!(report.durations.contains_key("CopyFile"));
        assert!(report.durations.contains_key("putItem[0]/InsertRecord"));
        assert!(report.finished_at >= report.started_at);
    }

    /// Echoes its input after a short pause.
    struct Pause;

    #[async_trait]
    impl StepAdapter for Pause {
        async fn invoke(&self, _adapter: &str, input: Value) -> Result<Value, AdapterError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_keep_separate_timelines() {
        use crate::workflow::Step;

        let engine = Engine::new(Arc::new(Pause));
        let first = Workflow::new("first", vec![Step::task("FirstA", "wait"), Step::task("FirstB", "wait")]);
        let second = Workflow::new("second", vec![Step::task("SecondA", "wait")]);

        let (first_report, second_report) = tokio::join!(
            engine.execute(&first, json!({})),
            engine.execute(&second, json!({}))
        );

        assert!(first_report.outcome.is_completed());
        assert!(second_report.outcome.is_completed());
        assert_eq!(
            first_report.durations.keys().collect::<Vec<_>>(),
            vec!["FirstA", "FirstB"]
        );
        assert_eq!(second_report.durations.keys().collect::<Vec<_>>(), vec!["SecondA"]);
        assert_eq!(first_report.timeline.count(EventType::Started), 2);
        assert_eq!(second_report.timeline.count(EventType::Started), 1);
    }

    #[test]
    fn test_blocking_start() {
        let store = Arc::new(MemoryObjectStore::new());
        let table = Arc::new(MemoryTable::new());
        let engine = Engine::new(Arc::new(ServiceAdapter::new(store, table)));
        let workflow = Workflow::new("noop", vec![crate::workflow::Step::pass("only")]);

        let outcome = engine.start(&workflow, json!({"a": 1})).unwrap();
        assert_eq!(outcome, RunOutcome::Completed { context: json!({"a": 1}) });
    }
}
