//! Pipeflow - Declarative Pipeline Interpreter
//!
//! Runs linear pipelines of Pass, Task and Map steps over a single JSON
//! context. Tasks call external operations through a narrow adapter seam;
//! Map steps fan a sub-pipeline out over a list with a concurrency cap and
//! collect the results in input order. A whole run is bounded by a
//! wall-clock budget.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Paths, payload templates, step model, parsing and validation
//! - [`execution`]: Interpreter, map executor and run control
//! - [`adapter`]: The adapter seam plus object storage and table collaborators
//! - [`monitoring`]: Execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pipeflow::adapter::{FsObjectStore, FsTable, ServiceAdapter};
//! use pipeflow::execution::Engine;
//! use pipeflow::load_workflow;
//! use serde_json::json;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML
//!     let workflow = load_workflow("pipelines/file_ingest.yaml")?;
//!
//!     // Wire the collaborators
//!     let adapter = ServiceAdapter::new(
//!         Arc::new(FsObjectStore::new("data/objects")),
//!         Arc::new(FsTable::new("data/tables").with_table("StepfnExample", "id")),
//!     );
//!
//!     // Execute the workflow
//!     let engine = Engine::new(Arc::new(adapter));
//!     let outcome = engine.start(&workflow, json!({
//!         "sourceBucket": "a", "destBucket": "b", "key": "f.json"
//!     }))?;
//!     println!("Run {}", outcome.label());
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use adapter::{AdapterError, StepAdapter};
pub use execution::engine::Engine;
pub use execution::outcome::{RunOutcome, StepError};
pub use workflow::model::{Step, Workflow};
pub use workflow::parser::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Pipeflow";
