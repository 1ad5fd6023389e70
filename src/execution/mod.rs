//! Workflow Execution Module
//!
//! Runs pipelines: threads the JSON context through each step, fans Map
//! steps out over their items and enforces the run budget.
//!
//! # Architecture
//!
//! - [`engine`]: Run control, timeout and outcome construction
//! - [`interpreter`]: Sequential step walker
//! - [`step`]: Pass and Task step execution
//! - [`map`]: Bounded-concurrency fan-out with ordered fan-in
//! - [`outcome`]: Step errors and terminal run outcomes

pub mod engine;
pub mod interpreter;
pub mod map;
pub mod outcome;
pub mod step;

pub use engine::Engine;
pub use interpreter::{Interpreter, StepFailure};
pub use map::MapExecutor;
pub use outcome::{RunOutcome, RunReport, StepError};
