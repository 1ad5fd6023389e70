//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, parsing, and
//! validating pipelines.
//!
//! # Structure
//!
//! - [`path`]: Path expressions, reads, writes and string templates
//! - [`payload`]: Parameter templates with `.$` expression keys
//! - [`model`]: Core data structures (Step, Pipeline, Workflow)
//! - [`parser`]: YAML/JSON loading and saving
//! - [`validator`]: Definition-time validation rules

pub mod model;
pub mod parser;
pub mod path;
pub mod payload;
pub mod validator;

pub use model::{MapStep, PassStep, Pipeline, ResultPath, RetryPolicy, Step, TaskStep, Workflow};
pub use parser::{load_workflow, parse_workflow, save_workflow, DefinitionError};
pub use path::{Path, PathError, Template};
pub use payload::{Expression, Payload, PayloadError};
pub use validator::{check_workflow, quick_validate, validate_workflow, ValidationError};
