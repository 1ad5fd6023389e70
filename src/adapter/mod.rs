//! Step Adapters
//!
//! The sole seam between the interpreter and external collaborators. A Task
//! step names an adapter operation; the interpreter hands it a JSON input and
//! gets back a JSON output or an [`AdapterError`]. Nothing else about the
//! collaborator is visible to the engine.
//!
//! # Components
//!
//! - [`storage`]: object store capability (copy/get/delete) with in-memory and
//!   filesystem backends
//! - [`table`]: key-value table capability (single-item upsert)
//! - [`policy`]: access grants checked before each operation
//! - [`service`]: routes operation names onto the store and table

pub mod policy;
pub mod service;
pub mod storage;
pub mod table;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use policy::AccessPolicy;
pub use service::ServiceAdapter;
pub use storage::{FsObjectStore, MemoryObjectStore, ObjectRef, ObjectStore};
pub use table::{FsTable, KeyValueTable, MemoryTable};

/// Failure reported by an external operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("unknown adapter operation '{0}'")]
    UnknownOperation(String),

    #[error("invalid input for '{operation}': {reason}")]
    InvalidInput { operation: String, reason: String },

    #[error("object '{container}/{key}' does not exist")]
    ObjectNotFound { container: String, key: String },

    #[error("resource '{0}' does not exist")]
    ResourceNotFound(String),

    #[error("access denied: {operation} on '{resource}'")]
    AccessDenied { operation: String, resource: String },

    #[error("{0}")]
    Failed(String),
}

impl AdapterError {
    pub(crate) fn invalid(operation: &str, reason: impl Into<String>) -> Self {
        AdapterError::InvalidInput {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        AdapterError::Failed(err.to_string())
    }
}

/// Uniform invocation contract for external operations.
///
/// Implementations may be slow and may fail; given identical input they are
/// expected to behave the same way. The engine never retries unless a task
/// explicitly configures it.
#[async_trait]
pub trait StepAdapter: Send + Sync {
    /// Invokes the named operation.
    async fn invoke(&self, adapter: &str, input: Value) -> Result<Value, AdapterError>;

    /// Operation names this adapter understands, for definition-time checks.
    fn operations(&self) -> Vec<String> {
        Vec::new()
    }
}
