//! Access grants for storage containers and tables.
//!
//! Mirrors "grant read/write on this bucket to the pipeline": the policy is
//! built once and handed to the adapter, which checks it before every call.

use std::collections::{HashMap, HashSet};

use super::AdapterError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Access {
    read: bool,
    write: bool,
}

/// Which operations may touch which resources.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    unrestricted: bool,
    containers: HashMap<String, Access>,
    tables: HashSet<String>,
}

impl AccessPolicy {
    /// A policy that denies everything until grants are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that allows every operation on every resource.
    pub fn allow_all() -> Self {
        Self {
            unrestricted: true,
            ..Self::default()
        }
    }

    pub fn grant_read(mut self, container: impl Into<String>) -> Self {
        self.containers.entry(container.into()).or_default().read = true;
        self
    }

    pub fn grant_write(mut self, container: impl Into<String>) -> Self {
        self.containers.entry(container.into()).or_default().write = true;
        self
    }

    pub fn grant_read_write(self, container: impl Into<String>) -> Self {
        let container = container.into();
        self.grant_read(container.clone()).grant_write(container)
    }

    pub fn grant_table_write(mut self, table: impl Into<String>) -> Self {
        self.tables.insert(table.into());
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }

    pub fn check_read(&self, operation: &str, container: &str) -> Result<(), AdapterError> {
        let allowed = self.unrestricted
            || self.containers.get(container).map(|a| a.read).unwrap_or(false);
        deny_unless(allowed, operation, container)
    }

    pub fn check_write(&self, operation: &str, container: &str) -> Result<(), AdapterError> {
        let allowed = self.unrestricted
            || self.containers.get(container).map(|a| a.write).unwrap_or(false);
        deny_unless(allowed, operation, container)
    }

    pub fn check_table_write(&self, operation: &str, table: &str) -> Result<(), AdapterError> {
        deny_unless(self.unrestricted || self.tables.contains(table), operation, table)
    }
}

fn deny_unless(allowed: bool, operation: &str, resource: &str) -> Result<(), AdapterError> {
    if allowed {
        Ok(())
    } else {
        Err(AdapterError::AccessDenied {
            operation: operation.to_string(),
            resource: resource.to_string(),
        })
    }
}
