//! Key-Value Tables
//!
//! Single-item upserts into named tables, each keyed by one partition-key
//! attribute. Tables must be declared before items are written.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use serde_json::{Map, Value};

use super::AdapterError;

const PUT_ITEM: &str = "table:putItem";

/// Outcome of a single put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// True when an item with the same key was overwritten.
    pub replaced: bool,
}

/// Key-value table capability.
#[async_trait]
pub trait KeyValueTable: Send + Sync {
    /// Inserts or replaces `item` in `table`.
    async fn put_item(&self, table: &str, item: Map<String, Value>) -> Result<PutOutcome, AdapterError>;
}

/// Extracts the partition key of an item as a string.
///
/// Accepts plain strings and numbers, plus typed attribute wrappers such as
/// `{"S": "1"}` or `{"N": "42"}`.
fn item_key(partition_key: &str, item: &Map<String, Value>) -> Result<String, AdapterError> {
    let value = item.get(partition_key).ok_or_else(|| {
        AdapterError::invalid(PUT_ITEM, format!("item is missing partition key '{}'", partition_key))
    })?;

    let unwrapped = match value {
        Value::Object(typed) if typed.len() == 1 => typed.values().next().unwrap_or(value),
        other => other,
    };

    match unwrapped {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(AdapterError::invalid(
            PUT_ITEM,
            format!("partition key '{}' must be a non-empty string or number, got {}", partition_key, other),
        )),
    }
}

type TableRows = BTreeMap<String, Map<String, Value>>;

/// In-memory tables.
#[derive(Debug, Default)]
pub struct MemoryTable {
    schemas: HashMap<String, String>,
    rows: Mutex<HashMap<String, TableRows>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a table keyed by `partition_key`.
    pub fn with_table(mut self, table: impl Into<String>, partition_key: impl Into<String>) -> Self {
        self.schemas.insert(table.into(), partition_key.into());
        self
    }

    /// Reads an item back by key.
    pub fn get(&self, table: &str, key: &str) -> Option<Map<String, Value>> {
        let rows = self.rows.lock().ok()?;
        rows.get(table)?.get(key).cloned()
    }

    /// Number of items stored in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.rows
            .lock()
            .map(|rows| rows.get(table).map(BTreeMap::len).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

#[async_trait]
impl KeyValueTable for MemoryTable {
    async fn put_item(&self, table: &str, item: Map<String, Value>) -> Result<PutOutcome, AdapterError> {
        let partition_key = self
            .schemas
            .get(table)
            .ok_or_else(|| AdapterError::ResourceNotFound(table.to_string()))?;
        let key = item_key(partition_key, &item)?;

        let mut rows = self
            .rows
            .lock()
            .map_err(|_| AdapterError::Failed("table lock poisoned".to_string()))?;
        let replaced = rows.entry(table.to_string()).or_default().insert(key.clone(), item).is_some();

        debug!("Put item '{}' into table '{}' (replaced: {})", key, table, replaced);
        Ok(PutOutcome { replaced })
    }
}

/// File-backed tables: each table is `<root>/<table>.json`, an object
/// mapping partition keys to items.
#[derive(Debug)]
pub struct FsTable {
    root: PathBuf,
    schemas: HashMap<String, String>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FsTable {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            schemas: HashMap::new(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Declares a table keyed by `partition_key`.
    pub fn with_table(mut self, table: impl Into<String>, partition_key: impl Into<String>) -> Self {
        self.schemas.insert(table.into(), partition_key.into());
        self
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{}.json", table))
    }

    /// Loads every item of a table.
    pub async fn load(&self, table: &str) -> Result<TableRows, AdapterError> {
        match tokio::fs::read_to_string(self.table_path(table)).await {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| AdapterError::Failed(format!("table '{}' is corrupt: {}", table, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TableRows::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KeyValueTable for FsTable {
    async fn put_item(&self, table: &str, item: Map<String, Value>) -> Result<PutOutcome, AdapterError> {
        let partition_key = self
            .schemas
            .get(table)
            .ok_or_else(|| AdapterError::ResourceNotFound(table.to_string()))?;
        let key = item_key(partition_key, &item)?;

        let _guard = self.write_lock.lock().await;
        let mut rows = self.load(table).await?;
        let replaced = rows.insert(key.clone(), item).is_some();

        tokio::fs::create_dir_all(&self.root).await?;
        let text = serde_json::to_string_pretty(&rows)
            .map_err(|e| AdapterError::Failed(e.to_string()))?;
        tokio::fs::write(self.table_path(table), text).await?;

        debug!("Put item '{}' into table file '{}' (replaced: {})", key, table, replaced);
        Ok(PutOutcome { replaced })
    }
}
