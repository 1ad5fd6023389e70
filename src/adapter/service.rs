//! Service adapter routing task operations onto storage and table backends.
//!
//! | operation              | input                              | output                                  |
//! |------------------------|------------------------------------|-----------------------------------------|
//! | `storage:copyObject`   | `Bucket`, `Key`, `CopySource`      | `Bucket`, `Key`, `CopySource`, `ContentLength` |
//! | `storage:getObject`    | `Bucket`, `Key`                    | `Bucket`, `Key`, `Body`, `ContentLength` |
//! | `storage:deleteObject` | `Bucket`, `Key`                    | `Bucket`, `Key`, `Deleted`              |
//! | `table:putItem`        | `TableName`, `Item`                | `TableName`, `StatusCode`, `Replaced`   |
//!
//! `CopySource` is `container/key`.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Map, Value};

use super::policy::AccessPolicy;
use super::storage::{ObjectRef, ObjectStore};
use super::table::KeyValueTable;
use super::{AdapterError, StepAdapter};

pub const COPY_OBJECT: &str = "storage:copyObject";
pub const GET_OBJECT: &str = "storage:getObject";
pub const DELETE_OBJECT: &str = "storage:deleteObject";
pub const PUT_ITEM: &str = "table:putItem";

/// Status reported for a successful table write.
const STATUS_OK: u16 = 200;

/// Adapter backed by an object store and a key-value table.
pub struct ServiceAdapter {
    store: Arc<dyn ObjectStore>,
    table: Arc<dyn KeyValueTable>,
    policy: AccessPolicy,
}

impl ServiceAdapter {
    /// Creates an adapter with unrestricted access.
    pub fn new(store: Arc<dyn ObjectStore>, table: Arc<dyn KeyValueTable>) -> Self {
        Self {
            store,
            table,
            policy: AccessPolicy::allow_all(),
        }
    }

    /// Replaces the access policy.
    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn copy_object(&self, input: &Value) -> Result<Value, AdapterError> {
        let destination = object_ref(COPY_OBJECT, input)?;
        let copy_source = required_str(COPY_OBJECT, input, "CopySource")?;
        let source = ObjectRef::parse(copy_source).ok_or_else(|| {
            AdapterError::invalid(COPY_OBJECT, format!("CopySource '{}' is not container/key", copy_source))
        })?;

        self.policy.check_read(COPY_OBJECT, &source.container)?;
        self.policy.check_write(COPY_OBJECT, &destination.container)?;

        let size = self.store.copy_object(&source, &destination).await?;
        Ok(json!({
            "Bucket": destination.container,
            "Key": destination.key,
            "CopySource": source.to_string(),
            "ContentLength": size,
        }))
    }

    async fn get_object(&self, input: &Value) -> Result<Value, AdapterError> {
        let object = object_ref(GET_OBJECT, input)?;
        self.policy.check_read(GET_OBJECT, &object.container)?;

        let bytes = self.store.get_object(&object).await?;
        let size = bytes.len();
        let body = String::from_utf8(bytes)
            .map_err(|_| AdapterError::Failed(format!("object '{}' is not valid UTF-8", object)))?;

        Ok(json!({
            "Bucket": object.container,
            "Key": object.key,
            "Body": body,
            "ContentLength": size,
        }))
    }

    async fn delete_object(&self, input: &Value) -> Result<Value, AdapterError> {
        let object = object_ref(DELETE_OBJECT, input)?;
        self.policy.check_write(DELETE_OBJECT, &object.container)?;

        self.store.delete_object(&object).await?;
        Ok(json!({
            "Bucket": object.container,
            "Key": object.key,
            "Deleted": true,
        }))
    }

    async fn put_item(&self, input: &Value) -> Result<Value, AdapterError> {
        let table = required_str(PUT_ITEM, input, "TableName")?;
        let item: Map<String, Value> = match input.get("Item") {
            Some(Value::Object(item)) => item.clone(),
            _ => return Err(AdapterError::invalid(PUT_ITEM, "'Item' must be an object")),
        };
        self.policy.check_table_write(PUT_ITEM, table)?;

        let outcome = self.table.put_item(table, item).await?;
        Ok(json!({
            "TableName": table,
            "StatusCode": STATUS_OK,
            "Replaced": outcome.replaced,
        }))
    }
}

fn required_str<'a>(operation: &str, input: &'a Value, field: &str) -> Result<&'a str, AdapterError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterError::invalid(operation, format!("missing string field '{}'", field)))
}

fn object_ref(operation: &str, input: &Value) -> Result<ObjectRef, AdapterError> {
    Ok(ObjectRef::new(
        required_str(operation, input, "Bucket")?,
        required_str(operation, input, "Key")?,
    ))
}

#[async_trait]
impl StepAdapter for ServiceAdapter {
    async fn invoke(&self, adapter: &str, input: Value) -> Result<Value, AdapterError> {
        debug!("Invoking {}", adapter);
        match adapter {
            COPY_OBJECT => self.copy_object(&input).await,
            GET_OBJECT => self.get_object(&input).await,
            DELETE_OBJECT => self.delete_object(&input).await,
            PUT_ITEM => self.put_item(&input).await,
            other => Err(AdapterError::UnknownOperation(other.to_string())),
        }
    }

    fn operations(&self) -> Vec<String> {
        [COPY_OBJECT, GET_OBJECT, DELETE_OBJECT, PUT_ITEM]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{MemoryObjectStore, MemoryTable};

    async fn adapter_with(policy: AccessPolicy) -> (ServiceAdapter, Arc<MemoryObjectStore>, Arc<MemoryTable>) {
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put_object(&ObjectRef::new("a", "inbox/f.json"), br#"[{"id":"1"}]"#.to_vec())
            .await
            .unwrap();
        let table = Arc::new(MemoryTable::new().with_table("StepfnExample", "id"));
        let adapter = ServiceAdapter::new(store.clone(), table.clone()).with_policy(policy);
        (adapter, store, table)
    }

    #[tokio::test]
    async fn test_copy_then_get() {
        let (adapter, store, _) = adapter_with(AccessPolicy::allow_all()).await;

        let copied = adapter
            .invoke(
                COPY_OBJECT,
                json!({"Bucket": "b", "Key": "process/f.json", "CopySource": "a/inbox/f.json"}),
            )
            .await
            .unwrap();
        assert_eq!(copied["ContentLength"], json!(12));
        assert!(store.contains(&ObjectRef::new("b", "process/f.json")));

        let fetched = adapter
            .invoke(GET_OBJECT, json!({"Bucket": "b", "Key": "process/f.json"}))
            .await
            .unwrap();
        assert_eq!(fetched["Body"], json!(r#"[{"id":"1"}]"#));
    }

    #[tokio::test]
    async fn test_delete_object() {
        let (adapter, store, _) = adapter_with(AccessPolicy::allow_all()).await;
        let out = adapter
            .invoke(DELETE_OBJECT, json!({"Bucket": "a", "Key": "inbox/f.json"}))
            .await
            .unwrap();
        assert_eq!(out["Deleted"], json!(true));
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn test_put_item() {
        let (adapter, _, table) = adapter_with(AccessPolicy::allow_all()).await;
        let out = adapter
            .invoke(PUT_ITEM, json!({"TableName": "StepfnExample", "Item": {"id": "1", "name": "x"}}))
            .await
            .unwrap();
        assert_eq!(out["StatusCode"], json!(200));
        assert_eq!(out["Replaced"], json!(false));
        assert_eq!(table.len("StepfnExample"), 1);
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let (adapter, _, _) = adapter_with(AccessPolicy::allow_all()).await;
        assert!(matches!(
            adapter.invoke(GET_OBJECT, json!({"Bucket": "a"})).await,
            Err(AdapterError::InvalidInput { .. })
        ));
        assert!(matches!(
            adapter
                .invoke(COPY_OBJECT, json!({"Bucket": "b", "Key": "k", "CopySource": "nokey"}))
                .await,
            Err(AdapterError::InvalidInput { .. })
        ));
        assert!(matches!(
            adapter.invoke(PUT_ITEM, json!({"TableName": "StepfnExample", "Item": 3})).await,
            Err(AdapterError::InvalidInput { .. })
        ));
        assert_eq!(
            adapter.invoke("queue:send", json!({})).await,
            Err(AdapterError::UnknownOperation("queue:send".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_object_fails() {
        let (adapter, _, _) = adapter_with(AccessPolicy::allow_all()).await;
        assert!(matches!(
            adapter.invoke(GET_OBJECT, json!({"Bucket": "b", "Key": "process/f.json"})).await,
            Err(AdapterError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_policy_enforced() {
        let policy = AccessPolicy::new().grant_read("a").grant_read_write("b");
        let (adapter, store, _) = adapter_with(policy).await;

        assert!(adapter
            .invoke(COPY_OBJECT, json!({"Bucket": "b", "Key": "k", "CopySource": "a/inbox/f.json"}))
            .await
            .is_ok());
        assert!(matches!(
            adapter.invoke(DELETE_OBJECT, json!({"Bucket": "a", "Key": "inbox/f.json"})).await,
            Err(AdapterError::AccessDenied { .. })
        ));
        assert!(store.contains(&ObjectRef::new("a", "inbox/f.json")));
        assert!(matches!(
            adapter
                .invoke(PUT_ITEM, json!({"TableName": "StepfnExample", "Item": {"id": "1"}}))
                .await,
            Err(AdapterError::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_operations_listed() {
        let adapter = ServiceAdapter::new(Arc::new(MemoryObjectStore::new()), Arc::new(MemoryTable::new()));
        assert_eq!(adapter.operations().len(), 4);
        assert!(adapter.operations().contains(&PUT_ITEM.to_string()));
    }
}
