//! Object Storage
//!
//! Named objects inside named containers. Two backends:
//! - [`MemoryObjectStore`]: a map in memory, for tests and dry runs
//! - [`FsObjectStore`]: one directory per container under a root directory

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;

use super::AdapterError;

/// Address of one object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub container: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Parses a `container/key/with/slashes` reference.
    pub fn parse(reference: &str) -> Option<Self> {
        let (container, key) = reference.trim_start_matches('/').split_once('/')?;
        if container.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(container, key))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// Object storage capability.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copies `source` to `destination`, returning the number of bytes copied.
    async fn copy_object(&self, source: &ObjectRef, destination: &ObjectRef) -> Result<u64, AdapterError>;

    async fn get_object(&self, object: &ObjectRef) -> Result<Vec<u8>, AdapterError>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete_object(&self, object: &ObjectRef) -> Result<(), AdapterError>;

    async fn put_object(&self, object: &ObjectRef, body: Vec<u8>) -> Result<(), AdapterError>;

    async fn exists(&self, object: &ObjectRef) -> Result<bool, AdapterError>;
}

fn not_found(object: &ObjectRef) -> AdapterError {
    AdapterError::ObjectNotFound {
        container: object.container.clone(),
        key: object.key.clone(),
    }
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<ObjectRef, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored references, sorted.
    pub fn list(&self) -> Vec<ObjectRef> {
        match self.objects.lock() {
            Ok(objects) => objects.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }

    /// Returns true if the object is present.
    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.list().contains(object)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<ObjectRef, Vec<u8>>>, AdapterError> {
        self.objects
            .lock()
            .map_err(|_| AdapterError::Failed("object store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn copy_object(&self, source: &ObjectRef, destination: &ObjectRef) -> Result<u64, AdapterError> {
        let mut objects = self.lock()?;
        let body = objects.get(source).cloned().ok_or_else(|| not_found(source))?;
        let size = body.len() as u64;
        objects.insert(destination.clone(), body);
        debug!("Copied {} -> {} ({} bytes)", source, destination, size);
        Ok(size)
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<Vec<u8>, AdapterError> {
        self.lock()?.get(object).cloned().ok_or_else(|| not_found(object))
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), AdapterError> {
        if self.lock()?.remove(object).is_some() {
            debug!("Deleted {}", object);
        }
        Ok(())
    }

    async fn put_object(&self, object: &ObjectRef, body: Vec<u8>) -> Result<(), AdapterError> {
        self.lock()?.insert(object.clone(), body);
        Ok(())
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool, AdapterError> {
        Ok(self.lock()?.contains_key(object))
    }
}

/// Filesystem-backed object store: `<root>/<container>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an object to a file path, refusing keys that escape the container.
    fn resolve(&self, object: &ObjectRef) -> Result<PathBuf, AdapterError> {
        for part in [&object.container, &object.key] {
            let escapes = Path::new(part)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
            if part.is_empty() || escapes {
                return Err(AdapterError::InvalidInput {
                    operation: "storage".to_string(),
                    reason: format!("invalid object reference '{}'", object),
                });
            }
        }
        Ok(self.root.join(&object.container).join(&object.key))
    }

    async fn ensure_parent(path: &Path) -> Result<(), AdapterError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn map_missing(err: std::io::Error, object: &ObjectRef) -> AdapterError {
    if err.kind() == std::io::ErrorKind::NotFound {
        not_found(object)
    } else {
        AdapterError::from(err)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn copy_object(&self, source: &ObjectRef, destination: &ObjectRef) -> Result<u64, AdapterError> {
        let from = self.resolve(source)?;
        let to = self.resolve(destination)?;
        Self::ensure_parent(&to).await?;

        let size = tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| map_missing(e, source))?;
        debug!("Copied {} -> {} ({} bytes)", from.display(), to.display(), size);
        Ok(size)
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<Vec<u8>, AdapterError> {
        let path = self.resolve(object)?;
        tokio::fs::read(&path).await.map_err(|e| map_missing(e, object))
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), AdapterError> {
        let path = self.resolve(object)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(&self, object: &ObjectRef, body: Vec<u8>) -> Result<(), AdapterError> {
        let path = self.resolve(object)?;
        Self::ensure_parent(&path).await?;
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool, AdapterError> {
        let path = self.resolve(object)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_object_ref_parse() {
        assert_eq!(ObjectRef::parse("a/inbox/f.json"), Some(ObjectRef::new("a", "inbox/f.json")));
        assert_eq!(ObjectRef::parse("/a/f"), Some(ObjectRef::new("a", "f")));
        assert_eq!(ObjectRef::parse("nokey"), None);
        assert_eq!(ObjectRef::parse("a/"), None);
        assert_eq!(ObjectRef::new("b", "process/f.json").to_string(), "b/process/f.json");
    }

    #[tokio::test]
    async fn test_memory_copy_get_delete() {
        let store = MemoryObjectStore::new();
        let src = ObjectRef::new("a", "inbox/f.json");
        let dst = ObjectRef::new("b", "process/f.json");
        store.put_object(&src, b"[]".to_vec()).await.unwrap();

        assert_eq!(store.copy_object(&src, &dst).await.unwrap(), 2);
        assert_eq!(store.get_object(&dst).await.unwrap(), b"[]".to_vec());

        store.delete_object(&src).await.unwrap();
        assert!(!store.exists(&src).await.unwrap());
        assert!(store.contains(&dst));
        assert_eq!(store.list(), vec![dst]);
    }

    #[tokio::test]
    async fn test_memory_missing_object() {
        let store = MemoryObjectStore::new();
        let missing = ObjectRef::new("a", "nope");
        assert_eq!(
            store.get_object(&missing).await,
            Err(AdapterError::ObjectNotFound {
                container: "a".into(),
                key: "nope".into()
            })
        );
        assert!(store.copy_object(&missing, &ObjectRef::new("b", "x")).await.is_err());
        assert!(store.delete_object(&missing).await.is_ok());
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let store = FsObjectStore::new(temp_dir.path());
        let src = ObjectRef::new("a", "inbox/f.json");
        let dst = ObjectRef::new("b", "archive/f.json");

        store.put_object(&src, b"hello".to_vec()).await.unwrap();
        assert!(temp_dir.path().join("a/inbox/f.json").exists());

        assert_eq!(store.copy_object(&src, &dst).await.unwrap(), 5);
        assert_eq!(store.get_object(&dst).await.unwrap(), b"hello".to_vec());

        store.delete_object(&src).await.unwrap();
        assert!(!store.exists(&src).await.unwrap());
        store.delete_object(&src).await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_store_missing_and_escaping() {
        let temp_dir = tempdir().unwrap();
        let store = FsObjectStore::new(temp_dir.path());

        assert!(matches!(
            store.get_object(&ObjectRef::new("a", "missing")).await,
            Err(AdapterError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            store.get_object(&ObjectRef::new("a", "../../etc/passwd")).await,
            Err(AdapterError::InvalidInput { .. })
        ));
        assert!(matches!(
            store.put_object(&ObjectRef::new("..", "x"), vec![]).await,
            Err(AdapterError::InvalidInput { .. })
        ));
    }
}
