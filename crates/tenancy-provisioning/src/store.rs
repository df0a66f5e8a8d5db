//! Provisioning state stores
//!
//! Every sub-provisioner tracks what it created per tenant through a
//! [`RecordStore`], so tracking can outlive the process when backed by
//! [`FileRecordStore`].

use crate::{tenant::validate_tenant_id, ProvisionError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Keyed storage of provisioning records
#[async_trait]
pub trait RecordStore<R>: Send + Sync
where
    R: Clone + Send + Sync + 'static,
{
    /// Get the record for a tenant
    async fn get(&self, tenant_id: &str) -> Result<Option<R>>;

    /// Insert or replace the record for a tenant
    async fn put(&self, tenant_id: &str, record: R) -> Result<()>;

    /// Remove the record for a tenant. Missing records are not an error.
    async fn delete(&self, tenant_id: &str) -> Result<()>;

    /// All records
    async fn list(&self) -> Result<Vec<(String, R)>>;
}

/// In-memory record store
#[derive(Debug)]
pub struct InMemoryRecordStore<R> {
    records: Arc<RwLock<HashMap<String, R>>>,
}

impl<R> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<R> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> RecordStore<R> for InMemoryRecordStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn get(&self, tenant_id: &str) -> Result<Option<R>> {
        Ok(self.records.read().get(tenant_id).cloned())
    }

    async fn put(&self, tenant_id: &str, record: R) -> Result<()> {
        self.records.write().insert(tenant_id.to_string(), record);
        Ok(())
    }

    async fn delete(&self, tenant_id: &str) -> Result<()> {
        self.records.write().remove(tenant_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, R)>> {
        Ok(self
            .records
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect())
    }
}

/// Durable record store keeping one JSON document per tenant
pub struct FileRecordStore<R> {
    dir: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R> FileRecordStore<R> {
    /// Create a store rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _record: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, tenant_id: &str) -> Result<PathBuf> {
        validate_tenant_id(tenant_id)?;
        Ok(self.dir.join(format!("{}.json", tenant_id)))
    }
}

#[async_trait]
impl<R> RecordStore<R> for FileRecordStore<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, tenant_id: &str) -> Result<Option<R>> {
        let path = self.record_path(tenant_id)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProvisionError::io(path, e)),
        }
    }

    async fn put(&self, tenant_id: &str, record: R) -> Result<()> {
        let path = self.record_path(tenant_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ProvisionError::io(&self.dir, e))?;

        // Write to a unique temp file first, then swap it in.
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", tenant_id, Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec_pretty(&record)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| ProvisionError::io(&tmp, e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ProvisionError::io(path, e));
        }

        debug!(tenant_id = %tenant_id, path = %path.display(), "Persisted provisioning record");
        Ok(())
    }

    async fn delete(&self, tenant_id: &str) -> Result<()> {
        let path = self.record_path(tenant_id)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProvisionError::io(path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<(String, R)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ProvisionError::io(&self.dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProvisionError::io(&self.dir, e))?
        {
            let path = entry.path();
            let Some(tenant_id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .filter(|n| !n.starts_with('.'))
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };

            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| ProvisionError::io(&path, e))?;
            records.push((tenant_id.to_string(), serde_json::from_slice(&bytes)?));
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        path: String,
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryRecordStore::<Sample>::new();
        assert!(store.get("acme").await.unwrap().is_none());

        store
            .put("acme", Sample { path: "a".into() })
            .await
            .unwrap();
        assert_eq!(store.get("acme").await.unwrap().unwrap().path, "a");
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.delete("acme").await.unwrap();
        store.delete("acme").await.unwrap();
        assert!(store.get("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("database");

        let store = FileRecordStore::<Sample>::new(&dir);
        store
            .put("acme", Sample { path: "x".into() })
            .await
            .unwrap();

        let reopened = FileRecordStore::<Sample>::new(&dir);
        assert_eq!(
            reopened.get("acme").await.unwrap(),
            Some(Sample { path: "x".into() })
        );

        let listed = reopened.list().await.unwrap();
        assert_eq!(listed, vec![("acme".to_string(), Sample { path: "x".into() })]);

        reopened.delete("acme").await.unwrap();
        assert!(store.get("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_unsafe_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRecordStore::<Sample>::new(tmp.path());

        let result = store.put("../escape", Sample { path: "x".into() }).await;
        assert!(matches!(result, Err(ProvisionError::InvalidTenantId(_))));
    }

    #[tokio::test]
    async fn test_file_store_list_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileRecordStore::<Sample>::new(tmp.path().join("missing"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
