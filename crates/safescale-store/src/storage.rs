//! The object storage adapter contract.
//!
//! Object storage is the single durable store of the orchestrator. The
//! contract is deliberately narrow (opaque blobs in a per-tenant bucket)
//! and every operation is idempotent at the network level so the retry
//! engine can wrap it safely. Driver-specific backends (Swift, S3, GCS)
//! implement this trait out of tree; [`MemoryStorage`] is the in-tree
//! reference used by tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use safescale_core::{Error, Result};

/// Put/get/list/delete of opaque blobs in named buckets.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` under `key`, creating the bucket if needed and
    /// overwriting any previous content.
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()>;

    /// Fetch the content stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// List the keys under `prefix`, in lexicographic order.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Delete the object stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key does not exist.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// In-memory object storage used by tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of objects across all buckets.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.buckets.read().values().map(BTreeMap::len).sum()
    }

    /// Whether an object exists, without going through the async contract.
    #[must_use]
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .read()
            .get(bucket)
            .is_some_and(|b| b.contains_key(key))
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("object '{key}' not found in '{bucket}'")))
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .buckets
            .read()
            .get(bucket)
            .map(|b| {
                b.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.buckets
            .write()
            .get_mut(bucket)
            .and_then(|b| b.remove(key))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("object '{key}' not found in '{bucket}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let storage = MemoryStorage::new();
        storage
            .put_object("bucket", "hosts/byID/h-1", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(
            storage.get_object("bucket", "hosts/byID/h-1").await.unwrap(),
            b"{}".to_vec()
        );
        storage.delete_object("bucket", "hosts/byID/h-1").await.unwrap();
        assert!(storage.get_object("bucket", "hosts/byID/h-1").await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_in_order() {
        let storage = MemoryStorage::new();
        for key in ["a/2", "a/1", "b/1"] {
            storage.put_object("bucket", key, vec![]).await.unwrap();
        }
        let keys = storage.list_objects("bucket", "a/").await.unwrap();
        assert_eq!(keys, vec!["a/1", "a/2"]);
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.put_object("b", "k", vec![1]).await.unwrap();
        storage.put_object("b", "k", vec![2]).await.unwrap();
        assert_eq!(storage.get_object("b", "k").await.unwrap(), vec![2]);
        assert_eq!(storage.object_count(), 1);
    }
}
