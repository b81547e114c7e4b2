//! Metadata items: typed records persisted under two index paths.
//!
//! Every metadata record is written twice, under `<folder>/byID/<id>` and
//! `<folder>/byName/<name>`, so lookups are O(1) either way. Both paths
//! must be kept in sync: `write` writes byID first then byName, and
//! `delete` sweeps both. Partial-write recovery is best effort: the next
//! `write` overwrites, the next `delete` sweeps.
//!
//! An item carries a [`TaskedLock`] so multi-step sequences
//! (reload, modify, write) can hold it across steps via
//! [`MetadataItem::acquire`] / [`MetadataItem::release`].

use std::sync::Arc;

use safescale_core::{Error, ErrorKind, Result};
use safescale_task::{Task, TaskedLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::storage::ObjectStorage;

/// Index folder for lookups by provider ID.
pub const BY_ID_FOLDER: &str = "byID";
/// Index folder for lookups by resource name.
pub const BY_NAME_FOLDER: &str = "byName";

/// A record persistable as a metadata item.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The provider-assigned ID the record is indexed under.
    fn id(&self) -> &str;
    /// The name the record is indexed under.
    fn name(&self) -> &str;
}

/// A typed metadata record bound to its two index paths.
pub struct MetadataItem<T: Record> {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    folder: String,
    lock: TaskedLock,
    payload: Option<T>,
    written: bool,
}

impl<T: Record> MetadataItem<T> {
    /// Create an unbound item over `folder` in `bucket`.
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStorage>, bucket: &str, folder: &str) -> Self {
        Self {
            storage,
            bucket: bucket.to_string(),
            folder: folder.to_string(),
            lock: TaskedLock::new(),
            payload: None,
            written: false,
        }
    }

    fn key(&self, index: &str, reference: &str) -> String {
        format!("{}/{index}/{reference}", self.folder)
    }

    /// Bind `record` to this item.
    pub fn carry(&mut self, record: T) -> &mut Self {
        self.payload = Some(record);
        self
    }

    /// The record currently carried, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Whether the carried record has been observed in storage.
    #[must_use]
    pub const fn written(&self) -> bool {
        self.written
    }

    /// Write the carried record under both index paths.
    ///
    /// byID is written first; on failure the caller must not assume either
    /// path was written.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when no record is carried, or the storage
    /// failure.
    pub async fn write(&mut self) -> Result<()> {
        let record = self
            .payload
            .as_ref()
            .ok_or_else(|| Error::invalid_request("no record carried by the metadata item"))?;
        let encoded = serde_json::to_vec(record)
            .map_err(|e| Error::syntax(format!("failed to encode metadata: {e}")))?;

        let id_key = self.key(BY_ID_FOLDER, record.id());
        let name_key = self.key(BY_NAME_FOLDER, record.name());
        self.storage
            .put_object(&self.bucket, &id_key, encoded.clone())
            .await?;
        self.storage
            .put_object(&self.bucket, &name_key, encoded)
            .await?;
        self.written = true;
        Ok(())
    }

    async fn read_from(&mut self, index: &str, reference: &str) -> Result<T> {
        let key = self.key(index, reference);
        let raw = self.storage.get_object(&self.bucket, &key).await?;
        let record: T = serde_json::from_slice(&raw)
            .map_err(|e| Error::syntax(format!("failed to decode metadata '{key}': {e}")))?;
        self.payload = Some(record.clone());
        self.written = true;
        Ok(record)
    }

    /// Read the record indexed under `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no record exists under that ID.
    pub async fn read_by_id(&mut self, id: &str) -> Result<T> {
        self.read_from(BY_ID_FOLDER, id).await
    }

    /// Read the record indexed under `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no record exists under that name.
    pub async fn read_by_name(&mut self, name: &str) -> Result<T> {
        self.read_from(BY_NAME_FOLDER, name).await
    }

    /// Read the record referenced either by ID or by name.
    ///
    /// Tries byID first, then byName.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` only when both lookups miss; any other failure
    /// surfaces as-is.
    pub async fn read_by_reference(&mut self, reference: &str) -> Result<T> {
        let by_id = self.read_from(BY_ID_FOLDER, reference).await;
        let id_err = match by_id {
            Ok(record) => return Ok(record),
            Err(err) => err,
        };
        let by_name = self.read_from(BY_NAME_FOLDER, reference).await;
        match by_name {
            Ok(record) => Ok(record),
            Err(name_err) => {
                if id_err.kind() == ErrorKind::NotFound && name_err.kind() == ErrorKind::NotFound {
                    Err(Error::not_found(format!("reference '{reference}' not found"))
                        .with_consequence(id_err)
                        .with_consequence(name_err))
                } else {
                    Err(Error::list(vec![id_err, name_err]).unwrap_or_else(|| {
                        Error::inconsistent("metadata read failed without error")
                    }))
                }
            }
        }
    }

    /// Reload the carried record from storage.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when no record is carried, `NotFound` when
    /// the record vanished from storage.
    pub async fn reload(&mut self) -> Result<T> {
        let id = self
            .payload
            .as_ref()
            .map(|r| r.id().to_string())
            .ok_or_else(|| Error::invalid_request("no record carried by the metadata item"))?;
        self.read_by_id(&id).await
    }

    /// Iterate every record under the byID index, in key order.
    ///
    /// The callback may return an error to abort the iteration.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures, decode failures, and the callback's error.
    pub async fn browse(&self, mut callback: impl FnMut(T) -> Result<()>) -> Result<()> {
        let prefix = format!("{}/{BY_ID_FOLDER}/", self.folder);
        let keys = self.storage.list_objects(&self.bucket, &prefix).await?;
        for key in keys {
            let raw = self.storage.get_object(&self.bucket, &key).await?;
            let record: T = serde_json::from_slice(&raw)
                .map_err(|e| Error::syntax(format!("failed to decode metadata '{key}': {e}")))?;
            callback(record)?;
        }
        Ok(())
    }

    /// Delete both index paths of the carried record.
    ///
    /// A missing path is swept silently so a partial previous write still
    /// cleans up.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when no record is carried, or the first
    /// non-`NotFound` storage failure.
    pub async fn delete(&mut self) -> Result<()> {
        let (id, name) = match self.payload.as_ref() {
            Some(record) => (record.id().to_string(), record.name().to_string()),
            None => {
                return Err(Error::invalid_request(
                    "no record carried by the metadata item",
                ))
            }
        };
        for key in [self.key(BY_ID_FOLDER, &id), self.key(BY_NAME_FOLDER, &name)] {
            match self.storage.delete_object(&self.bucket, &key).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(key, "metadata path already absent during delete");
                }
                Err(err) => return Err(err),
            }
        }
        self.payload = None;
        self.written = false;
        Ok(())
    }

    /// Take the item's lock for a reload-modify-write sequence.
    pub async fn acquire(&self, task: &Task) {
        self.lock.lock(task).await;
    }

    /// Release the lock taken with [`MetadataItem::acquire`].
    ///
    /// # Errors
    ///
    /// Returns `Inconsistent` if `task` does not hold the lock.
    pub fn release(&self, task: &Task) -> Result<()> {
        self.lock.unlock(task)
    }
}
