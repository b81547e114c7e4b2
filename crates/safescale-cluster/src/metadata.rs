//! Cluster metadata persistence.

use std::sync::Arc;

use safescale_core::Result;
use safescale_store::{MetadataItem, ObjectStorage};

use crate::controller::ClusterRecord;

/// Folder of cluster records in the metadata bucket.
pub const CLUSTERS_FOLDER: &str = "clusters";

/// Create the metadata item clusters are persisted through.
#[must_use]
pub fn cluster_item(
    storage: Arc<dyn ObjectStorage>,
    bucket: &str,
) -> MetadataItem<ClusterRecord> {
    MetadataItem::new(storage, bucket, CLUSTERS_FOLDER)
}

/// Iterate every cluster record of the tenant.
///
/// # Errors
///
/// Surfaces storage and decoding failures, and the callback's error.
pub async fn browse_clusters(
    storage: Arc<dyn ObjectStorage>,
    bucket: &str,
    callback: impl FnMut(ClusterRecord) -> Result<()>,
) -> Result<()> {
    cluster_item(storage, bucket).browse(callback).await
}
