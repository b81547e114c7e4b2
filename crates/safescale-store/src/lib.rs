//! Object-storage-backed metadata catalog for SafeScale.
//!
//! This crate provides persistent state for the orchestrator:
//!
//! - **Abstract resource records**: hosts, networks, security groups,
//!   volumes, key pairs, images and templates, shared by the provider
//!   stack and the higher layers
//! - **Object storage adapter**: the narrow put/get/list/delete contract a
//!   driver-specific backend must satisfy, plus an in-memory reference
//!   implementation
//! - **Metadata items**: typed, versioned JSON records persisted twice
//!   (`byID/<id>` and `byName/<name>`) so lookups are O(1) either way
//! - **Versioned properties**: a tag-to-record bundle with lazy schema
//!   migration on read
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use safescale_store::{MemoryStorage, MetadataItem, types::Network};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> safescale_core::Result<()> {
//! let storage = Arc::new(MemoryStorage::new());
//! let mut item: MetadataItem<Network> =
//!     MetadataItem::new(storage, "0.safescale-test", "networks");
//!
//! let net = Network {
//!     id: "net-1".into(),
//!     name: "cluster-net".into(),
//!     cidr: "10.0.0.0/16".into(),
//!     ..Network::default()
//! };
//! item.carry(net);
//! item.write().await?;
//!
//! let loaded = item.read_by_reference("cluster-net").await?;
//! assert_eq!(loaded.id, "net-1");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bucket;
pub mod item;
pub mod props;
pub mod storage;
pub mod types;

pub use bucket::build_metadata_bucket_name;
pub use item::{MetadataItem, Record, BY_ID_FOLDER, BY_NAME_FOLDER};
pub use props::{Property, PropertyBag};
pub use storage::{MemoryStorage, ObjectStorage};
