//! Cluster controller for SafeScale.
//!
//! A cluster is a fleet of hosts (gateways, masters, private nodes) on
//! one network, with durable bookkeeping in the metadata catalog. The
//! [`Controller`] owns identity, versioned properties, the state machine
//! and the concurrency discipline; a flavor-specific [`Foreman`] owns the
//! construction and configuration steps.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod controller;
pub mod flavor;
pub mod foreman;
pub mod identity;
pub mod metadata;
pub mod properties;
pub mod state;

pub use controller::{ClusterRecord, Controller, NodeDefinition, NodeKind};
pub use flavor::{Complexity, Flavor};
pub use foreman::{BohForeman, ClusterRequest, Foreman};
pub use identity::Identity;
pub use state::ClusterState;
