//! Cluster identity.

use safescale_store::types::KeyPair;
use serde::{Deserialize, Serialize};

use crate::flavor::{Complexity, Flavor};

/// The identity of a cluster, fixed at creation.
///
/// Only the administrator password may change afterwards (rotation).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique cluster ID.
    pub id: String,
    /// Cluster name, unique per tenant.
    pub name: String,
    /// Topology flavor.
    pub flavor: Flavor,
    /// Capacity tier.
    pub complexity: Complexity,
    /// Administrator password of the cluster.
    pub admin_password: String,
    /// Key pair installed on every host of the cluster.
    pub keypair: KeyPair,
}
