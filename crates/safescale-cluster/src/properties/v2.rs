//! Current-generation property records.

use safescale_store::Property;
use serde::{Deserialize, Serialize};

/// Minimal host sizing requirements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizingRequirements {
    /// Minimum number of cores.
    pub min_cores: u32,
    /// Minimum CPU frequency in GHz.
    pub min_cpu_freq: f64,
    /// Minimum number of GPUs.
    pub min_gpu: u32,
    /// Minimum RAM in gigabytes.
    pub min_ram_size: f64,
    /// Minimum disk in gigabytes.
    pub min_disk_size: u32,
    /// Whether the host may be replaced by a cheaper preemptible one.
    pub replaceable: bool,
}

/// Default image, sizings and templates of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultsV2 {
    /// Default boot image.
    pub image: String,
    /// Default master sizing requirements.
    pub master_sizing: SizingRequirements,
    /// Default node sizing requirements.
    pub node_sizing: SizingRequirements,
    /// Template the masters were sized from.
    pub master_template: String,
    /// Template the nodes were sized from.
    pub node_template: String,
    /// Template the gateways were sized from.
    pub gateway_template: String,
}

impl Property for DefaultsV2 {
    const TAG: &'static str = "defaults.v2";
}

/// Network configuration of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkV2 {
    /// ID of the cluster network.
    pub network_id: String,
    /// Address range of the network.
    pub cidr: String,
    /// ID of the primary gateway host.
    pub gateway_id: String,
    /// Private IP of the primary gateway.
    pub gateway_ip: String,
    /// ID of the secondary gateway host, when the network has two.
    pub secondary_gateway_id: String,
    /// Private IP of the secondary gateway.
    pub secondary_gateway_ip: String,
    /// IP the hosts route their default traffic through.
    pub default_route_ip: String,
    /// IP the outside world reaches the cluster at.
    pub endpoint_ip: String,
}

impl Property for NetworkV2 {
    const TAG: &'static str = "network.v2";
}

/// One member host of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Monotonic per-cluster integer, basis of the host name.
    pub numerical_id: u32,
    /// Provider host ID.
    pub id: String,
    /// Host name.
    pub name: String,
    /// Private IP on the cluster network.
    pub private_ip: String,
    /// Public IP, when the host has one.
    pub public_ip: String,
}

/// The member lists of the cluster.
///
/// Insertion order is the removal-order basis for "delete last node".
/// `last_numerical_id` only ever grows: numerical IDs are never reused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodesV2 {
    /// Master hosts, in creation order.
    pub masters: Vec<Node>,
    /// Private worker hosts, in creation order.
    pub private_nodes: Vec<Node>,
    /// Highest numerical ID ever issued in the cluster.
    pub last_numerical_id: u32,
}

impl NodesV2 {
    /// Issue the next numerical ID. Must be called under the cluster's
    /// write lock.
    pub fn allocate_numerical_id(&mut self) -> u32 {
        self.last_numerical_id += 1;
        self.last_numerical_id
    }

    /// Find a node by host ID in `list`, returning its index.
    #[must_use]
    pub fn position(list: &[Node], host_id: &str) -> Option<usize> {
        list.iter().position(|n| n.id == host_id)
    }
}

impl Property for NodesV2 {
    const TAG: &'static str = "nodes.v2";
}
