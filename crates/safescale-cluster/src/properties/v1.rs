//! First-generation property records, kept for migration.

use std::collections::{HashMap, HashSet};

use safescale_store::Property;
use serde::{Deserialize, Serialize};

use crate::state::ClusterState;

/// Host sizing, v1 shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizingV1 {
    /// Number of cores.
    pub cores: u32,
    /// CPU frequency in GHz.
    pub cpu_freq: f64,
    /// Number of GPUs.
    pub gpu_number: u32,
    /// RAM in gigabytes.
    pub ram_size: f64,
    /// Disk in gigabytes.
    pub disk_size: u32,
    /// Whether the host may be replaced by a cheaper preemptible one.
    pub replaceable: bool,
}

/// Default image and sizings of the cluster, v1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultsV1 {
    /// Default boot image.
    pub image: String,
    /// Default master sizing.
    pub master_sizing: SizingV1,
    /// Default node sizing.
    pub node_sizing: SizingV1,
}

impl Property for DefaultsV1 {
    const TAG: &'static str = "defaults.v1";
}

/// Persisted cluster state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateV1 {
    /// Last collected state.
    pub state: ClusterState,
    /// How long a collected state stays fresh, in seconds.
    pub state_collect_interval_secs: u64,
}

impl Default for StateV1 {
    fn default() -> Self {
        Self {
            state: ClusterState::Creating,
            state_collect_interval_secs: 60,
        }
    }
}

impl Property for StateV1 {
    const TAG: &'static str = "state.v1";
}

/// Features installed on (or disabled for) the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturesV1 {
    /// Installed features and the action context they came from.
    pub installed: HashMap<String, String>,
    /// Features the cluster refuses to install.
    pub disabled: HashSet<String>,
}

impl Property for FeaturesV1 {
    const TAG: &'static str = "features.v1";
}

/// Network configuration, v1 shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkV1 {
    /// ID of the cluster network.
    pub network_id: String,
    /// Address range of the network.
    pub cidr: String,
    /// ID of the gateway host.
    pub gateway_id: String,
    /// Private IP of the gateway.
    pub gateway_ip: String,
    /// Public IP of the cluster.
    pub public_ip: String,
}

impl Property for NetworkV1 {
    const TAG: &'static str = "network.v1";
}
