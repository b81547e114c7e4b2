//! Cluster flavors and capacity tiers.

use std::fmt;
use std::str::FromStr;

use safescale_core::Error;
use serde::{Deserialize, Serialize};

/// The kind of cluster topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Flavor {
    /// "Bunch of hosts": provisioning only, no workload manager.
    #[default]
    Boh,
    K8s,
    Swarm,
    Dcos,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Boh => "boh",
            Self::K8s => "k8s",
            Self::Swarm => "swarm",
            Self::Dcos => "dcos",
        })
    }
}

impl FromStr for Flavor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boh" => Ok(Self::Boh),
            "k8s" => Ok(Self::K8s),
            "swarm" => Ok(Self::Swarm),
            "dcos" => Ok(Self::Dcos),
            other => Err(Error::invalid_parameter(format!(
                "unknown cluster flavor '{other}'"
            ))),
        }
    }
}

/// The capacity tier of a cluster, mapping to default counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Complexity {
    #[default]
    Small,
    Normal,
    Large,
}

impl Complexity {
    /// Default `(masters, nodes)` counts of the tier.
    #[must_use]
    pub const fn default_counts(self) -> (u32, u32) {
        match self {
            Self::Small => (1, 1),
            Self::Normal => (3, 3),
            Self::Large => (5, 6),
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Small => "small",
            Self::Normal => "normal",
            Self::Large => "large",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flavor_round_trips_through_strings() {
        for flavor in [Flavor::Boh, Flavor::K8s, Flavor::Swarm, Flavor::Dcos] {
            assert_eq!(flavor.to_string().parse::<Flavor>().unwrap(), flavor);
        }
        assert!("mesos".parse::<Flavor>().is_err());
    }

    #[test]
    fn complexity_counts_grow() {
        assert_eq!(Complexity::Small.default_counts(), (1, 1));
        assert_eq!(Complexity::Normal.default_counts(), (3, 3));
        assert_eq!(Complexity::Large.default_counts(), (5, 6));
    }
}
