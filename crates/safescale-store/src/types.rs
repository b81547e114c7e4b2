//! Abstract resource records shared across the orchestrator.
//!
//! These are provider-neutral value types: the stack fills them from driver
//! responses, the metadata catalog persists them as JSON, and the cluster
//! controller references them by ID. They deliberately hold no handles back
//! into the provider: cyclic references are broken by storing IDs only.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::Record;

/// Lifecycle states of a host as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum HostState {
    Starting,
    Started,
    Stopping,
    Stopped,
    Error,
    #[default]
    Unknown,
    Terminated,
}

impl HostState {
    /// Whether the state is a polling terminus (the host settled).
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Started | Self::Stopped | Self::Error | Self::Terminated)
    }
}

/// The immutable core of a host record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostCore {
    /// Provider-assigned host ID.
    pub id: String,
    /// Host name, unique per tenant.
    pub name: String,
    /// PEM-encoded private key granting operator access.
    pub private_key: String,
    /// Operator password.
    pub password: String,
    /// Last state observed from the provider.
    pub last_state: HostState,
}

/// Creation and update timestamps of a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostDescription {
    /// When the host was created.
    pub created: Option<DateTime<Utc>>,
    /// When the host was last updated.
    pub updated: Option<DateTime<Utc>>,
}

/// The effective sizing of a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSizing {
    /// Number of virtual cores.
    pub cores: u32,
    /// RAM in gigabytes.
    pub ram_gb: f64,
    /// Root disk in gigabytes.
    pub disk_gb: u32,
}

/// The network attachments of a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostNetwork {
    /// ID of the default network of the host.
    pub default_network_id: String,
    /// Public IPv4 address, if any.
    pub public_ipv4: String,
    /// Public IPv6 address, if any.
    pub public_ipv6: String,
    /// Network names keyed by network ID.
    pub networks_by_id: HashMap<String, String>,
    /// Network IDs keyed by network name.
    pub networks_by_name: HashMap<String, String>,
    /// IPv4 address per attached network, keyed by network ID.
    pub ipv4_addresses: HashMap<String, String>,
    /// IPv6 address per attached network, keyed by network ID.
    pub ipv6_addresses: HashMap<String, String>,
    /// Whether the host routes between its network and the outside.
    pub is_gateway: bool,
}

/// A provisioned host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Identity and credentials.
    pub core: HostCore,
    /// Timestamps.
    pub description: HostDescription,
    /// Effective sizing.
    pub sizing: HostSizing,
    /// Network attachments.
    pub network: HostNetwork,
}

impl Host {
    /// The private IP of the host on its default network.
    #[must_use]
    pub fn private_ip(&self) -> Option<&str> {
        self.network
            .ipv4_addresses
            .get(&self.network.default_network_id)
            .map(String::as_str)
    }

    /// The address other machines should use to reach the host.
    #[must_use]
    pub fn accessible_ip(&self) -> Option<&str> {
        if self.network.public_ipv4.is_empty() {
            self.private_ip()
        } else {
            Some(&self.network.public_ipv4)
        }
    }
}

impl Record for Host {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn name(&self) -> &str {
        &self.core.name
    }
}

/// A provider network (one subnet, one CIDR).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// Provider-assigned network ID.
    pub id: String,
    /// Network name, unique per tenant.
    pub name: String,
    /// Address range of the network.
    pub cidr: String,
    /// ID of the primary gateway host, when one exists.
    pub gateway_id: String,
    /// ID of the secondary gateway host, when one exists.
    pub secondary_gateway_id: String,
    /// DNS servers pushed to hosts on this network.
    pub dns_servers: Vec<String>,
}

impl Record for Network {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A virtual IP shared between the gateways of a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualIp {
    /// Provider-assigned VIP ID.
    pub id: String,
    /// VIP name.
    pub name: String,
    /// ID of the network carrying the VIP.
    pub network_id: String,
    /// The address itself.
    pub private_ip: String,
    /// Host IDs bound to the VIP.
    pub hosts: Vec<String>,
}

/// Direction of a security group rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum RuleDirection {
    #[default]
    Ingress,
    Egress,
}

/// One rule of a security group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    /// Provider-assigned rule ID.
    pub id: String,
    /// Free-form description.
    pub description: String,
    /// Traffic direction the rule applies to.
    pub direction: RuleDirection,
    /// IP protocol (`tcp`, `udp`, `icmp`, or empty for all).
    pub protocol: String,
    /// First port of the range.
    pub port_from: u16,
    /// Last port of the range.
    pub port_to: u16,
    /// Source (ingress) or destination (egress) CIDRs.
    pub cidrs: Vec<String>,
}

/// A binding between a security group and a host or network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupBond {
    /// ID of the bound resource.
    pub id: String,
    /// Name of the bound resource.
    pub name: String,
    /// Whether the binding is currently disabled.
    pub disabled: bool,
    /// Whether the host binding was inherited from a network binding.
    ///
    /// Such bindings can only be detached at the network level.
    pub from_network: bool,
}

/// The hosts bound to a security group, indexed both ways.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupHosts {
    /// Bonds keyed by host ID.
    pub by_id: HashMap<String, SecurityGroupBond>,
    /// Host IDs keyed by host name.
    pub by_name: HashMap<String, String>,
}

/// The networks bound to a security group, indexed both ways.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupNetworks {
    /// Bonds keyed by network ID.
    pub by_id: HashMap<String, SecurityGroupBond>,
    /// Network IDs keyed by network name.
    pub by_name: HashMap<String, String>,
}

/// A security group with its authoritative rule list and bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    /// Provider-assigned security group ID.
    pub id: String,
    /// Security group name, unique per tenant.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// The authoritative rules.
    pub rules: Vec<SecurityGroupRule>,
    /// Hosts directly bound to the group.
    pub hosts: SecurityGroupHosts,
    /// Networks bound to the group.
    pub networks: SecurityGroupNetworks,
}

impl Record for SecurityGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A block storage volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Provider-assigned volume ID.
    pub id: String,
    /// Volume name, unique per tenant.
    pub name: String,
    /// Size in gigabytes.
    pub size_gb: u32,
    /// Performance class (`cold`, `hdd`, `ssd`).
    pub speed: String,
}

impl Record for Volume {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An SSH key pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Provider-assigned key pair ID.
    pub id: String,
    /// Key pair name.
    pub name: String,
    /// Public half, OpenSSH format.
    pub public_key: String,
    /// Private half, PEM format. Never sent to the provider.
    pub private_key: String,
}

/// A bootable image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Provider-assigned image ID.
    pub id: String,
    /// Image name.
    pub name: String,
    /// Smallest disk the image boots from, in gigabytes.
    pub min_disk_gb: u32,
}

/// A host sizing template offered by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostTemplate {
    /// Provider-assigned template ID.
    pub id: String,
    /// Template name.
    pub name: String,
    /// Number of virtual cores.
    pub cores: u32,
    /// RAM in gigabytes.
    pub ram_gb: f64,
    /// Root disk in gigabytes.
    pub disk_gb: u32,
    /// Number of GPUs, annotated by the façade for known GPU flavors.
    pub gpus: u32,
}

/// A request to create a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRequest {
    /// Name of the host to create.
    pub resource_name: String,
    /// Networks to attach, in order; the first is the default network.
    pub networks: Vec<String>,
    /// Whether the host needs a public IP.
    pub public_ip: bool,
    /// Template to size the host from.
    pub template_id: String,
    /// Image to boot from.
    pub image_id: String,
    /// Key pair to install; generated when absent.
    pub key_pair: Option<KeyPair>,
    /// Operator password; generated when absent.
    pub password: Option<String>,
    /// Explicit disk size request in gigabytes.
    pub disk_gb: Option<u32>,
    /// Whether the host is a gateway for its default network.
    pub is_gateway: bool,
}

/// A request to create a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequest {
    /// Name of the network to create.
    pub name: String,
    /// Address range of the network.
    pub cidr: String,
    /// DNS servers pushed to hosts.
    pub dns_servers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessible_ip_prefers_public() {
        let mut host = Host::default();
        host.network.default_network_id = "net-1".into();
        host.network
            .ipv4_addresses
            .insert("net-1".into(), "192.168.0.4".into());
        assert_eq!(host.accessible_ip(), Some("192.168.0.4"));

        host.network.public_ipv4 = "203.0.113.10".into();
        assert_eq!(host.accessible_ip(), Some("203.0.113.10"));
    }

    #[test]
    fn host_state_settling() {
        assert!(HostState::Started.is_settled());
        assert!(HostState::Error.is_settled());
        assert!(!HostState::Starting.is_settled());
        assert!(!HostState::Stopping.is_settled());
    }

    #[test]
    fn host_record_round_trips_as_json() {
        let mut host = Host::default();
        host.core.id = "h-1".into();
        host.core.name = "gw".into();
        host.network.is_gateway = true;
        let raw = serde_json::to_vec(&host).unwrap();
        let back: Host = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back, host);
    }
}
