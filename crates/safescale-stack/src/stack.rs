//! The low-level provider contract.
//!
//! A driver implements [`Stack`]; every call must return errors from the
//! closed taxonomy only, and `create_*` operations fail with `Duplicate`
//! on an already-existing resource; callers decide whether to adopt or
//! bail. Operations that poll (host state convergence) surface `Timeout`
//! when the budget runs out and treat a host in `ERROR` as a terminal
//! abort.

use std::time::Duration;

use async_trait::async_trait;
use safescale_core::{Error, Result};
use safescale_store::types::{
    Host, HostRequest, HostState, HostTemplate, Image, KeyPair, Network, NetworkRequest,
    SecurityGroup, SecurityGroupRule, VirtualIp,
};

/// A request to create a gateway host on a network.
#[derive(Debug, Clone, Default)]
pub struct GatewayRequest {
    /// Name of the gateway host.
    pub name: String,
    /// The network the gateway routes for.
    pub network: Network,
    /// Template to size the gateway from.
    pub template_id: String,
    /// Image to boot from.
    pub image_id: String,
    /// Key pair to install; generated when absent.
    pub key_pair: Option<KeyPair>,
}

/// The uniform low-level API a driver must provide.
#[async_trait]
pub trait Stack: Send + Sync {
    // =========================================================================
    // Locality
    // =========================================================================

    /// List the regions the tenant can reach.
    async fn list_regions(&self) -> Result<Vec<String>>;

    /// List the availability zones of the configured region.
    async fn list_availability_zones(&self) -> Result<Vec<String>>;

    /// The availability zone hosts are created in.
    async fn selected_availability_zone(&self) -> Result<String>;

    // =========================================================================
    // Images and templates
    // =========================================================================

    /// List the bootable images.
    async fn list_images(&self) -> Result<Vec<Image>>;

    /// Get an image by ID.
    async fn get_image(&self, id: &str) -> Result<Image>;

    /// List the host sizing templates.
    async fn list_templates(&self) -> Result<Vec<HostTemplate>>;

    /// Get a template by ID.
    async fn get_template(&self, id: &str) -> Result<HostTemplate>;

    // =========================================================================
    // Key pairs
    // =========================================================================

    /// Create a key pair, letting the provider generate the material.
    async fn create_key_pair(&self, name: &str) -> Result<KeyPair>;

    /// Get a key pair by ID.
    async fn get_key_pair(&self, id: &str) -> Result<KeyPair>;

    /// List the key pairs.
    async fn list_key_pairs(&self) -> Result<Vec<KeyPair>>;

    /// Delete a key pair.
    async fn delete_key_pair(&self, id: &str) -> Result<()>;

    /// Import a key pair whose material was generated locally.
    async fn import_key_pair(&self, key_pair: &KeyPair) -> Result<()>;

    // =========================================================================
    // Networks
    // =========================================================================

    /// Create a network with one subnet.
    async fn create_network(&self, request: NetworkRequest) -> Result<Network>;

    /// Get a network by ID.
    async fn get_network(&self, id: &str) -> Result<Network>;

    /// Get a network by name.
    async fn get_network_by_name(&self, name: &str) -> Result<Network>;

    /// List the networks.
    async fn list_networks(&self) -> Result<Vec<Network>>;

    /// Delete a network.
    async fn delete_network(&self, id: &str) -> Result<()>;

    /// Create the gateway host of a network.
    async fn create_gateway(&self, request: GatewayRequest) -> Result<Host>;

    /// Delete a gateway host.
    async fn delete_gateway(&self, id: &str) -> Result<()>;

    /// Create a virtual IP on a network.
    async fn create_vip(&self, network_id: &str, name: &str) -> Result<VirtualIp>;

    /// List VPCs. Left unimplemented by the reference driver.
    async fn list_vpcs(&self) -> Result<Vec<Network>> {
        Err(Error::not_implemented("list_vpcs not implemented"))
    }

    /// Delete a VPC. Left unimplemented by the reference driver.
    async fn delete_vpc(&self, _id: &str) -> Result<()> {
        Err(Error::not_implemented("delete_vpc not implemented"))
    }

    // =========================================================================
    // Hosts
    // =========================================================================

    /// Create a host and wait for it to start.
    async fn create_host(&self, request: HostRequest) -> Result<Host>;

    /// Inspect a host by ID, refreshing its state and addresses.
    async fn inspect_host(&self, id: &str) -> Result<Host>;

    /// Get a host by name.
    async fn get_host_by_name(&self, name: &str) -> Result<Host>;

    /// List the hosts.
    async fn list_hosts(&self) -> Result<Vec<Host>>;

    /// Delete a host.
    async fn delete_host(&self, id: &str) -> Result<()>;

    /// Start a stopped host.
    async fn start_host(&self, id: &str) -> Result<()>;

    /// Stop a started host.
    async fn stop_host(&self, id: &str) -> Result<()>;

    /// Reboot a host.
    async fn reboot_host(&self, id: &str) -> Result<()>;

    /// The current state of a host.
    async fn get_host_state(&self, id: &str) -> Result<HostState>;

    /// Poll a host until it settles in `state`.
    ///
    /// `STARTING`/`STOPPING` keep the poll going; `ERROR` aborts with
    /// `Execution`; running out of `timeout` surfaces `Timeout`.
    async fn wait_host_state(&self, id: &str, state: HostState, timeout: Duration) -> Result<()>;

    // =========================================================================
    // Security groups
    // =========================================================================

    /// Create a security group with an initial rule set.
    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        rules: &[SecurityGroupRule],
    ) -> Result<SecurityGroup>;

    /// Inspect a security group by ID or name.
    async fn inspect_security_group(&self, reference: &str) -> Result<SecurityGroup>;

    /// Delete a security group.
    async fn delete_security_group(&self, id: &str) -> Result<()>;

    /// Add a rule; returns the provider's canonical rule list.
    async fn add_rule_to_security_group(
        &self,
        id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<Vec<SecurityGroupRule>>;

    /// Delete a rule; returns the provider's canonical rule list.
    async fn delete_rule_from_security_group(
        &self,
        id: &str,
        rule_id: &str,
    ) -> Result<Vec<SecurityGroupRule>>;

    /// Remove every rule of a security group.
    async fn clear_security_group(&self, id: &str) -> Result<()>;

    /// Bind a security group to a host.
    async fn bind_security_group_to_host(&self, sg_id: &str, host_id: &str) -> Result<()>;

    /// Unbind a security group from a host.
    async fn unbind_security_group_from_host(&self, sg_id: &str, host_id: &str) -> Result<()>;
}
