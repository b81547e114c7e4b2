//! The OpenStack-family reference driver.
//!
//! Talks to Keystone (tokens), Nova (servers, flavors, key pairs,
//! availability zones) and Neutron (networks, subnets, ports, floating
//! IPs, security groups) over REST. Every call goes through the retry
//! envelope of [`rpc::RpcClient::call`] and surfaces only normalized
//! errors.

mod rpc;

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Method;
use safescale_core::{Error, ErrorKind, Result, Timeouts};
use safescale_store::types::{
    Host, HostRequest, HostState, HostTemplate, Image, KeyPair, Network, NetworkRequest,
    SecurityGroup, SecurityGroupRule, VirtualIp,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::stack::{GatewayRequest, Stack};
use crate::userdata;

use rpc::{
    RpcClient, WireFlavor, WireImage, WireKeyPair, WireNetwork, WireSecurityGroup,
    WireSecurityGroupRule, WireServer, WireSubnet,
};

/// How often host state is polled during convergence waits.
const STATE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration of the OpenStack-family driver.
#[derive(Debug, Clone, Default)]
pub struct OpenStackConfig {
    /// Keystone v3 endpoint, e.g. `https://auth.cloud.example/v3`.
    pub auth_url: String,
    /// Nova endpoint for the project.
    pub compute_url: String,
    /// Neutron endpoint, up to and including `/v2.0`.
    pub network_url: String,
    /// Authentication user.
    pub username: String,
    /// Authentication password.
    pub password: String,
    /// Authentication domain.
    pub domain_name: String,
    /// Project scope.
    pub project_id: String,
    /// Region the endpoints belong to.
    pub region: String,
    /// Availability zone hosts are created in; first zone when empty.
    pub availability_zone: String,
    /// Name of the provider network carrying public addresses.
    pub provider_network: String,
    /// Whether public addresses are floating IPs associated after boot.
    pub use_floating_ip: bool,
    /// Operator account created on hosts.
    pub operator_username: String,
    /// Operation timeouts.
    pub timeouts: Timeouts,
}

/// The OpenStack-family implementation of [`Stack`].
pub struct OpenStackStack {
    rpc: RpcClient,
}

fn to_host_state(status: &str) -> HostState {
    match status.to_ascii_uppercase().as_str() {
        "BUILD" | "BUILDING" | "REBOOT" | "HARD_REBOOT" | "REBUILD" => HostState::Starting,
        "ACTIVE" => HostState::Started,
        "SHUTOFF" | "PAUSED" | "SUSPENDED" => HostState::Stopped,
        "STOPPING" | "SHUTTING-DOWN" => HostState::Stopping,
        "ERROR" => HostState::Error,
        "DELETED" | "SOFT_DELETED" => HostState::Terminated,
        _ => HostState::Unknown,
    }
}

/// Default disk size, in GB, derived from the core count.
const fn disk_from_cores(cores: u32) -> u32 {
    if cores < 16 {
        100
    } else if cores < 32 {
        200
    } else {
        400
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

impl OpenStackStack {
    /// Create a driver over the given endpoints.
    ///
    /// # Errors
    ///
    /// Returns `Execution` if the HTTP client cannot be built.
    pub fn new(config: OpenStackConfig) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(config)?,
        })
    }

    fn config(&self) -> &OpenStackConfig {
        self.rpc.config()
    }

    async fn get_server(&self, id: &str) -> Result<WireServer> {
        let url = self.rpc.compute_url(&format!("servers/{id}"));
        let raw = self.rpc.call(Method::GET, url, None).await?;
        RpcClient::decode(&raw, "/server")
    }

    /// Fill a host's network properties from a server's address map.
    ///
    /// Addresses are keyed by network *name*: the provider-public network
    /// maps to the public addresses, every other network resolves to its
    /// ID and lands in the per-network address maps.
    async fn complement_host(&self, host: &mut Host, server: &WireServer) -> Result<()> {
        host.core.id = server.id.clone();
        host.core.name = server.name.clone();
        host.core.last_state = to_host_state(&server.status);

        for (network_name, entries) in &server.addresses {
            let entries: Vec<rpc::WireAddress> = serde_json::from_value(entries.clone())
                .map_err(|e| Error::syntax(format!("malformed address list: {e}")))?;
            if *network_name == self.config().provider_network {
                for entry in entries {
                    match entry.version {
                        4 => host.network.public_ipv4 = entry.addr,
                        6 => host.network.public_ipv6 = entry.addr,
                        _ => {}
                    }
                }
                continue;
            }
            let network = self.get_network_by_name(network_name).await?;
            host.network
                .networks_by_id
                .insert(network.id.clone(), network.name.clone());
            host.network
                .networks_by_name
                .insert(network.name.clone(), network.id.clone());
            for entry in entries {
                match entry.version {
                    4 => {
                        host.network
                            .ipv4_addresses
                            .insert(network.id.clone(), entry.addr);
                    }
                    6 => {
                        host.network
                            .ipv6_addresses
                            .insert(network.id.clone(), entry.addr);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    async fn network_from_wire(&self, wire: WireNetwork) -> Result<Network> {
        let cidr = match wire.subnets.first() {
            Some(subnet_id) => {
                let url = self.rpc.network_url(&format!("subnets/{subnet_id}"));
                let raw = self.rpc.call(Method::GET, url, None).await?;
                let subnet: WireSubnet = RpcClient::decode(&raw, "/subnet")?;
                subnet.cidr
            }
            None => String::new(),
        };
        Ok(Network {
            id: wire.id,
            name: wire.name,
            cidr,
            ..Network::default()
        })
    }

    fn sg_from_wire(wire: WireSecurityGroup) -> SecurityGroup {
        SecurityGroup {
            id: wire.id,
            name: wire.name,
            description: wire.description,
            rules: wire
                .security_group_rules
                .into_iter()
                .map(Self::rule_from_wire)
                .collect(),
            ..SecurityGroup::default()
        }
    }

    fn rule_from_wire(wire: WireSecurityGroupRule) -> SecurityGroupRule {
        SecurityGroupRule {
            id: wire.id,
            description: wire.description.unwrap_or_default(),
            direction: if wire.direction == "egress" {
                safescale_store::types::RuleDirection::Egress
            } else {
                safescale_store::types::RuleDirection::Ingress
            },
            protocol: wire.protocol.unwrap_or_default(),
            port_from: wire.port_range_min.unwrap_or(0),
            port_to: wire.port_range_max.unwrap_or(0),
            cidrs: wire.remote_ip_prefix.into_iter().collect(),
        }
    }

    async fn allocate_floating_ip(&self) -> Result<(String, String)> {
        let public = self
            .get_network_by_name(&self.config().provider_network)
            .await?;
        let url = self.rpc.network_url("floatingips");
        let body = json!({ "floatingip": { "floating_network_id": public.id } });
        let raw = self.rpc.call(Method::POST, url, Some(body)).await?;
        let id: String = RpcClient::decode(&raw, "/floatingip/id")?;
        let address: String = RpcClient::decode(&raw, "/floatingip/floating_ip_address")?;
        Ok((id, address))
    }

    async fn release_floating_ip(&self, id: &str) -> Result<()> {
        let url = self.rpc.network_url(&format!("floatingips/{id}"));
        self.rpc.call(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn associate_floating_ip(&self, server_id: &str, address: &str) -> Result<()> {
        let url = self.rpc.compute_url(&format!("servers/{server_id}/action"));
        let body = json!({ "addFloatingIp": { "address": address } });
        self.rpc.call(Method::POST, url, Some(body)).await?;
        Ok(())
    }

    async fn server_action(&self, id: &str, action: Value) -> Result<()> {
        let url = self.rpc.compute_url(&format!("servers/{id}/action"));
        self.rpc.call(Method::POST, url, Some(action)).await?;
        Ok(())
    }

    /// Best-effort teardown of a half-created host; failures come back so
    /// the caller can attach them as consequences.
    async fn scrub_failed_host(&self, id: &str, floating_ip: Option<&str>) -> Option<Error> {
        let mut failures = Vec::new();
        if let Some(fip) = floating_ip {
            if let Err(err) = self.release_floating_ip(fip).await {
                failures.push(err);
            }
        }
        if let Err(err) = self.delete_host(id).await {
            if err.kind() != ErrorKind::NotFound {
                failures.push(err);
            }
        }
        Error::list(failures)
    }
}

#[async_trait]
impl Stack for OpenStackStack {
    // =========================================================================
    // Locality
    // =========================================================================

    async fn list_regions(&self) -> Result<Vec<String>> {
        let url = format!("{}/regions", self.config().auth_url);
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let regions: Vec<Value> = RpcClient::decode(&raw, "/regions")?;
        Ok(regions
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str).map(ToString::to_string))
            .collect())
    }

    async fn list_availability_zones(&self) -> Result<Vec<String>> {
        let url = self.rpc.compute_url("os-availability-zone");
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let zones: Vec<Value> = RpcClient::decode(&raw, "/availabilityZoneInfo")?;
        Ok(zones
            .iter()
            .filter_map(|z| {
                z.get("zoneName")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .collect())
    }

    async fn selected_availability_zone(&self) -> Result<String> {
        if !self.config().availability_zone.is_empty() {
            return Ok(self.config().availability_zone.clone());
        }
        let zones = self.list_availability_zones().await?;
        zones
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_available("no availability zone exposed by the provider"))
    }

    // =========================================================================
    // Images and templates
    // =========================================================================

    async fn list_images(&self) -> Result<Vec<Image>> {
        let url = self.rpc.compute_url("images/detail");
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let images: Vec<WireImage> = RpcClient::decode(&raw, "/images")?;
        Ok(images
            .into_iter()
            .map(|i| Image {
                id: i.id,
                name: i.name,
                min_disk_gb: i.min_disk,
            })
            .collect())
    }

    async fn get_image(&self, id: &str) -> Result<Image> {
        let url = self.rpc.compute_url(&format!("images/{id}"));
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let image: WireImage = RpcClient::decode(&raw, "/image")?;
        Ok(Image {
            id: image.id,
            name: image.name,
            min_disk_gb: image.min_disk,
        })
    }

    async fn list_templates(&self) -> Result<Vec<HostTemplate>> {
        let url = self.rpc.compute_url("flavors/detail");
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let flavors: Vec<WireFlavor> = RpcClient::decode(&raw, "/flavors")?;
        Ok(flavors
            .into_iter()
            .map(|f| HostTemplate {
                id: f.id,
                name: f.name,
                cores: f.vcpus,
                ram_gb: f.ram as f64 / 1024.0,
                disk_gb: f.disk,
                gpus: 0,
            })
            .collect())
    }

    async fn get_template(&self, id: &str) -> Result<HostTemplate> {
        let url = self.rpc.compute_url(&format!("flavors/{id}"));
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let flavor: WireFlavor = RpcClient::decode(&raw, "/flavor")?;
        Ok(HostTemplate {
            id: flavor.id,
            name: flavor.name,
            cores: flavor.vcpus,
            ram_gb: flavor.ram as f64 / 1024.0,
            disk_gb: flavor.disk,
            gpus: 0,
        })
    }

    // =========================================================================
    // Key pairs
    // =========================================================================

    async fn create_key_pair(&self, name: &str) -> Result<KeyPair> {
        let url = self.rpc.compute_url("os-keypairs");
        let body = json!({ "keypair": { "name": name } });
        let raw = self.rpc.call(Method::POST, url, Some(body)).await?;
        let wire: WireKeyPair = RpcClient::decode(&raw, "/keypair")?;
        Ok(KeyPair {
            id: wire.name.clone(),
            name: wire.name,
            public_key: wire.public_key,
            private_key: wire.private_key,
        })
    }

    async fn get_key_pair(&self, id: &str) -> Result<KeyPair> {
        let url = self.rpc.compute_url(&format!("os-keypairs/{id}"));
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let wire: WireKeyPair = RpcClient::decode(&raw, "/keypair")?;
        Ok(KeyPair {
            id: wire.name.clone(),
            name: wire.name,
            public_key: wire.public_key,
            private_key: String::new(),
        })
    }

    async fn list_key_pairs(&self) -> Result<Vec<KeyPair>> {
        let url = self.rpc.compute_url("os-keypairs");
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let entries: Vec<Value> = RpcClient::decode(&raw, "/keypairs")?;
        let mut result = Vec::with_capacity(entries.len());
        for entry in entries {
            let wire: WireKeyPair = serde_json::from_value(
                entry.get("keypair").cloned().unwrap_or(entry),
            )
            .map_err(|e| Error::syntax(format!("malformed keypair entry: {e}")))?;
            result.push(KeyPair {
                id: wire.name.clone(),
                name: wire.name,
                public_key: wire.public_key,
                private_key: String::new(),
            });
        }
        Ok(result)
    }

    async fn delete_key_pair(&self, id: &str) -> Result<()> {
        let url = self.rpc.compute_url(&format!("os-keypairs/{id}"));
        self.rpc.call(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn import_key_pair(&self, key_pair: &KeyPair) -> Result<()> {
        let url = self.rpc.compute_url("os-keypairs");
        let body = json!({
            "keypair": {
                "name": key_pair.name,
                "public_key": key_pair.public_key,
            }
        });
        self.rpc.call(Method::POST, url, Some(body)).await?;
        Ok(())
    }

    // =========================================================================
    // Networks
    // =========================================================================

    async fn create_network(&self, request: NetworkRequest) -> Result<Network> {
        if request.name.is_empty() {
            return Err(Error::invalid_parameter("request.name cannot be empty"));
        }
        if request.cidr.is_empty() {
            return Err(Error::invalid_parameter("request.cidr cannot be empty"));
        }
        // Provider-side uniqueness: create fails with Duplicate if a network
        // with this name already exists.
        if self.get_network_by_name(&request.name).await.is_ok() {
            return Err(Error::duplicate(format!(
                "network '{}' already exists",
                request.name
            )));
        }

        let url = self.rpc.network_url("networks");
        let body = json!({ "network": { "name": request.name } });
        let raw = self.rpc.call(Method::POST, url, Some(body)).await?;
        let wire: WireNetwork = RpcClient::decode(&raw, "/network")?;

        let subnet_url = self.rpc.network_url("subnets");
        let subnet_body = json!({
            "subnet": {
                "network_id": wire.id,
                "name": format!("{}-subnet", request.name),
                "cidr": request.cidr,
                "ip_version": 4,
                "dns_nameservers": request.dns_servers,
            }
        });
        if let Err(err) = self.rpc.call(Method::POST, subnet_url, Some(subnet_body)).await {
            let cleanup = self.delete_network(&wire.id).await.err();
            return Err(err.with_consequence_opt(cleanup));
        }

        info!(network = %request.name, cidr = %request.cidr, "network created");
        Ok(Network {
            id: wire.id,
            name: wire.name,
            cidr: request.cidr,
            dns_servers: request.dns_servers,
            ..Network::default()
        })
    }

    async fn get_network(&self, id: &str) -> Result<Network> {
        let url = self.rpc.network_url(&format!("networks/{id}"));
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let wire: WireNetwork = RpcClient::decode(&raw, "/network")?;
        self.network_from_wire(wire).await
    }

    async fn get_network_by_name(&self, name: &str) -> Result<Network> {
        let url = self.rpc.network_url(&format!("networks?name={name}"));
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let wires: Vec<WireNetwork> = RpcClient::decode(&raw, "/networks")?;
        match wires.into_iter().next() {
            Some(wire) => self.network_from_wire(wire).await,
            None => Err(Error::not_found(format!("network '{name}' not found"))),
        }
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        let url = self.rpc.network_url("networks");
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let wires: Vec<WireNetwork> = RpcClient::decode(&raw, "/networks")?;
        let mut networks = Vec::with_capacity(wires.len());
        for wire in wires {
            networks.push(self.network_from_wire(wire).await?);
        }
        Ok(networks)
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        let url = self.rpc.network_url(&format!("networks/{id}"));
        self.rpc.call(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn create_gateway(&self, request: GatewayRequest) -> Result<Host> {
        let name = if request.name.is_empty() {
            format!("gw-{}", request.network.name)
        } else {
            request.name.clone()
        };
        let host_request = HostRequest {
            resource_name: name,
            networks: vec![request.network.id.clone()],
            public_ip: true,
            template_id: request.template_id,
            image_id: request.image_id,
            key_pair: request.key_pair,
            is_gateway: true,
            ..HostRequest::default()
        };
        let mut host = self.create_host(host_request).await?;
        host.network.is_gateway = true;
        host.network.default_network_id = request.network.id;
        Ok(host)
    }

    async fn delete_gateway(&self, id: &str) -> Result<()> {
        self.delete_host(id).await
    }

    async fn create_vip(&self, network_id: &str, name: &str) -> Result<VirtualIp> {
        let url = self.rpc.network_url("ports");
        let body = json!({ "port": { "network_id": network_id, "name": name } });
        let raw = self.rpc.call(Method::POST, url, Some(body)).await?;
        let id: String = RpcClient::decode(&raw, "/port/id")?;
        let fixed_ips: Vec<Value> = RpcClient::decode(&raw, "/port/fixed_ips")?;
        let private_ip = fixed_ips
            .first()
            .and_then(|f| f.get("ip_address"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(VirtualIp {
            id,
            name: name.to_string(),
            network_id: network_id.to_string(),
            private_ip,
            hosts: Vec::new(),
        })
    }

    // =========================================================================
    // Hosts
    // =========================================================================

    async fn create_host(&self, mut request: HostRequest) -> Result<Host> {
        if request.networks.is_empty() && !request.public_ip {
            return Err(Error::invalid_request(
                "the host must be attached to at least one network, or request a public IP",
            ));
        }
        if request.resource_name.is_empty() {
            return Err(Error::invalid_parameter(
                "request.resource_name cannot be empty",
            ));
        }

        let template = self.get_template(&request.template_id).await?;
        let image = self.get_image(&request.image_id).await?;
        let zone = self.selected_availability_zone().await?;

        let default_network = request.networks.first().cloned().unwrap_or_default();

        // Compose the network attachments; with floating IPs in play and a
        // public IP requested, the provider-public network joins the list.
        let mut attachments: Vec<String> = request.networks.clone();
        if self.config().use_floating_ip && request.public_ip {
            let public = self
                .get_network_by_name(&self.config().provider_network)
                .await?;
            attachments.push(public.id);
        }

        if request.key_pair.is_none() {
            let kp = self
                .create_key_pair(&format!("kp-{}", request.resource_name))
                .await?;
            request.key_pair = Some(kp);
        }
        if request.password.is_none() {
            request.password = Some(generate_password());
        }

        let cidr = if default_network.is_empty() {
            String::new()
        } else {
            self.get_network(&default_network).await?.cidr
        };
        let payload = userdata::phase1(&self.config().operator_username, &request, &cidr)?;

        let disk_gb = template
            .disk_gb
            .max(request.disk_gb.unwrap_or(0))
            .max(image.min_disk_gb)
            .max(disk_from_cores(template.cores));

        let networks: Vec<Value> = attachments.iter().map(|id| json!({ "uuid": id })).collect();
        let body = json!({
            "server": {
                "name": request.resource_name,
                "flavorRef": template.id,
                "imageRef": image.id,
                "availability_zone": zone,
                "key_name": request.key_pair.as_ref().map(|kp| kp.name.clone()),
                "networks": networks,
                "user_data": BASE64.encode(payload),
                "block_device_mapping_v2": [{
                    "boot_index": 0,
                    "source_type": "image",
                    "destination_type": "local",
                    "uuid": image.id,
                    "volume_size": disk_gb,
                }],
            }
        });
        let url = self.rpc.compute_url("servers");
        let raw = self.rpc.call(Method::POST, url, Some(body)).await?;
        let server_id: String = RpcClient::decode(&raw, "/server/id")?;
        debug!(host = %request.resource_name, server_id, "server submitted");

        // From here on, any failure tears the server down and reports the
        // cleanup outcome as a consequence of the primary failure.
        if let Err(err) = self
            .wait_host_state(&server_id, HostState::Started, self.config().timeouts.host)
            .await
        {
            let cleanup = self.scrub_failed_host(&server_id, None).await;
            return Err(err.with_consequence_opt(cleanup));
        }

        let mut floating_ip = None;
        if self.config().use_floating_ip && request.public_ip {
            let allocated = match self.allocate_floating_ip().await {
                Ok(pair) => pair,
                Err(err) => {
                    let cleanup = self.scrub_failed_host(&server_id, None).await;
                    return Err(err.with_consequence_opt(cleanup));
                }
            };
            if let Err(err) = self.associate_floating_ip(&server_id, &allocated.1).await {
                let cleanup = self.scrub_failed_host(&server_id, Some(&allocated.0)).await;
                return Err(err.with_consequence_opt(cleanup));
            }
            floating_ip = Some(allocated);
        }

        let server = match self.get_server(&server_id).await {
            Ok(server) => server,
            Err(err) => {
                let fip = floating_ip.as_ref().map(|(id, _)| id.as_str());
                let cleanup = self.scrub_failed_host(&server_id, fip).await;
                return Err(err.with_consequence_opt(cleanup));
            }
        };

        let mut host = Host::default();
        host.core.password = request.password.clone().unwrap_or_default();
        host.core.private_key = request
            .key_pair
            .as_ref()
            .map(|kp| kp.private_key.clone())
            .unwrap_or_default();
        host.description.created = Some(chrono::Utc::now());
        host.sizing.cores = template.cores;
        host.sizing.ram_gb = template.ram_gb;
        host.sizing.disk_gb = disk_gb;
        host.network.default_network_id = default_network;
        host.network.is_gateway = request.is_gateway;
        if let Err(err) = self.complement_host(&mut host, &server).await {
            let fip = floating_ip.as_ref().map(|(id, _)| id.as_str());
            let cleanup = self.scrub_failed_host(&server_id, fip).await;
            return Err(err.with_consequence_opt(cleanup));
        }
        if let Some((_, address)) = floating_ip {
            host.network.public_ipv4 = address;
        }

        info!(host = %host.core.name, id = %host.core.id, "host created");
        Ok(host)
    }

    async fn inspect_host(&self, id: &str) -> Result<Host> {
        let server = self.get_server(id).await?;
        let mut host = Host::default();
        self.complement_host(&mut host, &server).await?;
        Ok(host)
    }

    async fn get_host_by_name(&self, name: &str) -> Result<Host> {
        let url = self.rpc.compute_url(&format!("servers?name={name}"));
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let servers: Vec<Value> = RpcClient::decode(&raw, "/servers")?;
        let id = servers
            .iter()
            .find(|s| s.get("name").and_then(Value::as_str) == Some(name))
            .and_then(|s| s.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::not_found(format!("host '{name}' not found")))?;
        self.inspect_host(id).await
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let url = self.rpc.compute_url("servers/detail");
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let servers: Vec<WireServer> = RpcClient::decode(&raw, "/servers")?;
        let mut hosts = Vec::with_capacity(servers.len());
        for server in servers {
            let mut host = Host::default();
            self.complement_host(&mut host, &server).await?;
            hosts.push(host);
        }
        Ok(hosts)
    }

    async fn delete_host(&self, id: &str) -> Result<()> {
        let url = self.rpc.compute_url(&format!("servers/{id}"));
        self.rpc.call(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn start_host(&self, id: &str) -> Result<()> {
        self.server_action(id, json!({ "os-start": null })).await
    }

    async fn stop_host(&self, id: &str) -> Result<()> {
        self.server_action(id, json!({ "os-stop": null })).await
    }

    async fn reboot_host(&self, id: &str) -> Result<()> {
        self.server_action(id, json!({ "reboot": { "type": "SOFT" } }))
            .await
    }

    async fn get_host_state(&self, id: &str) -> Result<HostState> {
        let server = self.get_server(id).await?;
        Ok(to_host_state(&server.status))
    }

    async fn wait_host_state(&self, id: &str, state: HostState, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let last = loop {
            let current = self.get_host_state(id).await?;
            if current == state {
                return Ok(());
            }
            if current == HostState::Error {
                return Err(Error::execution(format!(
                    "host '{id}' entered ERROR state while waiting for {state:?}"
                )));
            }
            if tokio::time::Instant::now() + STATE_POLL_INTERVAL >= deadline {
                break current;
            }
            tokio::time::sleep(STATE_POLL_INTERVAL).await;
        };
        Err(Error::timeout(format!(
            "host '{id}' did not reach {state:?} within {timeout:?} (last state: {last:?})"
        )))
    }

    // =========================================================================
    // Security groups
    // =========================================================================

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        rules: &[SecurityGroupRule],
    ) -> Result<SecurityGroup> {
        let url = self.rpc.network_url("security-groups");
        let body = json!({
            "security_group": { "name": name, "description": description }
        });
        let raw = self.rpc.call(Method::POST, url, Some(body)).await?;
        let wire: WireSecurityGroup = RpcClient::decode(&raw, "/security_group")?;
        let mut sg = Self::sg_from_wire(wire);

        for rule in rules {
            match self.add_rule_to_security_group(&sg.id, rule).await {
                Ok(canonical) => sg.rules = canonical,
                Err(err) => {
                    let cleanup = self.delete_security_group(&sg.id).await.err();
                    return Err(err.with_consequence_opt(cleanup));
                }
            }
        }
        Ok(sg)
    }

    async fn inspect_security_group(&self, reference: &str) -> Result<SecurityGroup> {
        // Try by ID first, then by name, the same way metadata lookups do.
        let url = self.rpc.network_url(&format!("security-groups/{reference}"));
        match self.rpc.call(Method::GET, url, None).await {
            Ok(raw) => {
                let wire: WireSecurityGroup = RpcClient::decode(&raw, "/security_group")?;
                return Ok(Self::sg_from_wire(wire));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let url = self
            .rpc
            .network_url(&format!("security-groups?name={reference}"));
        let raw = self.rpc.call(Method::GET, url, None).await?;
        let wires: Vec<WireSecurityGroup> = RpcClient::decode(&raw, "/security_groups")?;
        wires
            .into_iter()
            .next()
            .map(Self::sg_from_wire)
            .ok_or_else(|| Error::not_found(format!("security group '{reference}' not found")))
    }

    async fn delete_security_group(&self, id: &str) -> Result<()> {
        let url = self.rpc.network_url(&format!("security-groups/{id}"));
        self.rpc.call(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn add_rule_to_security_group(
        &self,
        id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<Vec<SecurityGroupRule>> {
        let url = self.rpc.network_url("security-group-rules");
        let direction = match rule.direction {
            safescale_store::types::RuleDirection::Ingress => "ingress",
            safescale_store::types::RuleDirection::Egress => "egress",
        };
        for cidr in if rule.cidrs.is_empty() {
            vec![String::new()]
        } else {
            rule.cidrs.clone()
        } {
            let mut entry = json!({
                "security_group_id": id,
                "direction": direction,
                "ethertype": "IPv4",
            });
            if !rule.protocol.is_empty() {
                entry["protocol"] = json!(rule.protocol);
                entry["port_range_min"] = json!(rule.port_from);
                entry["port_range_max"] = json!(rule.port_to);
            }
            if !cidr.is_empty() {
                entry["remote_ip_prefix"] = json!(cidr);
            }
            self.rpc
                .call(
                    Method::POST,
                    url.clone(),
                    Some(json!({ "security_group_rule": entry })),
                )
                .await?;
        }
        Ok(self.inspect_security_group(id).await?.rules)
    }

    async fn delete_rule_from_security_group(
        &self,
        id: &str,
        rule_id: &str,
    ) -> Result<Vec<SecurityGroupRule>> {
        let url = self
            .rpc
            .network_url(&format!("security-group-rules/{rule_id}"));
        self.rpc.call(Method::DELETE, url, None).await?;
        Ok(self.inspect_security_group(id).await?.rules)
    }

    async fn clear_security_group(&self, id: &str) -> Result<()> {
        let sg = self.inspect_security_group(id).await?;
        for rule in sg.rules {
            let url = self
                .rpc
                .network_url(&format!("security-group-rules/{}", rule.id));
            match self.rpc.call(Method::DELETE, url, None).await {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    warn!(rule = %rule.id, "rule vanished while clearing security group");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn bind_security_group_to_host(&self, sg_id: &str, host_id: &str) -> Result<()> {
        let sg = self.inspect_security_group(sg_id).await?;
        self.server_action(host_id, json!({ "addSecurityGroup": { "name": sg.name } }))
            .await
    }

    async fn unbind_security_group_from_host(&self, sg_id: &str, host_id: &str) -> Result<()> {
        let sg = self.inspect_security_group(sg_id).await?;
        self.server_action(
            host_id,
            json!({ "removeSecurityGroup": { "name": sg.name } }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_size_table() {
        assert_eq!(disk_from_cores(1), 100);
        assert_eq!(disk_from_cores(15), 100);
        assert_eq!(disk_from_cores(16), 200);
        assert_eq!(disk_from_cores(31), 200);
        assert_eq!(disk_from_cores(32), 400);
        assert_eq!(disk_from_cores(128), 400);
    }

    #[test]
    fn server_status_mapping() {
        assert_eq!(to_host_state("ACTIVE"), HostState::Started);
        assert_eq!(to_host_state("BUILD"), HostState::Starting);
        assert_eq!(to_host_state("SHUTOFF"), HostState::Stopped);
        assert_eq!(to_host_state("ERROR"), HostState::Error);
        assert_eq!(to_host_state("weird"), HostState::Unknown);
    }

    #[test]
    fn generated_passwords_are_16_alphanumeric_chars() {
        let password = generate_password();
        assert_eq!(password.len(), 16);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate_password());
    }
}
