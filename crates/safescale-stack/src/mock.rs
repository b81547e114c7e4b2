//! An in-memory provider with scriptable failures.
//!
//! [`MockStack`] implements the full [`Stack`] contract against maps held
//! in memory, and lets tests inject a failure at the n-th call of any
//! operation. It backs the stack, security group and cluster test suites.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use safescale_core::{Error, Result};
use safescale_store::types::{
    Host, HostRequest, HostState, HostTemplate, Image, KeyPair, Network, NetworkRequest,
    SecurityGroup, SecurityGroupRule, VirtualIp,
};

use crate::stack::{GatewayRequest, Stack};

#[derive(Default)]
struct MockState {
    hosts: HashMap<String, Host>,
    networks: HashMap<String, Network>,
    keypairs: HashMap<String, KeyPair>,
    security_groups: HashMap<String, SecurityGroup>,
    sg_binds: HashMap<String, HashSet<String>>,
    images: Vec<Image>,
    templates: Vec<HostTemplate>,
    next_id: u64,
    call_counts: HashMap<String, u32>,
    failures: HashMap<String, Vec<(u32, Error)>>,
}

/// An in-memory [`Stack`] for tests.
#[derive(Default)]
pub struct MockStack {
    state: Mutex<MockState>,
}

impl MockStack {
    /// Create a mock provider with one image and a few templates.
    #[must_use]
    pub fn new() -> Self {
        let stack = Self::default();
        {
            let mut st = stack.state.lock();
            st.images.push(Image {
                id: "img-1".into(),
                name: "Ubuntu 20.04".into(),
                min_disk_gb: 10,
            });
            st.templates.push(HostTemplate {
                id: "tpl-small".into(),
                name: "s1-4".into(),
                cores: 4,
                ram_gb: 8.0,
                disk_gb: 50,
                gpus: 0,
            });
            st.templates.push(HostTemplate {
                id: "tpl-large".into(),
                name: "c2-32".into(),
                cores: 32,
                ram_gb: 128.0,
                disk_gb: 200,
                gpus: 0,
            });
        }
        stack
    }

    /// Make the `nth` call (1-based) of `operation` fail with `error`.
    pub fn fail_on(&self, operation: &str, nth: u32, error: Error) {
        self.state
            .lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push((nth, error));
    }

    /// Count a call and pop a scripted failure if one matches.
    fn begin(&self, operation: &str) -> Result<()> {
        let mut st = self.state.lock();
        let count = st.call_counts.entry(operation.to_string()).or_insert(0);
        *count += 1;
        let nth = *count;
        if let Some(failures) = st.failures.get_mut(operation) {
            if let Some(pos) = failures.iter().position(|(at, _)| *at == nth) {
                let (_, err) = failures.remove(pos);
                return Err(err);
            }
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut st = self.state.lock();
        st.next_id += 1;
        format!("{prefix}-{}", st.next_id)
    }

    /// How many times `operation` has been called.
    #[must_use]
    pub fn calls(&self, operation: &str) -> u32 {
        self.state
            .lock()
            .call_counts
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// The number of hosts currently provisioned.
    #[must_use]
    pub fn host_count(&self) -> usize {
        self.state.lock().hosts.len()
    }

    /// Whether a host with this ID exists.
    #[must_use]
    pub fn has_host(&self, id: &str) -> bool {
        self.state.lock().hosts.contains_key(id)
    }

    /// The number of networks currently provisioned.
    #[must_use]
    pub fn network_count(&self) -> usize {
        self.state.lock().networks.len()
    }

    /// The host IDs a security group is bound to.
    #[must_use]
    pub fn bound_hosts(&self, sg_id: &str) -> Vec<String> {
        self.state
            .lock()
            .sg_binds
            .get(sg_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Force a host into a state, for convergence tests.
    pub fn set_host_state(&self, id: &str, state: HostState) {
        if let Some(host) = self.state.lock().hosts.get_mut(id) {
            host.core.last_state = state;
        }
    }

    /// Attach an existing host to an existing network, for binding tests.
    pub fn attach_host_to_network(&self, host_id: &str, network_id: &str) {
        let mut st = self.state.lock();
        let name = st.networks.get(network_id).map(|n| n.name.clone());
        if let (Some(host), Some(name)) = (st.hosts.get_mut(host_id), name) {
            host.network
                .networks_by_id
                .insert(network_id.to_string(), name.clone());
            host.network
                .networks_by_name
                .insert(name, network_id.to_string());
        }
    }
}

#[async_trait]
impl Stack for MockStack {
    async fn list_regions(&self) -> Result<Vec<String>> {
        self.begin("list_regions")?;
        Ok(vec!["mock-1".into()])
    }

    async fn list_availability_zones(&self) -> Result<Vec<String>> {
        self.begin("list_availability_zones")?;
        Ok(vec!["mock-az-1".into(), "mock-az-2".into()])
    }

    async fn selected_availability_zone(&self) -> Result<String> {
        self.begin("selected_availability_zone")?;
        Ok("mock-az-1".into())
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        self.begin("list_images")?;
        Ok(self.state.lock().images.clone())
    }

    async fn get_image(&self, id: &str) -> Result<Image> {
        self.begin("get_image")?;
        self.state
            .lock()
            .images
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("image '{id}' not found")))
    }

    async fn list_templates(&self) -> Result<Vec<HostTemplate>> {
        self.begin("list_templates")?;
        Ok(self.state.lock().templates.clone())
    }

    async fn get_template(&self, id: &str) -> Result<HostTemplate> {
        self.begin("get_template")?;
        self.state
            .lock()
            .templates
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("template '{id}' not found")))
    }

    async fn create_key_pair(&self, name: &str) -> Result<KeyPair> {
        self.begin("create_key_pair")?;
        let kp = KeyPair {
            id: name.to_string(),
            name: name.to_string(),
            public_key: format!("ssh-rsa MOCK {name}"),
            private_key: format!("-----BEGIN MOCK KEY {name}-----"),
        };
        let mut st = self.state.lock();
        if st.keypairs.contains_key(name) {
            return Err(Error::duplicate(format!("key pair '{name}' already exists")));
        }
        st.keypairs.insert(name.to_string(), kp.clone());
        Ok(kp)
    }

    async fn get_key_pair(&self, id: &str) -> Result<KeyPair> {
        self.begin("get_key_pair")?;
        self.state
            .lock()
            .keypairs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("key pair '{id}' not found")))
    }

    async fn list_key_pairs(&self) -> Result<Vec<KeyPair>> {
        self.begin("list_key_pairs")?;
        Ok(self.state.lock().keypairs.values().cloned().collect())
    }

    async fn delete_key_pair(&self, id: &str) -> Result<()> {
        self.begin("delete_key_pair")?;
        self.state
            .lock()
            .keypairs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("key pair '{id}' not found")))
    }

    async fn import_key_pair(&self, key_pair: &KeyPair) -> Result<()> {
        self.begin("import_key_pair")?;
        let mut st = self.state.lock();
        if st.keypairs.contains_key(&key_pair.name) {
            return Err(Error::duplicate(format!(
                "key pair '{}' already exists",
                key_pair.name
            )));
        }
        st.keypairs.insert(key_pair.name.clone(), key_pair.clone());
        Ok(())
    }

    async fn create_network(&self, request: NetworkRequest) -> Result<Network> {
        self.begin("create_network")?;
        {
            let st = self.state.lock();
            if st.networks.values().any(|n| n.name == request.name) {
                return Err(Error::duplicate(format!(
                    "network '{}' already exists",
                    request.name
                )));
            }
        }
        let network = Network {
            id: self.next_id("net"),
            name: request.name,
            cidr: request.cidr,
            dns_servers: request.dns_servers,
            ..Network::default()
        };
        self.state
            .lock()
            .networks
            .insert(network.id.clone(), network.clone());
        Ok(network)
    }

    async fn get_network(&self, id: &str) -> Result<Network> {
        self.begin("get_network")?;
        self.state
            .lock()
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("network '{id}' not found")))
    }

    async fn get_network_by_name(&self, name: &str) -> Result<Network> {
        self.begin("get_network_by_name")?;
        self.state
            .lock()
            .networks
            .values()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("network '{name}' not found")))
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        self.begin("list_networks")?;
        Ok(self.state.lock().networks.values().cloned().collect())
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        self.begin("delete_network")?;
        let mut st = self.state.lock();
        let attached = st
            .hosts
            .values()
            .any(|h| h.network.networks_by_id.contains_key(id));
        if attached {
            return Err(Error::not_available(format!(
                "network '{id}' still has hosts attached"
            )));
        }
        st.networks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("network '{id}' not found")))
    }

    async fn create_gateway(&self, request: GatewayRequest) -> Result<Host> {
        self.begin("create_gateway")?;
        let name = if request.name.is_empty() {
            format!("gw-{}", request.network.name)
        } else {
            request.name
        };
        let mut host = self
            .create_host(HostRequest {
                resource_name: name,
                networks: vec![request.network.id.clone()],
                public_ip: true,
                template_id: request.template_id,
                image_id: request.image_id,
                key_pair: request.key_pair,
                is_gateway: true,
                ..HostRequest::default()
            })
            .await?;
        host.network.is_gateway = true;
        if let Some(stored) = self.state.lock().hosts.get_mut(&host.core.id) {
            stored.network.is_gateway = true;
        }
        Ok(host)
    }

    async fn delete_gateway(&self, id: &str) -> Result<()> {
        self.begin("delete_gateway")?;
        self.delete_host(id).await
    }

    async fn create_vip(&self, network_id: &str, name: &str) -> Result<VirtualIp> {
        self.begin("create_vip")?;
        if !self.state.lock().networks.contains_key(network_id) {
            return Err(Error::not_found(format!(
                "network '{network_id}' not found"
            )));
        }
        Ok(VirtualIp {
            id: self.next_id("vip"),
            name: name.to_string(),
            network_id: network_id.to_string(),
            private_ip: "10.0.0.250".into(),
            hosts: Vec::new(),
        })
    }

    async fn create_host(&self, request: HostRequest) -> Result<Host> {
        self.begin("create_host")?;
        if request.networks.is_empty() && !request.public_ip {
            return Err(Error::invalid_request(
                "the host must be attached to at least one network, or request a public IP",
            ));
        }
        let template = self.get_template(&request.template_id).await?;
        {
            let st = self.state.lock();
            if st
                .hosts
                .values()
                .any(|h| h.core.name == request.resource_name)
            {
                return Err(Error::duplicate(format!(
                    "host '{}' already exists",
                    request.resource_name
                )));
            }
        }
        let id = self.next_id("host");
        let suffix = id.rsplit('-').next().unwrap_or("0").to_string();

        let mut host = Host::default();
        host.core.id = id.clone();
        host.core.name = request.resource_name.clone();
        host.core.password = request.password.unwrap_or_else(|| "MockPassw0rd1234".into());
        host.core.last_state = HostState::Started;
        host.description.created = Some(chrono::Utc::now());
        host.sizing.cores = template.cores;
        host.sizing.ram_gb = template.ram_gb;
        host.sizing.disk_gb = template.disk_gb.max(request.disk_gb.unwrap_or(0));
        host.network.is_gateway = request.is_gateway;

        for (index, network_id) in request.networks.iter().enumerate() {
            let network = self.get_network(network_id).await?;
            if index == 0 {
                host.network.default_network_id = network.id.clone();
            }
            host.network
                .networks_by_id
                .insert(network.id.clone(), network.name.clone());
            host.network
                .networks_by_name
                .insert(network.name, network.id.clone());
            host.network
                .ipv4_addresses
                .insert(network.id, format!("10.0.{index}.{suffix}"));
        }
        if request.public_ip {
            host.network.public_ipv4 = format!("203.0.113.{suffix}");
        }
        if let Some(kp) = request.key_pair {
            host.core.private_key = kp.private_key;
        }

        self.state.lock().hosts.insert(id, host.clone());
        Ok(host)
    }

    async fn inspect_host(&self, id: &str) -> Result<Host> {
        self.begin("inspect_host")?;
        self.state
            .lock()
            .hosts
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("host '{id}' not found")))
    }

    async fn get_host_by_name(&self, name: &str) -> Result<Host> {
        self.begin("get_host_by_name")?;
        self.state
            .lock()
            .hosts
            .values()
            .find(|h| h.core.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("host '{name}' not found")))
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        self.begin("list_hosts")?;
        Ok(self.state.lock().hosts.values().cloned().collect())
    }

    async fn delete_host(&self, id: &str) -> Result<()> {
        self.begin("delete_host")?;
        let mut st = self.state.lock();
        for binds in st.sg_binds.values_mut() {
            binds.remove(id);
        }
        st.hosts
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("host '{id}' not found")))
    }

    async fn start_host(&self, id: &str) -> Result<()> {
        self.begin("start_host")?;
        let mut st = self.state.lock();
        let host = st
            .hosts
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("host '{id}' not found")))?;
        host.core.last_state = HostState::Started;
        Ok(())
    }

    async fn stop_host(&self, id: &str) -> Result<()> {
        self.begin("stop_host")?;
        let mut st = self.state.lock();
        let host = st
            .hosts
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("host '{id}' not found")))?;
        host.core.last_state = HostState::Stopped;
        Ok(())
    }

    async fn reboot_host(&self, id: &str) -> Result<()> {
        self.begin("reboot_host")?;
        let mut st = self.state.lock();
        let host = st
            .hosts
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("host '{id}' not found")))?;
        host.core.last_state = HostState::Started;
        Ok(())
    }

    async fn get_host_state(&self, id: &str) -> Result<HostState> {
        self.begin("get_host_state")?;
        self.state
            .lock()
            .hosts
            .get(id)
            .map(|h| h.core.last_state)
            .ok_or_else(|| Error::not_found(format!("host '{id}' not found")))
    }

    async fn wait_host_state(&self, id: &str, state: HostState, _timeout: Duration) -> Result<()> {
        self.begin("wait_host_state")?;
        let current = self
            .state
            .lock()
            .hosts
            .get(id)
            .map(|h| h.core.last_state)
            .ok_or_else(|| Error::not_found(format!("host '{id}' not found")))?;
        if current == state {
            return Ok(());
        }
        if current == HostState::Error {
            return Err(Error::execution(format!(
                "host '{id}' entered ERROR state while waiting for {state:?}"
            )));
        }
        Err(Error::timeout(format!(
            "host '{id}' did not reach {state:?} (last state: {current:?})"
        )))
    }

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        rules: &[SecurityGroupRule],
    ) -> Result<SecurityGroup> {
        self.begin("create_security_group")?;
        {
            let st = self.state.lock();
            if st.security_groups.values().any(|sg| sg.name == name) {
                return Err(Error::duplicate(format!(
                    "security group '{name}' already exists"
                )));
            }
        }
        let mut sg = SecurityGroup {
            id: self.next_id("sg"),
            name: name.to_string(),
            description: description.to_string(),
            ..SecurityGroup::default()
        };
        for (index, rule) in rules.iter().enumerate() {
            let mut canonical = rule.clone();
            canonical.id = format!("{}-rule-{index}", sg.id);
            sg.rules.push(canonical);
        }
        self.state
            .lock()
            .security_groups
            .insert(sg.id.clone(), sg.clone());
        Ok(sg)
    }

    async fn inspect_security_group(&self, reference: &str) -> Result<SecurityGroup> {
        self.begin("inspect_security_group")?;
        let st = self.state.lock();
        st.security_groups
            .get(reference)
            .or_else(|| st.security_groups.values().find(|sg| sg.name == reference))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("security group '{reference}' not found")))
    }

    async fn delete_security_group(&self, id: &str) -> Result<()> {
        self.begin("delete_security_group")?;
        let mut st = self.state.lock();
        if st.sg_binds.get(id).is_some_and(|binds| !binds.is_empty()) {
            return Err(Error::not_available(format!(
                "security group '{id}' is still bound to hosts"
            )));
        }
        st.sg_binds.remove(id);
        st.security_groups
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("security group '{id}' not found")))
    }

    async fn add_rule_to_security_group(
        &self,
        id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<Vec<SecurityGroupRule>> {
        self.begin("add_rule_to_security_group")?;
        let mut st = self.state.lock();
        let sg = st
            .security_groups
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("security group '{id}' not found")))?;
        let mut canonical = rule.clone();
        canonical.id = format!("{id}-rule-{}", sg.rules.len());
        sg.rules.push(canonical);
        Ok(sg.rules.clone())
    }

    async fn delete_rule_from_security_group(
        &self,
        id: &str,
        rule_id: &str,
    ) -> Result<Vec<SecurityGroupRule>> {
        self.begin("delete_rule_from_security_group")?;
        let mut st = self.state.lock();
        let sg = st
            .security_groups
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("security group '{id}' not found")))?;
        let before = sg.rules.len();
        sg.rules.retain(|r| r.id != rule_id);
        if sg.rules.len() == before {
            return Err(Error::not_found(format!("rule '{rule_id}' not found")));
        }
        Ok(sg.rules.clone())
    }

    async fn clear_security_group(&self, id: &str) -> Result<()> {
        self.begin("clear_security_group")?;
        let mut st = self.state.lock();
        let sg = st
            .security_groups
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("security group '{id}' not found")))?;
        sg.rules.clear();
        Ok(())
    }

    async fn bind_security_group_to_host(&self, sg_id: &str, host_id: &str) -> Result<()> {
        self.begin("bind_security_group_to_host")?;
        let mut st = self.state.lock();
        if !st.security_groups.contains_key(sg_id) {
            return Err(Error::not_found(format!(
                "security group '{sg_id}' not found"
            )));
        }
        if !st.hosts.contains_key(host_id) {
            return Err(Error::not_found(format!("host '{host_id}' not found")));
        }
        let binds = st.sg_binds.entry(sg_id.to_string()).or_default();
        if !binds.insert(host_id.to_string()) {
            return Err(Error::duplicate(format!(
                "security group '{sg_id}' already bound to host '{host_id}'"
            )));
        }
        Ok(())
    }

    async fn unbind_security_group_from_host(&self, sg_id: &str, host_id: &str) -> Result<()> {
        self.begin("unbind_security_group_from_host")?;
        let mut st = self.state.lock();
        let removed = st
            .sg_binds
            .get_mut(sg_id)
            .is_some_and(|binds| binds.remove(host_id));
        if removed {
            Ok(())
        } else {
            Err(Error::not_found(format!(
                "security group '{sg_id}' is not bound to host '{host_id}'"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_core::ErrorKind;

    #[tokio::test]
    async fn scripted_failure_hits_the_right_call() {
        let stack = MockStack::new();
        stack.fail_on("list_regions", 2, Error::overload("busy"));
        assert!(stack.list_regions().await.is_ok());
        let err = stack.list_regions().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overload);
        assert!(stack.list_regions().await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_host_names_are_rejected() {
        let stack = MockStack::new();
        let net = stack
            .create_network(NetworkRequest {
                name: "net".into(),
                cidr: "10.0.0.0/24".into(),
                ..NetworkRequest::default()
            })
            .await
            .unwrap();
        let request = HostRequest {
            resource_name: "worker".into(),
            networks: vec![net.id],
            template_id: "tpl-small".into(),
            image_id: "img-1".into(),
            ..HostRequest::default()
        };
        stack.create_host(request.clone()).await.unwrap();
        let err = stack.create_host(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn host_state_transitions() {
        let stack = MockStack::new();
        let net = stack
            .create_network(NetworkRequest {
                name: "net".into(),
                cidr: "10.0.0.0/24".into(),
                ..NetworkRequest::default()
            })
            .await
            .unwrap();
        let host = stack
            .create_host(HostRequest {
                resource_name: "h".into(),
                networks: vec![net.id],
                template_id: "tpl-small".into(),
                image_id: "img-1".into(),
                ..HostRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(
            stack.get_host_state(&host.core.id).await.unwrap(),
            HostState::Started
        );
        stack.stop_host(&host.core.id).await.unwrap();
        assert_eq!(
            stack.get_host_state(&host.core.id).await.unwrap(),
            HostState::Stopped
        );
        stack
            .wait_host_state(&host.core.id, HostState::Stopped, Duration::from_secs(1))
            .await
            .unwrap();
    }
}
