//! High-level security group operations.
//!
//! The engine coordinates the provider and the metadata catalog: every
//! mutation reloads the persisted record under the item's lock, applies
//! the change on the provider, and writes the record back. The security
//! group record is authoritative for rules and carries both binding
//! indexes (`by_id`, `by_name`); any insertion writes both.

use std::sync::Arc;

use safescale_core::{retry_with_budget, Error, ErrorKind, Result, RetryBudget, RetryPolicy};
use safescale_store::types::{
    Host, Network, SecurityGroup, SecurityGroupBond, SecurityGroupRule,
};
use safescale_store::{MetadataItem, ObjectStorage};
use safescale_task::{Task, TaskGroup};
use tracing::{info, warn};

use crate::service::Service;

const SECURITY_GROUPS_FOLDER: &str = "security-groups";

/// Security group lifecycle and binding operations.
pub struct SecurityGroupEngine {
    service: Arc<Service>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
}

impl SecurityGroupEngine {
    /// Create an engine over the tenant's service and metadata bucket.
    #[must_use]
    pub fn new(service: Arc<Service>, storage: Arc<dyn ObjectStorage>, bucket: &str) -> Self {
        Self {
            service,
            storage,
            bucket: bucket.to_string(),
        }
    }

    fn item(&self) -> MetadataItem<SecurityGroup> {
        MetadataItem::new(Arc::clone(&self.storage), &self.bucket, SECURITY_GROUPS_FOLDER)
    }

    /// Load the persisted record of a security group.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no record exists under `reference`.
    pub async fn load(&self, reference: &str) -> Result<SecurityGroup> {
        self.item().read_by_reference(reference).await
    }

    /// Create a security group on the provider and persist its record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for names starting with `sg-` (reserved
    /// for provider-generated names), `Duplicate` when the name is taken
    /// on either side, and rolls back on any later failure.
    pub async fn create(
        &self,
        task: &Task,
        name: &str,
        description: &str,
        rules: &[SecurityGroupRule],
    ) -> Result<SecurityGroup> {
        task.check_aborted()?;
        if name.starts_with("sg-") {
            return Err(Error::invalid_parameter(
                "security group names starting with 'sg-' are reserved",
            ));
        }

        // SafeScale-managed uniqueness first, then provider-side.
        let mut item = self.item();
        match item.read_by_reference(name).await {
            Ok(_) => {
                return Err(Error::duplicate(format!(
                    "a security group named '{name}' is already managed"
                )))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        match self.service.stack().inspect_security_group(name).await {
            Ok(_) => {
                return Err(Error::duplicate(format!(
                    "a security group named '{name}' already exists on the provider"
                )))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        let sg = self
            .service
            .stack()
            .create_security_group(name, description, rules)
            .await?;

        item.carry(sg.clone());
        if let Err(err) = item.write().await {
            // Roll back the provider side; the record was never persisted.
            let cleanup = self.service.stack().delete_security_group(&sg.id).await.err();
            return Err(err.with_consequence_opt(cleanup));
        }
        info!(sg = %name, id = %sg.id, "security group created");
        Ok(sg)
    }

    /// Remove a security group.
    ///
    /// Without `force`, removal refuses while hosts are still bound. With
    /// `force`, network bindings are detached first (which transitively
    /// unbinds the hosts that inherited the group from their network),
    /// then the remaining directly-bound hosts, then the provider group
    /// is deleted with a bounded retry.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` when bound hosts block a non-forced removal.
    pub async fn remove(&self, task: &Task, reference: &str, force: bool) -> Result<()> {
        task.check_aborted()?;
        let mut item = self.item();
        let mut sg = item.read_by_reference(reference).await?;
        item.acquire(task).await;
        let outcome = self.remove_locked(task, &mut item, &mut sg, force).await;
        item.release(task)?;
        outcome
    }

    async fn remove_locked(
        &self,
        task: &Task,
        item: &mut MetadataItem<SecurityGroup>,
        sg: &mut SecurityGroup,
        force: bool,
    ) -> Result<()> {
        if !force && !sg.hosts.by_id.is_empty() {
            return Err(Error::not_available(format!(
                "security group '{}' is still bound to {} host(s)",
                sg.name,
                sg.hosts.by_id.len()
            )));
        }

        if force {
            let network_ids: Vec<String> = sg.networks.by_id.keys().cloned().collect();
            for network_id in network_ids {
                self.detach_from_network_hosts(task, sg, &network_id).await?;
                remove_network_bond(sg, &network_id);
            }
            let direct: Vec<String> = sg.hosts.by_id.keys().cloned().collect();
            for host_id in direct {
                self.unbind_on_provider(&sg.id, &host_id).await?;
                remove_host_bond(sg, &host_id);
            }
        }

        let sg_id = sg.id.clone();
        let stack = Arc::clone(self.service.stack());
        let budget = RetryBudget::new(
            self.service.timeouts().default_op,
            self.service.timeouts().host_cleanup,
        );
        retry_with_budget(budget, RetryPolicy::Local, || {
            let stack = Arc::clone(&stack);
            let sg_id = sg_id.clone();
            async move {
                match stack.delete_security_group(&sg_id).await {
                    Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                    other => other,
                }
            }
        })
        .await?;

        item.carry(sg.clone());
        item.delete().await?;
        info!(sg = %sg.name, "security group removed");
        Ok(())
    }

    /// Replace the rules with the empty set, on the provider and locally.
    ///
    /// # Errors
    ///
    /// Surfaces the provider or metadata failure.
    pub async fn clear(&self, task: &Task, reference: &str) -> Result<()> {
        task.check_aborted()?;
        let mut item = self.item();
        let mut sg = item.read_by_reference(reference).await?;
        item.acquire(task).await;
        let outcome = async {
            self.service.stack().clear_security_group(&sg.id).await?;
            sg.rules.clear();
            item.carry(sg.clone());
            item.write().await
        }
        .await;
        item.release(task)?;
        outcome
    }

    /// Reload the persisted rules and push them back onto the provider.
    ///
    /// # Errors
    ///
    /// Surfaces the provider or metadata failure.
    pub async fn reset(&self, task: &Task, reference: &str) -> Result<()> {
        task.check_aborted()?;
        let mut item = self.item();
        let sg = item.read_by_reference(reference).await?;
        item.acquire(task).await;
        let outcome = async {
            self.service.stack().clear_security_group(&sg.id).await?;
            for rule in &sg.rules {
                self.service
                    .stack()
                    .add_rule_to_security_group(&sg.id, rule)
                    .await?;
            }
            Ok(())
        }
        .await;
        item.release(task)?;
        outcome
    }

    /// Add a rule; the local record takes the provider's canonical list.
    ///
    /// # Errors
    ///
    /// Surfaces the provider or metadata failure.
    pub async fn add_rule(
        &self,
        task: &Task,
        reference: &str,
        rule: &SecurityGroupRule,
    ) -> Result<SecurityGroup> {
        task.check_aborted()?;
        let mut item = self.item();
        let mut sg = item.read_by_reference(reference).await?;
        item.acquire(task).await;
        let outcome = async {
            let canonical = self
                .service
                .stack()
                .add_rule_to_security_group(&sg.id, rule)
                .await?;
            sg.rules = canonical;
            item.carry(sg.clone());
            item.write().await?;
            Ok(sg)
        }
        .await;
        item.release(task)?;
        outcome
    }

    /// Delete a rule; the local record takes the provider's canonical list.
    ///
    /// # Errors
    ///
    /// Surfaces the provider or metadata failure.
    pub async fn delete_rule(
        &self,
        task: &Task,
        reference: &str,
        rule_id: &str,
    ) -> Result<SecurityGroup> {
        task.check_aborted()?;
        let mut item = self.item();
        let mut sg = item.read_by_reference(reference).await?;
        item.acquire(task).await;
        let outcome = async {
            let canonical = self
                .service
                .stack()
                .delete_rule_from_security_group(&sg.id, rule_id)
                .await?;
            sg.rules = canonical;
            item.carry(sg.clone());
            item.write().await?;
            Ok(sg)
        }
        .await;
        item.release(task)?;
        outcome
    }

    /// Bind the group to a host, enabled or disabled.
    ///
    /// Idempotent: binding in the already-recorded state succeeds without
    /// touching the provider. Enabling treats a provider `Duplicate` as
    /// success, disabling treats `NotFound` as success.
    ///
    /// # Errors
    ///
    /// Surfaces the provider or metadata failure.
    pub async fn bind_to_host(
        &self,
        task: &Task,
        reference: &str,
        host: &Host,
        enabled: bool,
    ) -> Result<()> {
        task.check_aborted()?;
        let mut item = self.item();
        let mut sg = item.read_by_reference(reference).await?;
        item.acquire(task).await;
        let outcome = self
            .bind_to_host_locked(&mut item, &mut sg, host, enabled, false)
            .await;
        item.release(task)?;
        outcome
    }

    async fn bind_to_host_locked(
        &self,
        item: &mut MetadataItem<SecurityGroup>,
        sg: &mut SecurityGroup,
        host: &Host,
        enabled: bool,
        from_network: bool,
    ) -> Result<()> {
        if let Some(bond) = sg.hosts.by_id.get(&host.core.id) {
            if bond.disabled != enabled {
                // Same requested state: nothing to do.
                return Ok(());
            }
        }

        if enabled {
            match self
                .service
                .stack()
                .bind_security_group_to_host(&sg.id, &host.core.id)
                .await
            {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::Duplicate => {}
                Err(err) => return Err(err),
            }
        } else {
            match self
                .service
                .stack()
                .unbind_security_group_from_host(&sg.id, &host.core.id)
                .await
            {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        insert_host_bond(sg, host, !enabled, from_network);
        item.carry(sg.clone());
        item.write().await
    }

    /// Unbind the group from a directly-bound host.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the binding was inherited from a
    /// network; such bindings detach at the network level only.
    pub async fn unbind_from_host(&self, task: &Task, reference: &str, host: &Host) -> Result<()> {
        task.check_aborted()?;
        let mut item = self.item();
        let mut sg = item.read_by_reference(reference).await?;
        item.acquire(task).await;
        let outcome = async {
            if let Some(bond) = sg.hosts.by_id.get(&host.core.id) {
                if bond.from_network {
                    return Err(Error::invalid_request(format!(
                        "security group '{}' is bound to host '{}' through its network; \
                         detach it from the network instead",
                        sg.name, host.core.name
                    )));
                }
            }
            self.unbind_on_provider(&sg.id, &host.core.id).await?;
            remove_host_bond(&mut sg, &host.core.id);
            item.carry(sg.clone());
            item.write().await
        }
        .await;
        item.release(task)?;
        outcome
    }

    /// Bind or unbind the group on a network: the change propagates to
    /// every host attached to the network in parallel, then the network
    /// bond is recorded.
    ///
    /// # Errors
    ///
    /// Folds per-host failures into an ordered list error.
    pub async fn bind_to_network(
        &self,
        task: &Task,
        reference: &str,
        network: &Network,
        enable: bool,
    ) -> Result<()> {
        task.check_aborted()?;
        let mut item = self.item();
        let mut sg = item.read_by_reference(reference).await?;
        item.acquire(task).await;
        let outcome = async {
            let hosts = self.hosts_on_network(&network.id).await?;

            let mut group: TaskGroup<String> = TaskGroup::new(task);
            for host in &hosts {
                let stack = Arc::clone(self.service.stack());
                let sg_id = sg.id.clone();
                let host_id = host.core.id.clone();
                group.start(move |subtask| async move {
                    subtask.check_aborted()?;
                    let outcome = if enable {
                        match stack.bind_security_group_to_host(&sg_id, &host_id).await {
                            Err(err) if err.kind() == ErrorKind::Duplicate => Ok(()),
                            other => other,
                        }
                    } else {
                        match stack.unbind_security_group_from_host(&sg_id, &host_id).await {
                            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                            other => other,
                        }
                    };
                    outcome.map(|()| host_id)
                });
            }
            let bound = group.wait_collect().await?;

            for host in &hosts {
                if bound.contains(&host.core.id) {
                    if enable {
                        insert_host_bond(&mut sg, host, false, true);
                    } else {
                        remove_host_bond(&mut sg, &host.core.id);
                    }
                }
            }
            if enable {
                insert_network_bond(&mut sg, network);
            } else {
                remove_network_bond(&mut sg, &network.id);
            }
            item.carry(sg.clone());
            item.write().await
        }
        .await;
        item.release(task)?;
        outcome
    }

    async fn detach_from_network_hosts(
        &self,
        task: &Task,
        sg: &mut SecurityGroup,
        network_id: &str,
    ) -> Result<()> {
        let hosts = self.hosts_on_network(network_id).await?;
        let mut group: TaskGroup<String> = TaskGroup::new(task);
        for host in &hosts {
            let stack = Arc::clone(self.service.stack());
            let sg_id = sg.id.clone();
            let host_id = host.core.id.clone();
            group.start(move |subtask| async move {
                subtask.check_aborted()?;
                match stack.unbind_security_group_from_host(&sg_id, &host_id).await {
                    Err(err) if err.kind() == ErrorKind::NotFound => Ok(host_id),
                    Err(err) => Err(err),
                    Ok(()) => Ok(host_id),
                }
            });
        }
        let detached = group.wait_collect().await?;
        for host_id in detached {
            remove_host_bond(sg, &host_id);
        }
        Ok(())
    }

    async fn unbind_on_provider(&self, sg_id: &str, host_id: &str) -> Result<()> {
        match self
            .service
            .stack()
            .unbind_security_group_from_host(sg_id, host_id)
            .await
        {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(sg = %sg_id, host = %host_id, "binding already absent on provider");
                Ok(())
            }
            other => other,
        }
    }

    async fn hosts_on_network(&self, network_id: &str) -> Result<Vec<Host>> {
        let hosts = self.service.list_hosts().await?;
        Ok(hosts
            .into_iter()
            .filter(|h| h.network.networks_by_id.contains_key(network_id))
            .collect())
    }
}

fn insert_host_bond(sg: &mut SecurityGroup, host: &Host, disabled: bool, from_network: bool) {
    sg.hosts.by_id.insert(
        host.core.id.clone(),
        SecurityGroupBond {
            id: host.core.id.clone(),
            name: host.core.name.clone(),
            disabled,
            from_network,
        },
    );
    sg.hosts
        .by_name
        .insert(host.core.name.clone(), host.core.id.clone());
}

fn remove_host_bond(sg: &mut SecurityGroup, host_id: &str) {
    if let Some(bond) = sg.hosts.by_id.remove(host_id) {
        sg.hosts.by_name.remove(&bond.name);
    }
}

fn insert_network_bond(sg: &mut SecurityGroup, network: &Network) {
    sg.networks.by_id.insert(
        network.id.clone(),
        SecurityGroupBond {
            id: network.id.clone(),
            name: network.name.clone(),
            disabled: false,
            from_network: false,
        },
    );
    sg.networks
        .by_name
        .insert(network.name.clone(), network.id.clone());
}

fn remove_network_bond(sg: &mut SecurityGroup, network_id: &str) {
    if let Some(bond) = sg.networks.by_id.remove(network_id) {
        sg.networks.by_name.remove(&bond.name);
    }
}
