//! The Foreman seam: flavor-specific construction and configuration.
//!
//! The [`Controller`] owns state and bookkeeping; a [`Foreman`] knows how
//! to build and configure one cluster kind on the provisioned hosts. The
//! reference implementation is [`BohForeman`] ("bunch of hosts"):
//! provisioning without a workload manager. Richer flavors layer feature
//! installation on top of the same construction skeleton.

use async_trait::async_trait;
use safescale_core::{Error, Result};
use safescale_stack::GatewayRequest;
use safescale_store::types::{HostState, NetworkRequest};
use safescale_task::{Task, TaskGroup};
use tracing::{info, warn};

use crate::controller::{Controller, NodeDefinition, NodeKind};
use crate::flavor::{Complexity, Flavor};
use crate::properties::{NetworkV2, StateV1};
use crate::state::ClusterState;

/// What a new cluster should look like.
#[derive(Debug, Clone, Default)]
pub struct ClusterRequest {
    /// Cluster name.
    pub name: String,
    /// CIDR of the cluster network.
    pub cidr: String,
    /// Topology flavor.
    pub flavor: Flavor,
    /// Capacity tier, used for counts left unset.
    pub complexity: Complexity,
    /// Explicit master count, overriding the tier default.
    pub masters: Option<u32>,
    /// Explicit node count, overriding the tier default.
    pub nodes: Option<u32>,
    /// Boot image of every host.
    pub image_id: String,
    /// Template of master hosts.
    pub master_template: String,
    /// Template of worker hosts.
    pub node_template: String,
    /// Template of gateway hosts; falls back to the master template.
    pub gateway_template: String,
    /// Leave half-created infrastructure in place on failure, for
    /// debugging.
    pub keep_on_failure: bool,
}

impl ClusterRequest {
    /// The effective `(masters, nodes)` counts.
    #[must_use]
    pub fn counts(&self) -> (u32, u32) {
        let (default_masters, default_nodes) = self.complexity.default_counts();
        (
            self.masters.unwrap_or(default_masters),
            self.nodes.unwrap_or(default_nodes),
        )
    }
}

/// Flavor-specific construction and configuration steps.
#[async_trait]
pub trait Foreman: Send + Sync {
    /// Build the cluster infrastructure: network, gateway, masters, nodes.
    async fn construct(
        &self,
        task: &Task,
        cluster: &Controller,
        request: &ClusterRequest,
    ) -> Result<()>;

    /// Configure freshly created nodes (install runtimes, push config).
    async fn configure_nodes(
        &self,
        task: &Task,
        cluster: &Controller,
        host_ids: &[String],
    ) -> Result<()>;

    /// Join configured nodes to the cluster fabric.
    async fn join_nodes(
        &self,
        task: &Task,
        cluster: &Controller,
        host_ids: &[String],
    ) -> Result<()>;

    /// Make nodes leave the cluster fabric, driven from a master.
    async fn leave_nodes(
        &self,
        task: &Task,
        cluster: &Controller,
        host_ids: &[String],
        master_id: &str,
    ) -> Result<()>;

    /// Undo the configuration of one node, driven from a master.
    async fn unconfigure_node(
        &self,
        task: &Task,
        cluster: &Controller,
        host_id: &str,
        master_id: &str,
    ) -> Result<()>;

    /// Observe the effective state of the cluster.
    async fn collect_state(&self, task: &Task, cluster: &Controller)
        -> Result<ClusterState>;
}

/// The "bunch of hosts" foreman: provisioning only.
#[derive(Debug, Default)]
pub struct BohForeman;

impl BohForeman {
    /// Create the reference foreman.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Tear down everything `construct` built so far, gathering failures.
    async fn scrub(
        cluster: &Controller,
        task: &Task,
        network_id: &str,
        gateway_id: &str,
    ) -> Option<Error> {
        let mut failures = Vec::new();
        let service = cluster.service();

        let member_ids: Vec<String> = match cluster.list_all_member_ids(task).await {
            Ok(ids) => ids,
            Err(err) => {
                failures.push(err);
                Vec::new()
            }
        };
        for id in member_ids {
            if let Err(err) = service.delete_host(&id).await {
                if err.kind() != safescale_core::ErrorKind::NotFound {
                    failures.push(err);
                }
            }
        }
        if !gateway_id.is_empty() {
            if let Err(err) = service.delete_host(gateway_id).await {
                if err.kind() != safescale_core::ErrorKind::NotFound {
                    failures.push(err);
                }
            }
        }
        if !network_id.is_empty() {
            if let Err(err) = service.delete_network(network_id).await {
                if err.kind() != safescale_core::ErrorKind::NotFound {
                    failures.push(err);
                }
            }
        }
        Error::list(failures)
    }

    async fn create_members(
        task: &Task,
        cluster: &Controller,
        kind: NodeKind,
        count: u32,
        definition: &NodeDefinition,
    ) -> Result<()> {
        let mut group: TaskGroup<()> = TaskGroup::new(task);
        for _ in 0..count {
            let cluster = cluster.clone();
            let definition = definition.clone();
            group.start(move |subtask| async move {
                subtask.check_aborted()?;
                cluster.create_node(&subtask, kind, &definition).await?;
                Ok(())
            });
        }
        group.wait_collect().await?;
        Ok(())
    }
}

#[async_trait]
impl Foreman for BohForeman {
    async fn construct(
        &self,
        task: &Task,
        cluster: &Controller,
        request: &ClusterRequest,
    ) -> Result<()> {
        let service = cluster.service();
        let identity = cluster.identity(task).await?;

        let network = service
            .create_network(NetworkRequest {
                name: format!("net-{}", request.name),
                cidr: request.cidr.clone(),
                dns_servers: service.tenant().network.dns_list.clone(),
            })
            .await?;

        let gateway_template = if request.gateway_template.is_empty() {
            request.master_template.clone()
        } else {
            request.gateway_template.clone()
        };
        let gateway = match service
            .create_gateway(GatewayRequest {
                name: format!("gw-{}", request.name),
                network: network.clone(),
                template_id: gateway_template,
                image_id: request.image_id.clone(),
                key_pair: Some(identity.keypair.clone()),
            })
            .await
        {
            Ok(gateway) => gateway,
            Err(err) => {
                if request.keep_on_failure {
                    return Err(err);
                }
                let cleanup = service.delete_network(&network.id).await.err();
                return Err(err.with_consequence_opt(cleanup));
            }
        };

        let gateway_ip = gateway.private_ip().unwrap_or_default().to_string();
        let endpoint_ip = gateway
            .accessible_ip()
            .unwrap_or_default()
            .to_string();
        cluster
            .update_metadata(task, |record| {
                record.properties.set(&NetworkV2 {
                    network_id: network.id.clone(),
                    cidr: network.cidr.clone(),
                    gateway_id: gateway.core.id.clone(),
                    gateway_ip: gateway_ip.clone(),
                    default_route_ip: gateway_ip.clone(),
                    endpoint_ip: endpoint_ip.clone(),
                    ..NetworkV2::default()
                })
            })
            .await?;
        cluster.set_state(task, ClusterState::Created).await?;

        let (master_count, node_count) = request.counts();
        let outcome = async {
            Self::create_members(
                task,
                cluster,
                NodeKind::Master,
                master_count,
                &NodeDefinition {
                    template_id: request.master_template.clone(),
                    image_id: request.image_id.clone(),
                },
            )
            .await?;

            cluster.set_state(task, ClusterState::Initializing).await?;

            Self::create_members(
                task,
                cluster,
                NodeKind::Node,
                node_count,
                &NodeDefinition {
                    template_id: request.node_template.clone(),
                    image_id: request.image_id.clone(),
                },
            )
            .await?;

            let node_ids = cluster.list_node_ids(task).await?;
            self.configure_nodes(task, cluster, &node_ids).await?;
            self.join_nodes(task, cluster, &node_ids).await?;
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            if request.keep_on_failure {
                return Err(err);
            }
            warn!(cluster = %request.name, error = %err, "construction failed, scrubbing");
            let cleanup = Self::scrub(cluster, task, &network.id, &gateway.core.id).await;
            return Err(err.with_consequence_opt(cleanup));
        }

        cluster.set_state(task, ClusterState::Nominal).await?;
        info!(cluster = %request.name, "cluster constructed");
        Ok(())
    }

    async fn configure_nodes(
        &self,
        _task: &Task,
        _cluster: &Controller,
        _host_ids: &[String],
    ) -> Result<()> {
        // Nothing to configure on a bunch of hosts.
        Ok(())
    }

    async fn join_nodes(
        &self,
        _task: &Task,
        _cluster: &Controller,
        _host_ids: &[String],
    ) -> Result<()> {
        Ok(())
    }

    async fn leave_nodes(
        &self,
        _task: &Task,
        _cluster: &Controller,
        _host_ids: &[String],
        _master_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn unconfigure_node(
        &self,
        _task: &Task,
        _cluster: &Controller,
        _host_id: &str,
        _master_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn collect_state(
        &self,
        task: &Task,
        cluster: &Controller,
    ) -> Result<ClusterState> {
        let stored = cluster
            .inspect_record(task, |record| {
                record.properties.get::<StateV1>().map(|s| s.state)
            })
            .await?;
        if !matches!(stored, ClusterState::Nominal | ClusterState::Degraded) {
            return Ok(stored);
        }

        let service = cluster.service();
        let mut member_ids = cluster.gateway_ids(task).await?;
        member_ids.extend(cluster.list_all_member_ids(task).await?);

        let mut started = 0_usize;
        let mut stopped = 0_usize;
        let mut missing = 0_usize;
        for id in &member_ids {
            match service.stack().get_host_state(id).await {
                Ok(HostState::Started | HostState::Starting) => started += 1,
                Ok(HostState::Stopped | HostState::Stopping) => stopped += 1,
                Ok(_) => missing += 1,
                Err(err) if err.kind() == safescale_core::ErrorKind::NotFound => missing += 1,
                Err(err) => return Err(err),
            }
        }

        let state = if missing == 0 && stopped == 0 {
            ClusterState::Nominal
        } else if started == 0 && missing == 0 {
            ClusterState::Stopped
        } else {
            ClusterState::Degraded
        };
        Ok(state)
    }
}
