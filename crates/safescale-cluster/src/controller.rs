//! The cluster controller.
//!
//! Owns cluster identity, the versioned property bundle, member
//! bookkeeping and the concurrency discipline. Every mutation goes
//! through [`Controller::update_metadata`]: take the cluster's write
//! lock, take the metadata item, reload from storage to absorb
//! out-of-band updates, apply the change, write back. Flavor-specific
//! work is delegated to the [`Foreman`](crate::foreman::Foreman).

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use safescale_core::{Error, ErrorKind, Result};
use safescale_install::{InstallTarget, SshClient};
use safescale_stack::Service;
use safescale_store::types::{Host, HostRequest};
use safescale_store::{MetadataItem, ObjectStorage, PropertyBag, Record};
use safescale_task::{Shielded, Task, TaskGroup};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::foreman::{ClusterRequest, Foreman};
use crate::identity::Identity;
use crate::metadata::cluster_item;
use crate::properties::{
    defaults_v1_to_v2, network_v1_to_v2, DefaultsV1, DefaultsV2, FeaturesV1, NetworkV1, NetworkV2,
    Node, NodesV2, StateV1,
};
use crate::state::ClusterState;

/// Delay between attempts when deleting the cluster network.
const NETWORK_DELETE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// The persisted form of a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterRecord {
    /// Cluster identity.
    pub identity: Identity,
    /// Versioned property bundle.
    pub properties: PropertyBag,
}

impl Record for ClusterRecord {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }
}

/// Which member list a host belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Control-plane host.
    Master,
    /// Worker host.
    Node,
}

impl NodeKind {
    /// The name segment of the kind (`<cluster>-master-<n>`).
    #[must_use]
    pub const fn segment(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Node => "node",
        }
    }
}

/// Template and image a new member host is created from.
#[derive(Debug, Clone, Default)]
pub struct NodeDefinition {
    /// Sizing template; falls back to the cluster defaults.
    pub template_id: String,
    /// Boot image; falls back to the cluster defaults.
    pub image_id: String,
}

impl NodeDefinition {
    fn resolved(&self, defaults: &DefaultsV2, kind: NodeKind) -> Result<Self> {
        let template_id = if self.template_id.is_empty() {
            match kind {
                NodeKind::Master => defaults.master_template.clone(),
                NodeKind::Node => defaults.node_template.clone(),
            }
        } else {
            self.template_id.clone()
        };
        let image_id = if self.image_id.is_empty() {
            defaults.image.clone()
        } else {
            self.image_id.clone()
        };
        if template_id.is_empty() {
            return Err(Error::invalid_request(
                "no template requested and the cluster defaults carry none",
            ));
        }
        if image_id.is_empty() {
            return Err(Error::invalid_request(
                "no image requested and the cluster defaults carry none",
            ));
        }
        Ok(Self {
            template_id,
            image_id,
        })
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

struct Inner {
    service: Arc<Service>,
    ssh: Arc<dyn SshClient>,
    foreman: Arc<dyn Foreman>,
    record: Shielded<ClusterRecord>,
    metadata: tokio::sync::Mutex<MetadataItem<ClusterRecord>>,
    last_state_collection: parking_lot::Mutex<Option<Instant>>,
}

/// The state and operations of one cluster.
///
/// `Controller` is a cheap handle: clones share the same cluster state,
/// which is how sub-tasks carry it into their closures.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    /// Create a controller for a cluster that does not exist yet.
    #[must_use]
    pub fn new(
        service: Arc<Service>,
        storage: Arc<dyn ObjectStorage>,
        bucket: &str,
        ssh: Arc<dyn SshClient>,
        foreman: Arc<dyn Foreman>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                ssh,
                foreman,
                record: Shielded::new(ClusterRecord::default()),
                metadata: tokio::sync::Mutex::new(cluster_item(storage, bucket)),
                last_state_collection: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Load the controller of an existing cluster by ID or name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no cluster matches `reference`.
    pub async fn load(
        service: Arc<Service>,
        storage: Arc<dyn ObjectStorage>,
        bucket: &str,
        ssh: Arc<dyn SshClient>,
        foreman: Arc<dyn Foreman>,
        reference: &str,
    ) -> Result<Self> {
        let mut item = cluster_item(storage, bucket);
        let record = item.read_by_reference(reference).await?;
        Ok(Self {
            inner: Arc::new(Inner {
                service,
                ssh,
                foreman,
                record: Shielded::new(record),
                metadata: tokio::sync::Mutex::new(item),
                last_state_collection: parking_lot::Mutex::new(None),
            }),
        })
    }

    /// The provider façade the cluster runs on.
    #[must_use]
    pub fn service(&self) -> &Arc<Service> {
        &self.inner.service
    }

    /// Run a read-only closure over a clone of the cluster record.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` if `task` was cancelled, or the closure's error.
    pub async fn inspect_record<R>(
        &self,
        task: &Task,
        inspector: impl FnOnce(&ClusterRecord) -> Result<R>,
    ) -> Result<R> {
        self.inner.record.inspect(task, inspector).await
    }

    /// The identity of the cluster.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` if `task` was cancelled.
    pub async fn identity(&self, task: &Task) -> Result<Identity> {
        self.inspect_record(task, |record| Ok(record.identity.clone()))
            .await
    }

    /// Apply `mutator` to the cluster record and persist the result.
    ///
    /// Takes the cluster write lock, the metadata item, reloads the
    /// persisted record (absorbing out-of-band updates), applies the
    /// closure and writes both index paths back.
    ///
    /// # Errors
    ///
    /// Surfaces lock, storage and mutator failures; on error nothing is
    /// persisted.
    pub async fn update_metadata(
        &self,
        task: &Task,
        mutator: impl FnOnce(&mut ClusterRecord) -> Result<()> + Send,
    ) -> Result<()> {
        self.inner.record.acquire(task).await;
        let mut item = self.inner.metadata.lock().await;
        item.acquire(task).await;

        let outcome = async {
            if item.written() {
                match item.reload().await {
                    Ok(persisted) => {
                        self.inner
                            .record
                            .alter(task, |record| {
                                *record = persisted;
                                Ok(())
                            })
                            .await?;
                    }
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        warn!("cluster metadata vanished, rewriting from memory");
                    }
                    Err(err) => return Err(err),
                }
            }
            self.inner.record.alter(task, mutator).await?;
            let snapshot = self
                .inner
                .record
                .inspect(task, |record| Ok(record.clone()))
                .await?;
            item.carry(snapshot);
            item.write().await
        }
        .await;

        item.release(task)?;
        drop(item);
        self.inner.record.release(task)?;
        outcome
    }

    /// Remove the cluster record from the metadata catalog.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub async fn delete_metadata(&self, task: &Task) -> Result<()> {
        self.inner.record.acquire(task).await;
        let mut item = self.inner.metadata.lock().await;
        item.acquire(task).await;
        let outcome = async {
            let snapshot = self
                .inner
                .record
                .inspect(task, |record| Ok(record.clone()))
                .await?;
            item.carry(snapshot);
            item.delete().await
        }
        .await;
        item.release(task)?;
        drop(item);
        self.inner.record.release(task)?;
        outcome
    }

    /// Transition the persisted state, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns `Inconsistent` on a transition the machine forbids.
    pub async fn set_state(&self, task: &Task, to: ClusterState) -> Result<()> {
        self.update_metadata(task, |record| {
            let mut state = record.properties.get::<StateV1>()?;
            if !state.state.can_transition_to(to) {
                return Err(Error::inconsistent(format!(
                    "cannot transition cluster from {} to {to}",
                    state.state
                )));
            }
            state.state = to;
            record.properties.set(&state)
        })
        .await
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create the cluster: identity, initial properties, then the
    /// foreman's construction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on a request missing name or CIDR, and
    /// surfaces construction failures with their cleanup consequences.
    pub async fn create(&self, task: &Task, request: &ClusterRequest) -> Result<()> {
        if request.name.is_empty() {
            return Err(Error::invalid_parameter("request.name cannot be empty"));
        }
        if request.cidr.is_empty() {
            return Err(Error::invalid_parameter("request.cidr cannot be empty"));
        }

        let keypair = self
            .inner
            .service
            .create_key_pair(&format!("kp-{}", request.name))
            .await?;

        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            name: request.name.clone(),
            flavor: request.flavor,
            complexity: request.complexity,
            admin_password: generate_password(),
            keypair,
        };
        let defaults = DefaultsV2 {
            image: request.image_id.clone(),
            master_template: request.master_template.clone(),
            node_template: request.node_template.clone(),
            gateway_template: request.gateway_template.clone(),
            ..DefaultsV2::default()
        };
        self.update_metadata(task, move |record| {
            record.identity = identity;
            let mut features = record.properties.get::<FeaturesV1>()?;
            // Policy: the proxy cache is never installed on new clusters.
            features.disabled.insert("proxycache".to_string());
            record.properties.set(&features)?;
            record.properties.set(&defaults)?;
            record.properties.set(&StateV1::default())
        })
        .await?;

        info!(cluster = %request.name, "creating cluster infrastructure");
        let foreman = Arc::clone(&self.inner.foreman);
        foreman.construct(task, self, request).await
    }

    /// Create one member host: reserve a numerical ID and name under the
    /// write lock, create the host, then register it in the member list.
    ///
    /// # Errors
    ///
    /// Surfaces provider failures; a host created but impossible to
    /// register is deleted, the deletion outcome attached as consequence.
    pub async fn create_node(
        &self,
        task: &Task,
        kind: NodeKind,
        definition: &NodeDefinition,
    ) -> Result<Node> {
        let network = self.get_network_config(task).await?;
        if network.network_id.is_empty() {
            return Err(Error::inconsistent(
                "the cluster has no network to attach members to",
            ));
        }
        let defaults: DefaultsV2 = self
            .inspect_record(task, |record| record.properties.get())
            .await?;
        let definition = definition.resolved(&defaults, kind)?;

        let mut cluster_name = String::new();
        let mut numerical_id = 0_u32;
        self.update_metadata(task, |record| {
            cluster_name = record.identity.name.clone();
            let mut nodes = record.properties.get::<NodesV2>()?;
            numerical_id = nodes.allocate_numerical_id();
            record.properties.set(&nodes)
        })
        .await?;
        let name = format!("{cluster_name}-{}-{numerical_id}", kind.segment());

        let host = self
            .inner
            .service
            .create_host(HostRequest {
                resource_name: name.clone(),
                networks: vec![network.network_id.clone()],
                template_id: definition.template_id.clone(),
                image_id: definition.image_id.clone(),
                ..HostRequest::default()
            })
            .await?;

        let node = Node {
            numerical_id,
            id: host.core.id.clone(),
            name,
            private_ip: host.private_ip().unwrap_or_default().to_string(),
            public_ip: host.network.public_ipv4.clone(),
        };

        let registered = node.clone();
        if let Err(err) = self
            .update_metadata(task, move |record| {
                let mut nodes = record.properties.get::<NodesV2>()?;
                match kind {
                    NodeKind::Master => nodes.masters.push(registered),
                    NodeKind::Node => nodes.private_nodes.push(registered),
                }
                record.properties.set(&nodes)
            })
            .await
        {
            let cleanup = self.inner.service.delete_host(&host.core.id).await.err();
            return Err(err.with_consequence_opt(cleanup));
        }
        Ok(node)
    }

    /// Add `count` nodes concurrently.
    ///
    /// On any failure the nodes created by this call are deleted and
    /// removed from the member list again; cleanup failures ride along as
    /// consequences of the primary error.
    ///
    /// # Errors
    ///
    /// Returns the ordered list of sub-task failures.
    pub async fn add_nodes(
        &self,
        task: &Task,
        count: u32,
        definition: &NodeDefinition,
    ) -> Result<Vec<String>> {
        if count == 0 {
            return Err(Error::invalid_parameter("count must be greater than zero"));
        }

        // Migrate defaults.v1 on first use of the v2 schema.
        self.update_metadata(task, |record| {
            record
                .properties
                .get_or_migrate::<DefaultsV2, DefaultsV1>(defaults_v1_to_v2)?;
            Ok(())
        })
        .await?;

        let mut group: TaskGroup<Node> = TaskGroup::new(task);
        for _ in 0..count {
            let cluster = self.clone();
            let definition = definition.clone();
            group.start(move |subtask| async move {
                subtask.check_aborted()?;
                cluster
                    .create_node(&subtask, NodeKind::Node, &definition)
                    .await
            });
        }

        let mut created = Vec::new();
        let mut errors = Vec::new();
        for outcome in group.wait().await {
            match outcome {
                Ok(node) => created.push(node),
                Err(err) => errors.push(err),
            }
        }

        if let Some(mut err) = Error::list(errors) {
            if let Some(cleanup) = self.scrub_nodes(task, &created).await {
                err = err.with_consequence(cleanup);
            }
            return Err(err);
        }

        let host_ids: Vec<String> = created.iter().map(|n| n.id.clone()).collect();
        let foreman = Arc::clone(&self.inner.foreman);
        let configured = async {
            foreman.configure_nodes(task, self, &host_ids).await?;
            foreman.join_nodes(task, self, &host_ids).await
        }
        .await;
        if let Err(mut err) = configured {
            if let Some(cleanup) = self.scrub_nodes(task, &created).await {
                err = err.with_consequence(cleanup);
            }
            return Err(err);
        }

        let cluster_name = self.identity(task).await?.name;
        info!(count, cluster = %cluster_name, "nodes added");
        Ok(created.into_iter().map(|n| n.name).collect())
    }

    /// Delete freshly created nodes after a failed expansion: provider
    /// hosts go away and the member list returns to its prior content.
    async fn scrub_nodes(&self, task: &Task, nodes: &[Node]) -> Option<Error> {
        let mut failures = Vec::new();
        for node in nodes {
            let node_id = node.id.clone();
            if let Err(err) = self
                .update_metadata(task, move |record| {
                    let mut nodes = record.properties.get::<NodesV2>()?;
                    if let Some(idx) = NodesV2::position(&nodes.private_nodes, &node_id) {
                        nodes.private_nodes.remove(idx);
                    }
                    record.properties.set(&nodes)
                })
                .await
            {
                failures.push(err);
            }
            match self.inner.service.delete_host(&node.id).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => failures.push(err),
            }
        }
        Error::list(failures)
    }

    // =========================================================================
    // Member lists
    // =========================================================================

    /// The master records, in creation order.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn list_masters(&self, task: &Task) -> Result<Vec<Node>> {
        self.inspect_record(task, |record| {
            record.properties.get::<NodesV2>().map(|n| n.masters)
        })
        .await
    }

    /// The node records, in creation order.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn list_nodes(&self, task: &Task) -> Result<Vec<Node>> {
        self.inspect_record(task, |record| {
            record.properties.get::<NodesV2>().map(|n| n.private_nodes)
        })
        .await
    }

    /// The provider IDs of the masters.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn list_master_ids(&self, task: &Task) -> Result<Vec<String>> {
        Ok(self
            .list_masters(task)
            .await?
            .into_iter()
            .map(|n| n.id)
            .collect())
    }

    /// The private IPs of the masters.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn list_master_ips(&self, task: &Task) -> Result<Vec<String>> {
        Ok(self
            .list_masters(task)
            .await?
            .into_iter()
            .map(|n| n.private_ip)
            .collect())
    }

    /// The provider IDs of the nodes.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn list_node_ids(&self, task: &Task) -> Result<Vec<String>> {
        Ok(self
            .list_nodes(task)
            .await?
            .into_iter()
            .map(|n| n.id)
            .collect())
    }

    /// The private IPs of the nodes.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn list_node_ips(&self, task: &Task) -> Result<Vec<String>> {
        Ok(self
            .list_nodes(task)
            .await?
            .into_iter()
            .map(|n| n.private_ip)
            .collect())
    }

    /// The number of private nodes.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn count_nodes(&self, task: &Task) -> Result<usize> {
        Ok(self.list_nodes(task).await?.len())
    }

    /// Whether a host ID belongs to the node list.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn search_node(&self, task: &Task, host_id: &str) -> Result<bool> {
        Ok(NodesV2::position(&self.list_nodes(task).await?, host_id).is_some())
    }

    /// Every member host ID: masters then nodes.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn list_all_member_ids(&self, task: &Task) -> Result<Vec<String>> {
        let mut ids = self.list_master_ids(task).await?;
        ids.extend(self.list_node_ids(task).await?);
        Ok(ids)
    }

    /// The network configuration, migrating v1 on the fly (read-only).
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn get_network_config(&self, task: &Task) -> Result<NetworkV2> {
        self.inspect_record(task, |record| {
            if record
                .properties
                .lookup(<NetworkV2 as safescale_store::Property>::TAG)
            {
                record.properties.get::<NetworkV2>()
            } else {
                let old = record.properties.get::<NetworkV1>()?;
                Ok(network_v1_to_v2(&old))
            }
        })
        .await
    }

    /// The gateway host IDs of the cluster network.
    ///
    /// # Errors
    ///
    /// Surfaces decoding failures.
    pub async fn gateway_ids(&self, task: &Task) -> Result<Vec<String>> {
        let network = self.get_network_config(task).await?;
        let mut ids = Vec::new();
        if !network.gateway_id.is_empty() {
            ids.push(network.gateway_id);
        }
        if !network.secondary_gateway_id.is_empty() {
            ids.push(network.secondary_gateway_id);
        }
        Ok(ids)
    }

    // =========================================================================
    // Member availability
    // =========================================================================

    async fn first_reachable(
        &self,
        task: &Task,
        candidates: Vec<Node>,
        what: &str,
    ) -> Result<Node> {
        task.check_aborted()?;
        let mut last_error: Option<Error> = None;
        for node in candidates {
            let host = match self.inner.service.inspect_host(&node.id).await {
                Ok(host) => host,
                Err(err) => {
                    warn!(member = %node.name, error = %err, "failed to inspect member");
                    last_error = Some(err);
                    continue;
                }
            };
            match self
                .inner
                .ssh
                .wait_ready(&host, self.inner.service.timeouts().connect_ssh)
                .await
            {
                Ok(()) => return Ok(node),
                Err(err) if err.kind() == ErrorKind::Timeout => {
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        let err = Error::not_available(format!("failed to find an available {what}"));
        Err(match last_error {
            Some(cause) => err.with_cause(cause),
            None => err,
        })
    }

    /// The first master accepting SSH sessions.
    ///
    /// Transient connection timeouts move on to the next master; other
    /// failures abort.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` when no master answers.
    pub async fn find_available_master(&self, task: &Task) -> Result<Node> {
        let masters = self.list_masters(task).await?;
        self.first_reachable(task, masters, "master").await
    }

    /// The first node accepting SSH sessions.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` when no node answers.
    pub async fn find_available_node(&self, task: &Task) -> Result<Node> {
        let nodes = self.list_nodes(task).await?;
        self.first_reachable(task, nodes, "node").await
    }

    // =========================================================================
    // Member deletion
    // =========================================================================

    /// Delete the node identified by `host_id`.
    ///
    /// With no `selected_master_id`, an available master is elected to
    /// drive the drain; if none answers, the node is still deleted and
    /// the election failure is primary with the deletion outcome as
    /// consequence.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the host is not a node of this cluster.
    pub async fn delete_specific_node(
        &self,
        task: &Task,
        host_id: &str,
        selected_master_id: &str,
    ) -> Result<()> {
        if host_id.is_empty() {
            return Err(Error::invalid_parameter("host_id cannot be empty"));
        }
        let node = self
            .inspect_record(task, |record| {
                let nodes = record.properties.get::<NodesV2>()?;
                NodesV2::position(&nodes.private_nodes, host_id)
                    .map(|idx| nodes.private_nodes[idx].clone())
                    .ok_or_else(|| Error::not_found(format!("failed to find node '{host_id}'")))
            })
            .await?;

        self.delete_node_with_master(task, node, selected_master_id)
            .await
    }

    /// Delete the last node added to the cluster.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` on an empty node list.
    pub async fn delete_last_node(&self, task: &Task, selected_master_id: &str) -> Result<()> {
        let node = self
            .inspect_record(task, |record| {
                let nodes = record.properties.get::<NodesV2>()?;
                nodes
                    .private_nodes
                    .last()
                    .cloned()
                    .ok_or_else(|| Error::not_found("the cluster has no node left"))
            })
            .await?;
        self.delete_node_with_master(task, node, selected_master_id)
            .await
    }

    async fn delete_node_with_master(
        &self,
        task: &Task,
        node: Node,
        selected_master_id: &str,
    ) -> Result<()> {
        let master_id = if selected_master_id.is_empty() {
            match self.find_available_master(task).await {
                Ok(master) => master.id,
                Err(err) => {
                    let deletion = self.delete_node(task, &node, "").await.err();
                    return Err(err.with_consequence_opt(deletion));
                }
            }
        } else {
            selected_master_id.to_string()
        };
        self.delete_node(task, &node, &master_id).await
    }

    /// Remove a node from the member list, then delete its host.
    ///
    /// The list entry goes first so concurrent operations stop seeing the
    /// node; on a later failure the entry is restored best effort and the
    /// restoration outcome attached as a consequence.
    async fn delete_node(&self, task: &Task, node: &Node, selected_master_id: &str) -> Result<()> {
        let node_id = node.id.clone();
        self.update_metadata(task, move |record| {
            let mut nodes = record.properties.get::<NodesV2>()?;
            if let Some(idx) = NodesV2::position(&nodes.private_nodes, &node_id) {
                nodes.private_nodes.remove(idx);
            }
            record.properties.set(&nodes)
        })
        .await?;

        let foreman = Arc::clone(&self.inner.foreman);
        let outcome = async {
            if !selected_master_id.is_empty() {
                foreman
                    .leave_nodes(task, self, &[node.id.clone()], selected_master_id)
                    .await?;
                foreman
                    .unconfigure_node(task, self, &node.id, selected_master_id)
                    .await?;
            }
            match self.inner.service.delete_host(&node.id).await {
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            }
        }
        .await;

        if let Err(err) = outcome {
            let restored = node.clone();
            let restore = self
                .update_metadata(task, move |record| {
                    let mut nodes = record.properties.get::<NodesV2>()?;
                    nodes.private_nodes.push(restored);
                    record.properties.set(&nodes)
                })
                .await;
            if let Err(restore_err) = restore {
                warn!(node = %node.name, "failed to restore node in cluster metadata");
                return Err(err.with_consequence(restore_err));
            }
            return Err(err);
        }
        info!(node = %node.name, "node deleted");
        Ok(())
    }

    /// Remove a master from the member list, then delete its host.
    async fn delete_master(&self, task: &Task, host_id: &str) -> Result<()> {
        let host_id_owned = host_id.to_string();
        let mut removed: Option<Node> = None;
        {
            let removed = &mut removed;
            self.update_metadata(task, move |record| {
                let mut nodes = record.properties.get::<NodesV2>()?;
                let idx = NodesV2::position(&nodes.masters, &host_id_owned).ok_or_else(|| {
                    Error::not_found(format!("failed to find master '{host_id_owned}'"))
                })?;
                *removed = Some(nodes.masters.remove(idx));
                record.properties.set(&nodes)
            })
            .await?;
        }
        let master = removed.ok_or_else(|| Error::inconsistent("master removal lost its node"))?;

        let deletion = match self.inner.service.delete_host(&master.id).await {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        };
        if let Err(err) = deletion {
            let restored = master.clone();
            let restore = self
                .update_metadata(task, move |record| {
                    let mut nodes = record.properties.get::<NodesV2>()?;
                    nodes.masters.push(restored);
                    record.properties.set(&nodes)
                })
                .await;
            if let Err(restore_err) = restore {
                warn!(master = %master.name, "failed to restore master in cluster metadata");
                return Err(err.with_consequence(restore_err));
            }
            return Err(err);
        }
        Ok(())
    }

    // =========================================================================
    // Cluster lifecycle
    // =========================================================================

    /// Destroy everything the cluster owns: nodes, masters, gateways,
    /// network, metadata.
    ///
    /// Intermediate failures accumulate into the ordered list error
    /// returned at the end.
    ///
    /// # Errors
    ///
    /// Returns the accumulated list error, if any step failed.
    pub async fn delete(&self, task: &Task) -> Result<()> {
        self.update_metadata(task, |record| {
            let mut state = record.properties.get::<StateV1>()?;
            state.state = ClusterState::Removed;
            record.properties.set(&state)
        })
        .await?;

        let mut cleaning_errors: Vec<Error> = Vec::new();

        // Nodes first, concurrently.
        let node_ids = self.list_node_ids(task).await?;
        if !node_ids.is_empty() {
            let mut group: TaskGroup<()> = TaskGroup::new(task);
            for id in node_ids {
                let cluster = self.clone();
                group.start(move |subtask| async move {
                    subtask.check_aborted()?;
                    cluster.delete_specific_node(&subtask, &id, "").await
                });
            }
            for outcome in group.wait().await {
                if let Err(err) = outcome {
                    cleaning_errors.push(err);
                }
            }
        }

        // Then the masters.
        let master_ids = self.list_master_ids(task).await?;
        if !master_ids.is_empty() {
            let mut group: TaskGroup<()> = TaskGroup::new(task);
            for id in master_ids {
                let cluster = self.clone();
                group.start(move |subtask| async move {
                    subtask.check_aborted()?;
                    cluster.delete_master(&subtask, &id).await
                });
            }
            for outcome in group.wait().await {
                if let Err(err) = outcome {
                    cleaning_errors.push(err);
                }
            }
        }

        // Then the gateways and the network, with a patient retry: ports
        // released by host deletions may take a moment to free the network.
        let network = match self.get_network_config(task).await {
            Ok(network) => network,
            Err(err) => {
                cleaning_errors.push(err);
                return Err(Error::list(cleaning_errors).unwrap_or_else(|| {
                    Error::inconsistent("cluster deletion failed without error")
                }));
            }
        };
        for gateway_id in self.gateway_ids(task).await.unwrap_or_default() {
            match self.inner.service.delete_host(&gateway_id).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => cleaning_errors.push(err),
            }
        }
        if !network.network_id.is_empty() {
            let deadline = Instant::now() + self.inner.service.timeouts().host;
            loop {
                match self.inner.service.delete_network(&network.network_id).await {
                    Ok(()) => break,
                    Err(err) if err.kind() == ErrorKind::NotFound => break,
                    Err(err) => {
                        if Instant::now() + NETWORK_DELETE_RETRY_DELAY >= deadline {
                            cleaning_errors.push(err);
                            return Err(Error::list(cleaning_errors).unwrap_or_else(|| {
                                Error::inconsistent("cluster deletion failed without error")
                            }));
                        }
                        tokio::time::sleep(NETWORK_DELETE_RETRY_DELAY).await;
                    }
                }
            }
        }

        if let Err(err) = self.delete_metadata(task).await {
            cleaning_errors.push(err);
        }

        match Error::list(cleaning_errors) {
            Some(err) => Err(err),
            None => {
                info!("cluster deleted");
                Ok(())
            }
        }
    }

    /// Stop every host of the cluster.
    ///
    /// A cluster already stopped is a no-op; any state other than
    /// `Nominal` or `Degraded` refuses.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` naming the current state when the guard
    /// refuses.
    pub async fn stop(&self, task: &Task) -> Result<()> {
        let state = self.force_get_state(task).await?;
        if state == ClusterState::Stopped {
            return Ok(());
        }
        if !state.stoppable() {
            return Err(Error::not_available(format!("current state: {state}")));
        }

        self.set_state(task, ClusterState::Stopping).await?;

        let mut ids = self.list_all_member_ids(task).await?;
        ids.extend(self.gateway_ids(task).await?);
        let mut group: TaskGroup<()> = TaskGroup::new(task);
        for id in ids {
            let service = Arc::clone(&self.inner.service);
            group.start(move |subtask| async move {
                subtask.check_aborted()?;
                service.stop_host(&id).await
            });
        }
        group.wait_collect().await?;

        self.set_state(task, ClusterState::Stopped).await
    }

    /// Start every host of the cluster: gateways, masters, nodes.
    ///
    /// A cluster already running (or on its way) is a no-op; any state
    /// other than `Stopped` refuses.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` naming the current state when the guard
    /// refuses.
    pub async fn start(&self, task: &Task) -> Result<()> {
        let state = self.force_get_state(task).await?;
        if matches!(
            state,
            ClusterState::Nominal | ClusterState::Degraded | ClusterState::Starting
        ) {
            return Ok(());
        }
        if state != ClusterState::Stopped {
            return Err(Error::not_available(format!("current state: {state}")));
        }

        self.set_state(task, ClusterState::Starting).await?;

        let mut ids = self.gateway_ids(task).await?;
        ids.extend(self.list_all_member_ids(task).await?);
        let mut group: TaskGroup<()> = TaskGroup::new(task);
        for id in ids {
            let service = Arc::clone(&self.inner.service);
            group.start(move |subtask| async move {
                subtask.check_aborted()?;
                service.start_host(&id).await
            });
        }
        group.wait_collect().await?;

        self.set_state(task, ClusterState::Nominal).await
    }

    // =========================================================================
    // State collection
    // =========================================================================

    /// The cluster state, served from cache while it is fresh.
    ///
    /// # Errors
    ///
    /// Surfaces collection failures.
    pub async fn get_state(&self, task: &Task) -> Result<ClusterState> {
        let state = self
            .inspect_record(task, |record| record.properties.get::<StateV1>())
            .await?;
        let fresh_for = Duration::from_secs(state.state_collect_interval_secs);
        let last = *self.inner.last_state_collection.lock();
        if let Some(at) = last {
            if at.elapsed() < fresh_for {
                return Ok(state.state);
            }
        }
        self.force_get_state(task).await
    }

    /// Ask the foreman for the effective state and persist it.
    ///
    /// # Errors
    ///
    /// Surfaces collection and persistence failures.
    pub async fn force_get_state(&self, task: &Task) -> Result<ClusterState> {
        let foreman = Arc::clone(&self.inner.foreman);
        let collected = foreman.collect_state(task, self).await?;
        self.update_metadata(task, move |record| {
            let mut state = record.properties.get::<StateV1>()?;
            state.state = collected;
            record.properties.set(&state)
        })
        .await?;
        *self.inner.last_state_collection.lock() = Some(Instant::now());
        Ok(collected)
    }
}

#[async_trait::async_trait]
impl InstallTarget for Controller {
    async fn gateways(&self, task: &Task) -> Result<Vec<Host>> {
        let mut hosts = Vec::new();
        for id in self.gateway_ids(task).await? {
            hosts.push(self.inner.service.inspect_host(&id).await?);
        }
        Ok(hosts)
    }

    async fn masters(&self, task: &Task) -> Result<Vec<Host>> {
        let mut hosts = Vec::new();
        for id in self.list_master_ids(task).await? {
            hosts.push(self.inner.service.inspect_host(&id).await?);
        }
        Ok(hosts)
    }

    async fn nodes(&self, task: &Task) -> Result<Vec<Host>> {
        let mut hosts = Vec::new();
        for id in self.list_node_ids(task).await? {
            hosts.push(self.inner.service.inspect_host(&id).await?);
        }
        Ok(hosts)
    }
}
