//! End-to-end cluster scenarios against the mock provider.

use std::sync::Arc;

use safescale_cluster::properties::{DefaultsV1, DefaultsV2, NodesV2, SizingV1, StateV1};
use safescale_cluster::{
    BohForeman, ClusterRequest, ClusterState, Complexity, Controller, Flavor, NodeDefinition,
};
use safescale_core::{Error, ErrorKind};
use safescale_install::MockSshClient;
use safescale_stack::mock::MockStack;
use safescale_stack::{Service, Stack, TenantConfig};
use safescale_store::{MemoryStorage, ObjectStorage, Property, PropertyBag};
use safescale_task::Task;

const BUCKET: &str = "0.safescale-test";

struct Fixture {
    stack: Arc<MockStack>,
    storage: Arc<MemoryStorage>,
    controller: Controller,
    task: Task,
}

fn fixture() -> Fixture {
    let stack = Arc::new(MockStack::new());
    let storage = Arc::new(MemoryStorage::new());
    let service = Arc::new(Service::new(
        Arc::clone(&stack) as Arc<dyn Stack>,
        TenantConfig::default(),
    ));
    let controller = Controller::new(
        service,
        Arc::clone(&storage) as _,
        BUCKET,
        Arc::new(MockSshClient::new()),
        Arc::new(BohForeman::new()),
    );
    Fixture {
        stack,
        storage,
        controller,
        task: Task::root(),
    }
}

fn request() -> ClusterRequest {
    ClusterRequest {
        name: "c1".into(),
        cidr: "10.42.0.0/16".into(),
        flavor: Flavor::K8s,
        complexity: Complexity::Small,
        masters: Some(1),
        nodes: Some(1),
        image_id: "img-1".into(),
        master_template: "tpl-small".into(),
        node_template: "tpl-small".into(),
        gateway_template: "tpl-small".into(),
        ..ClusterRequest::default()
    }
}

async fn persisted_properties(fx: &Fixture) -> (String, PropertyBag) {
    let identity = fx.controller.identity(&fx.task).await.unwrap();
    let raw = fx
        .storage
        .get_object(BUCKET, &format!("clusters/byID/{}", identity.id))
        .await
        .unwrap();
    let record: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    let properties: PropertyBag =
        serde_json::from_value(record.get("properties").cloned().unwrap()).unwrap();
    (identity.id, properties)
}

#[tokio::test]
async fn create_expand_shrink_delete() {
    let fx = fixture();
    fx.controller.create(&fx.task, &request()).await.unwrap();

    // Persisted state: Nominal, 1 master, 1 node, the requested CIDR.
    let (_, properties) = persisted_properties(&fx).await;
    let state: StateV1 = properties.get().unwrap();
    assert_eq!(state.state, ClusterState::Nominal);
    let nodes: NodesV2 = properties.get().unwrap();
    assert_eq!(nodes.masters.len(), 1);
    assert_eq!(nodes.private_nodes.len(), 1);
    let network: safescale_cluster::properties::NetworkV2 = properties.get().unwrap();
    assert_eq!(network.cidr, "10.42.0.0/16");
    // Gateway + master + node on the provider side.
    assert_eq!(fx.stack.host_count(), 3);

    // Expand by two.
    let added = fx
        .controller
        .add_nodes(&fx.task, 2, &NodeDefinition::default())
        .await
        .unwrap();
    assert_eq!(added.len(), 2);
    let nodes = fx.controller.list_nodes(&fx.task).await.unwrap();
    assert_eq!(nodes.len(), 3);
    let mut numerical: Vec<u32> = nodes.iter().map(|n| n.numerical_id).collect();
    numerical.sort_unstable();
    assert_eq!(numerical, vec![2, 3, 4]);

    // Shrink: the last node added goes first.
    let last_id = nodes.last().unwrap().id.clone();
    fx.controller.delete_last_node(&fx.task, "").await.unwrap();
    assert_eq!(fx.controller.count_nodes(&fx.task).await.unwrap(), 2);
    assert!(!fx.stack.has_host(&last_id));

    // Full teardown.
    fx.controller.delete(&fx.task).await.unwrap();
    assert_eq!(fx.stack.host_count(), 0);
    assert_eq!(fx.stack.network_count(), 0);
    assert_eq!(fx.storage.object_count(), 0);
}

#[tokio::test]
async fn failed_expansion_cleans_up_and_keeps_the_node_list() {
    let fx = fixture();
    fx.controller.create(&fx.task, &request()).await.unwrap();
    let before = fx.controller.list_nodes(&fx.task).await.unwrap();
    let hosts_before = fx.stack.host_count();

    // Creation calls so far: gateway + master + node = 3. The next three
    // come from add_nodes(3); fail the second of them.
    fx.stack
        .fail_on("create_host", 5, Error::overload("compute quota exhausted"));

    let err = fx
        .controller
        .add_nodes(&fx.task, 3, &NodeDefinition::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overload);

    // The two surviving hosts were deleted during cleanup and the node
    // list is back to its pre-call content.
    assert_eq!(fx.stack.host_count(), hosts_before);
    let after = fx.controller.list_nodes(&fx.task).await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn numerical_ids_stay_monotonic_across_interleavings() {
    let fx = fixture();
    fx.controller.create(&fx.task, &request()).await.unwrap();

    let mut issued: Vec<u32> = fx
        .controller
        .list_nodes(&fx.task)
        .await
        .unwrap()
        .iter()
        .map(|n| n.numerical_id)
        .collect();

    for _ in 0..3 {
        fx.controller
            .add_nodes(&fx.task, 1, &NodeDefinition::default())
            .await
            .unwrap();
        fx.controller.delete_last_node(&fx.task, "").await.unwrap();
        let latest = fx
            .controller
            .add_nodes(&fx.task, 1, &NodeDefinition::default())
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        let nodes = fx.controller.list_nodes(&fx.task).await.unwrap();
        let new_id = nodes.last().unwrap().numerical_id;
        assert!(
            issued.iter().all(|&old| new_id > old),
            "{new_id} must exceed every previously issued ID {issued:?}"
        );
        issued.push(new_id);
    }
}

#[tokio::test]
async fn defaults_migrate_from_v1_on_first_expansion() {
    let fx = fixture();
    fx.controller.create(&fx.task, &request()).await.unwrap();

    // Rewrite the record as a legacy one: defaults.v1 only.
    fx.controller
        .update_metadata(&fx.task, |record| {
            record.properties.remove(DefaultsV2::TAG);
            record.properties.set(&DefaultsV1 {
                image: "img-1".into(),
                master_sizing: SizingV1 {
                    cores: 4,
                    disk_size: 100,
                    ..SizingV1::default()
                },
                node_sizing: SizingV1 {
                    cores: 8,
                    disk_size: 200,
                    ..SizingV1::default()
                },
            })
        })
        .await
        .unwrap();

    // Expansion reads defaults.v2, triggering the migration; the explicit
    // definition keeps host creation going.
    fx.controller
        .add_nodes(
            &fx.task,
            1,
            &NodeDefinition {
                template_id: "tpl-small".into(),
                image_id: "img-1".into(),
            },
        )
        .await
        .unwrap();

    let (_, properties) = persisted_properties(&fx).await;
    assert!(properties.lookup(DefaultsV2::TAG));
    assert!(properties.lookup(DefaultsV1::TAG));
    let migrated: DefaultsV2 = properties.get().unwrap();
    assert_eq!(migrated.node_sizing.min_cores, 8);
    assert_eq!(migrated.node_sizing.min_disk_size, 200);
}

#[tokio::test]
async fn stop_refuses_while_creating() {
    let fx = fixture();
    fx.controller.create(&fx.task, &request()).await.unwrap();

    // Force the persisted state back to Creating.
    fx.controller
        .update_metadata(&fx.task, |record| {
            record.properties.set(&StateV1 {
                state: ClusterState::Creating,
                ..StateV1::default()
            })
        })
        .await
        .unwrap();

    let err = fx.controller.stop(&fx.task).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAvailable);
    assert!(err.message().contains("current state: creating"));

    let (_, properties) = persisted_properties(&fx).await;
    let state: StateV1 = properties.get().unwrap();
    assert_eq!(state.state, ClusterState::Creating);
}

#[tokio::test]
async fn stop_then_start_cycles_every_host() {
    let fx = fixture();
    fx.controller.create(&fx.task, &request()).await.unwrap();

    fx.controller.stop(&fx.task).await.unwrap();
    let (_, properties) = persisted_properties(&fx).await;
    let state: StateV1 = properties.get().unwrap();
    assert_eq!(state.state, ClusterState::Stopped);
    // Gateway + master + node all stopped.
    assert_eq!(fx.stack.calls("stop_host"), 3);

    // Stopping again is a no-op.
    fx.controller.stop(&fx.task).await.unwrap();
    assert_eq!(fx.stack.calls("stop_host"), 3);

    fx.controller.start(&fx.task).await.unwrap();
    let (_, properties) = persisted_properties(&fx).await;
    let state: StateV1 = properties.get().unwrap();
    assert_eq!(state.state, ClusterState::Nominal);
    // Start really starts: every host went through start_host.
    assert_eq!(fx.stack.calls("start_host"), 3);
}

#[tokio::test]
async fn find_available_master_skips_unready_ones() {
    let stack = Arc::new(MockStack::new());
    let storage = Arc::new(MemoryStorage::new());
    let ssh = Arc::new(MockSshClient::new());
    let service = Arc::new(Service::new(
        Arc::clone(&stack) as Arc<dyn Stack>,
        TenantConfig::default(),
    ));
    let controller = Controller::new(
        service,
        Arc::clone(&storage) as _,
        BUCKET,
        Arc::clone(&ssh) as _,
        Arc::new(BohForeman::new()),
    );
    let task = Task::root();

    let mut req = request();
    req.masters = Some(2);
    controller.create(&task, &req).await.unwrap();

    ssh.mark_never_ready("c1-master-1");
    let master = controller.find_available_master(&task).await.unwrap();
    assert_eq!(master.name, "c1-master-2");

    ssh.mark_never_ready("c1-master-2");
    let err = controller.find_available_master(&task).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAvailable);
}
