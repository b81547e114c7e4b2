//! Security group engine scenarios against the mock provider.

use std::sync::Arc;

use safescale_core::{Error, ErrorKind};
use safescale_stack::mock::MockStack;
use safescale_stack::{SecurityGroupEngine, Service, Stack, TenantConfig};
use safescale_store::types::{HostRequest, NetworkRequest, RuleDirection, SecurityGroupRule};
use safescale_store::MemoryStorage;
use safescale_task::Task;

const BUCKET: &str = "0.safescale-test";

struct Fixture {
    stack: Arc<MockStack>,
    storage: Arc<MemoryStorage>,
    engine: SecurityGroupEngine,
    task: Task,
}

fn fixture() -> Fixture {
    let stack = Arc::new(MockStack::new());
    let storage = Arc::new(MemoryStorage::new());
    let service = Arc::new(Service::new(
        Arc::clone(&stack) as Arc<dyn Stack>,
        TenantConfig::default(),
    ));
    let engine = SecurityGroupEngine::new(service, Arc::clone(&storage) as _, BUCKET);
    Fixture {
        stack,
        storage,
        engine,
        task: Task::root(),
    }
}

fn ssh_rule() -> SecurityGroupRule {
    SecurityGroupRule {
        description: "ssh".into(),
        direction: RuleDirection::Ingress,
        protocol: "tcp".into(),
        port_from: 22,
        port_to: 22,
        cidrs: vec!["0.0.0.0/0".into()],
        ..SecurityGroupRule::default()
    }
}

async fn make_host(stack: &MockStack, network_id: &str, name: &str) -> String {
    stack
        .create_host(HostRequest {
            resource_name: name.into(),
            networks: vec![network_id.to_string()],
            template_id: "tpl-small".into(),
            image_id: "img-1".into(),
            ..HostRequest::default()
        })
        .await
        .unwrap()
        .core
        .id
}

#[tokio::test]
async fn create_persists_metadata_and_rejects_duplicates() {
    let fx = fixture();
    let sg = fx
        .engine
        .create(&fx.task, "web", "front door", &[ssh_rule()])
        .await
        .unwrap();
    assert!(!sg.id.is_empty());
    assert_eq!(sg.rules.len(), 1);
    assert!(fx.storage.contains(BUCKET, &format!("security-groups/byID/{}", sg.id)));
    assert!(fx.storage.contains(BUCKET, "security-groups/byName/web"));

    let err = fx
        .engine
        .create(&fx.task, "web", "again", &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
}

#[tokio::test]
async fn reserved_prefix_is_rejected() {
    let fx = fixture();
    let err = fx
        .engine
        .create(&fx.task, "sg-web", "reserved", &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
}

#[tokio::test]
async fn provider_create_failure_leaves_nothing_behind() {
    let fx = fixture();
    fx.stack.fail_on(
        "create_security_group",
        1,
        Error::overload("quota exceeded"),
    );
    let err = fx.engine.create(&fx.task, "web", "front", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overload);
    // Nothing persisted on either side.
    assert_eq!(fx.storage.object_count(), 0);
    assert!(fx.engine.load("web").await.is_err());
}

#[tokio::test]
async fn bind_to_host_is_idempotent() {
    let fx = fixture();
    let net = fx
        .stack
        .create_network(NetworkRequest {
            name: "net".into(),
            cidr: "10.0.0.0/24".into(),
            ..NetworkRequest::default()
        })
        .await
        .unwrap();
    let host_id = make_host(&fx.stack, &net.id, "worker").await;
    let host = fx.stack.inspect_host(&host_id).await.unwrap();

    fx.engine.create(&fx.task, "web", "", &[]).await.unwrap();
    fx.engine.bind_to_host(&fx.task, "web", &host, true).await.unwrap();
    // Binding an already-enabled group again is a no-op success.
    fx.engine.bind_to_host(&fx.task, "web", &host, true).await.unwrap();

    let sg = fx.engine.load("web").await.unwrap();
    assert!(sg.hosts.by_id.contains_key(&host_id));
    assert_eq!(sg.hosts.by_name.get("worker"), Some(&host_id));

    // Unbinding an absent provider binding is also a success.
    fx.engine.unbind_from_host(&fx.task, "web", &host).await.unwrap();
    fx.engine.unbind_from_host(&fx.task, "web", &host).await.unwrap();
    let sg = fx.engine.load("web").await.unwrap();
    assert!(sg.hosts.by_id.is_empty());
    assert!(sg.hosts.by_name.is_empty());
}

#[tokio::test]
async fn rules_follow_the_provider_canonical_list() {
    let fx = fixture();
    let sg = fx.engine.create(&fx.task, "web", "", &[ssh_rule()]).await.unwrap();

    let mut https = ssh_rule();
    https.description = "https".into();
    https.port_from = 443;
    https.port_to = 443;
    let updated = fx.engine.add_rule(&fx.task, "web", &https).await.unwrap();
    assert_eq!(updated.rules.len(), 2);

    let rule_id = updated.rules[0].id.clone();
    let updated = fx.engine.delete_rule(&fx.task, "web", &rule_id).await.unwrap();
    assert_eq!(updated.rules.len(), 1);

    fx.engine.clear(&fx.task, "web").await.unwrap();
    let cleared = fx.engine.load("web").await.unwrap();
    assert!(cleared.rules.is_empty());

    // Reset replays the (now empty) persisted rules onto the provider.
    fx.engine.reset(&fx.task, "web").await.unwrap();
    let provider_side = fx.stack.inspect_security_group(&sg.id).await.unwrap();
    assert!(provider_side.rules.is_empty());
}

#[tokio::test]
async fn force_remove_detaches_networks_then_hosts() {
    let fx = fixture();
    let net = fx
        .stack
        .create_network(NetworkRequest {
            name: "lan".into(),
            cidr: "10.1.0.0/24".into(),
            ..NetworkRequest::default()
        })
        .await
        .unwrap();

    // Three hosts on the network, two directly-bound hosts elsewhere.
    for name in ["lan-1", "lan-2", "lan-3"] {
        make_host(&fx.stack, &net.id, name).await;
    }
    let other = fx
        .stack
        .create_network(NetworkRequest {
            name: "other".into(),
            cidr: "10.2.0.0/24".into(),
            ..NetworkRequest::default()
        })
        .await
        .unwrap();
    let d1 = make_host(&fx.stack, &other.id, "direct-1").await;
    let d2 = make_host(&fx.stack, &other.id, "direct-2").await;

    let sg = fx.engine.create(&fx.task, "web", "", &[]).await.unwrap();
    fx.engine
        .bind_to_network(&fx.task, "web", &net, true)
        .await
        .unwrap();
    for id in [&d1, &d2] {
        let host = fx.stack.inspect_host(id).await.unwrap();
        fx.engine.bind_to_host(&fx.task, "web", &host, true).await.unwrap();
    }
    assert_eq!(fx.stack.bound_hosts(&sg.id).len(), 5);

    // Non-forced removal refuses while hosts are bound.
    let err = fx.engine.remove(&fx.task, "web", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAvailable);

    fx.engine.remove(&fx.task, "web", true).await.unwrap();
    assert!(fx.stack.bound_hosts(&sg.id).is_empty());
    assert!(fx.stack.inspect_security_group(&sg.id).await.is_err());
    assert!(fx.engine.load("web").await.is_err());
}

#[tokio::test]
async fn network_inherited_bindings_refuse_direct_unbind() {
    let fx = fixture();
    let net = fx
        .stack
        .create_network(NetworkRequest {
            name: "lan".into(),
            cidr: "10.1.0.0/24".into(),
            ..NetworkRequest::default()
        })
        .await
        .unwrap();
    let host_id = make_host(&fx.stack, &net.id, "lan-1").await;
    let host = fx.stack.inspect_host(&host_id).await.unwrap();

    fx.engine.create(&fx.task, "web", "", &[]).await.unwrap();
    fx.engine.bind_to_network(&fx.task, "web", &net, true).await.unwrap();

    let err = fx
        .engine
        .unbind_from_host(&fx.task, "web", &host)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}
