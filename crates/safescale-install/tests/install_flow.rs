//! Feature installation over the mock SSH transport.

use std::collections::HashMap;
use std::sync::Arc;

use safescale_install::{
    Action, Feature, MockSshClient, Settings, StaticTarget, Variables, Worker,
};
use safescale_store::types::Host;
use safescale_task::Task;

const FEATURE: &str = r"
feature:
  name: helloworld
  install:
    bash:
      add:
        pace: push,apply
        steps:
          push:
            targets: { gateways: one, masters: all }
            run: |
              echo hello from {{Hostname}} at {{HostIP}}
            options: '{ greeting: hello }'
          apply:
            targets: { masters: all, nodes: all }
            run: systemctl restart helloworld
            serial: true
";

fn host(id: &str, name: &str, ip: &str) -> Host {
    let mut host = Host::default();
    host.core.id = id.into();
    host.core.name = name.into();
    host.network.default_network_id = "net-1".into();
    host.network
        .ipv4_addresses
        .insert("net-1".into(), ip.into());
    host
}

fn target() -> StaticTarget {
    StaticTarget {
        gateways: vec![host("h-gw1", "c1-gw", "10.0.0.1"), host("h-gw2", "c1-gw2", "10.0.0.2")],
        masters: vec![host("h-m1", "c1-master-1", "10.0.0.10")],
        nodes: vec![
            host("h-n1", "c1-node-2", "10.0.0.20"),
            host("h-n2", "c1-node-3", "10.0.0.21"),
        ],
    }
}

#[tokio::test]
async fn feature_add_uploads_and_runs_per_host() {
    let task = Task::root();
    let ssh = Arc::new(MockSshClient::new());
    let feature = Feature::from_yaml_str(FEATURE).unwrap();
    let worker = Worker::new(feature, Action::Add, Arc::clone(&ssh) as _, Settings::default());

    let results = worker
        .run_on_cluster(&task, &target(), &Variables::new())
        .await
        .unwrap();
    assert!(results.successful());
    assert_eq!(results.steps().len(), 2);

    // Step "push": one gateway + the master; options.json goes along.
    let uploads = ssh.uploads();
    let options: Vec<_> = uploads
        .iter()
        .filter(|u| u.path == "/opt/safescale/var/tmp/options.json")
        .collect();
    assert_eq!(options.len(), 2);
    assert!(options.iter().all(|u| u.owner == "cladm:safescale"));
    assert!(options.iter().all(|u| u.mode == "ug+rw-x,o-rwx"));

    let scripts: Vec<_> = uploads
        .iter()
        .filter(|u| u.path == "/opt/safescale/var/tmp/feature.helloworld.add_push.sh")
        .collect();
    assert_eq!(scripts.len(), 2);
    // The gateway's script is rendered with its own identity.
    assert!(scripts
        .iter()
        .any(|u| u.content.contains("hello from c1-gw at 10.0.0.1")));

    // Step "apply": the master plus both nodes, serially.
    let applies: Vec<_> = ssh
        .commands()
        .iter()
        .filter(|c| c.command.contains("feature.helloworld.add_apply.sh"))
        .cloned()
        .collect();
    assert_eq!(applies.len(), 3);
    assert!(applies
        .iter()
        .all(|c| c.command.starts_with("sudo bash ") && c.command.ends_with("exit $rc")));
}

#[tokio::test]
async fn failed_host_marks_the_step_unsuccessful() {
    let task = Task::root();
    let ssh = Arc::new(MockSshClient::new());
    ssh.script_retcode("c1-node-3", 1);
    let feature = Feature::from_yaml_str(FEATURE).unwrap();
    let worker = Worker::new(feature, Action::Add, Arc::clone(&ssh) as _, Settings::default());

    let results = worker
        .run_on_cluster(&task, &target(), &Variables::new())
        .await
        .unwrap();
    assert!(!results.successful());
    let (step_name, step_results) = &results.steps()[1];
    assert_eq!(step_name, "apply");
    assert!(!step_results.successful());
    assert!(step_results.0["c1-node-2"].successful());
    assert!(!step_results.0["c1-node-3"].successful());
    assert!(results.error_messages().contains("c1-node-3"));
}

#[tokio::test]
async fn any_selector_skips_unready_gateways() {
    let task = Task::root();
    let ssh = Arc::new(MockSshClient::new());
    ssh.mark_never_ready("c1-gw");
    let feature = Feature::from_yaml_str(FEATURE).unwrap();
    let worker = Worker::new(feature, Action::Add, Arc::clone(&ssh) as _, Settings::default());

    let results = worker
        .run_on_cluster(&task, &target(), &Variables::new())
        .await
        .unwrap();
    assert!(results.successful());
    // The push step fell through to the second gateway.
    assert!(ssh
        .uploads()
        .iter()
        .any(|u| u.host == "c1-gw2" && u.path.contains("add_push")));
    assert!(!ssh.commands().iter().any(|c| c.host == "c1-gw"));
}

#[tokio::test]
async fn serialize_setting_forces_serial_execution() {
    let task = Task::root();
    let ssh = Arc::new(MockSshClient::new());
    let feature = Feature::from_yaml_str(FEATURE).unwrap();
    let worker = Worker::new(
        feature,
        Action::Add,
        Arc::clone(&ssh) as _,
        Settings { serialize: true },
    );
    let results = worker
        .run_on_cluster(&task, &target(), &Variables::new())
        .await
        .unwrap();
    assert!(results.successful());
}

#[tokio::test]
async fn host_install_honors_the_hosts_selector() {
    let task = Task::root();
    let ssh = Arc::new(MockSshClient::new());
    let raw = r"
feature:
  name: probe
  install:
    bash:
      check:
        pace: probe
        steps:
          probe:
            targets: { hosts: yes }
            run: test -f /etc/safescale-network
";
    let feature = Feature::from_yaml_str(raw).unwrap();
    let worker = Worker::new(feature, Action::Check, Arc::clone(&ssh) as _, Settings::default());
    let standalone = host("h-1", "standalone", "192.168.1.4");
    let results = worker
        .run_on_host(&task, &standalone, &Variables::new())
        .await
        .unwrap();
    assert!(results.successful());
    assert_eq!(ssh.commands().len(), 1);
    assert_eq!(ssh.commands()[0].host, "standalone");
}
