//! End-to-end lifecycle scenarios over the in-memory provider and agent.

mod support;

use std::collections::BTreeSet;

use flotilla_cluster::Cluster;
use flotilla_common::model::{
    ClusterComplexity, ClusterFlavor, ClusterRequest, ClusterState, SizingRequirements,
};
use flotilla_metadata::properties::v1::{
    ClusterDefaultsV1, ClusterNetworkV1, ClusterNodeV1, ClusterNodesV1, HostSizeV1,
};
use flotilla_metadata::properties::{DefaultsProperty, NetworkProperty, NodesProperty};
use flotilla_metadata::{ClusterAggregate, ClusterIdentity};
use flotilla_provider::ProviderService;
use flotilla_task::TaskContext;

use support::rig;

fn sizing_2c_7g_50d() -> SizingRequirements {
    SizingRequirements {
        min_cores: 2,
        min_ram_gb: 7.0,
        min_disk_gb: 50,
        ..Default::default()
    }
}

fn boh_request(name: &str, cidr: &str) -> ClusterRequest {
    ClusterRequest {
        name: name.to_string(),
        flavor: ClusterFlavor::Boh,
        complexity: ClusterComplexity::Small,
        cidr: cidr.to_string(),
        masters_def: sizing_2c_7g_50d(),
        nodes_def: sizing_2c_7g_50d(),
        master_count: 1,
        node_count: 1,
        tenant: "test-tenant".to_string(),
        ..Default::default()
    }
}

/// S1: a minimal bag-of-hosts cluster ends up nominal with one gateway, one
/// master and one node, named and numbered by the monotonic indexes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s1_minimal_boh_cluster() {
    let rig = rig();
    let ctx = TaskContext::root();

    let cluster = Cluster::create(&ctx, rig.services.clone(), boh_request("c1", "192.168.200.0/24"))
        .await
        .expect("create");

    assert_eq!(
        cluster.persisted_state().await.expect("state"),
        ClusterState::Nominal
    );

    let masters = cluster.list_masters().await.expect("masters");
    let nodes = cluster.list_nodes().await.expect("nodes");
    assert_eq!(masters.len(), 1);
    assert_eq!(nodes.len(), 1);
    assert_eq!(masters[0].name, "c1-master-1");
    assert_eq!(nodes[0].name, "c1-node-1");

    // Small complexity: one gateway, no failover.
    assert!(rig.provider.host_named("gw-c1").is_some());
    assert!(rig.provider.host_named("gw2-c1").is_none());
    let network = cluster.network_config().await.expect("network");
    assert!(network.secondary_gateway_id.is_empty());
    assert!(!network.gateway_id.is_empty());
    // The network was created with the cluster, so it is marked cluster-owned.
    assert!(network.network_id.is_empty());

    // Numerical IDs form a strictly increasing, unique sequence.
    let mut ids: Vec<u32> = masters
        .iter()
        .chain(nodes.iter())
        .map(|n| n.numerical_id)
        .collect();
    let unique: BTreeSet<u32> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);

    // Gateway + master + node in the provider, nothing else.
    assert_eq!(rig.provider.hosts.len(), 3);
}

/// S2: a normal-complexity kubernetes cluster gets gateway failover, three
/// masters and two nodes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s2_kubernetes_with_failover() {
    let rig = rig();
    let ctx = TaskContext::root();

    let mut req = boh_request("k1", "192.168.201.0/24");
    req.flavor = ClusterFlavor::Kubernetes;
    req.complexity = ClusterComplexity::Normal;
    req.master_count = 3;
    req.node_count = 2;

    let cluster = Cluster::create(&ctx, rig.services.clone(), req)
        .await
        .expect("create");

    assert_eq!(cluster.list_masters().await.expect("masters").len(), 3);
    assert_eq!(cluster.list_nodes().await.expect("nodes").len(), 2);
    assert!(rig.provider.host_named("gw-k1").is_some());
    assert!(rig.provider.host_named("gw2-k1").is_some());

    let network = cluster.network_config().await.expect("network");
    assert!(!network.secondary_gateway_id.is_empty());
    assert_ne!(network.gateway_id, network.secondary_gateway_id);

    // The flavor ran its control-plane bring-up on the first master.
    let first_master_id = cluster.list_masters().await.expect("masters")[0].id.clone();
    let commands = rig
        .agent
        .commands
        .get(&first_master_id)
        .expect("commands on first master");
    assert!(commands.iter().any(|c| c.contains("kubeadm init")));
}

/// S3: expanding then shrinking keeps the worker list in creation order and
/// removes exactly the last node, deleting its host in the provider.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s3_expand_then_shrink() {
    let rig = rig();
    let ctx = TaskContext::root();

    let cluster = Cluster::create(&ctx, rig.services.clone(), boh_request("c1", "192.168.200.0/24"))
        .await
        .expect("create");

    let added = cluster
        .add_nodes(&ctx, 2, SizingRequirements::default())
        .await
        .expect("add nodes");
    assert_eq!(added.len(), 2);

    let names: Vec<String> = cluster
        .list_nodes()
        .await
        .expect("nodes")
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(names, vec!["c1-node-1", "c1-node-2", "c1-node-3"]);

    let removed = cluster.shrink(&ctx, 1).await.expect("shrink");
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].name, "c1-node-3");

    let names: Vec<String> = cluster
        .list_nodes()
        .await
        .expect("nodes")
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(names, vec!["c1-node-1", "c1-node-2"]);
    assert!(rig.provider.host_named("c1-node-3").is_none());
    assert!(rig.provider.host_named("c1-node-2").is_some());
}

/// S4: a master creation failure mid-create rolls everything back: no
/// metadata, no hosts, no subnet, no network left behind, and the error names
/// the failed stage.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s4_failure_mid_create_rolls_back_everything() {
    let rig = rig();
    let ctx = TaskContext::root();

    let mut req = boh_request("s4", "192.168.202.0/24");
    req.master_count = 3;
    req.node_count = 1;
    rig.provider.fail_host_creation("s4-master-2");

    let err = Cluster::create(&ctx, rig.services.clone(), req)
        .await
        .expect_err("create must fail");
    assert!(err.to_string().contains("failed to create master(s)"));

    // No cluster metadata remains.
    assert!(rig
        .services
        .clusters
        .read("s4")
        .await
        .unwrap_err()
        .is_not_found());

    // No leaked provider resources.
    assert!(rig.provider.hosts_with_prefix("s4-").is_empty());
    assert!(rig.provider.host_named("gw-s4").is_none());
    assert!(rig.provider.subnets.is_empty());
    assert!(rig.provider.networks.is_empty());
}

/// S4 addendum: keep_on_failure leaves the resources and the metadata in
/// place for forensics.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s4_keep_on_failure_preserves_resources() {
    let rig = rig();
    let ctx = TaskContext::root();

    let mut req = boh_request("s4k", "192.168.203.0/24");
    req.master_count = 2;
    req.node_count = 1;
    req.keep_on_failure = true;
    rig.provider.fail_host_creation("s4k-master-2");

    Cluster::create(&ctx, rig.services.clone(), req)
        .await
        .expect_err("create must fail");

    // Metadata still there, still marked creating.
    let aggregate = rig.services.clusters.read("s4k").await.expect("metadata");
    assert_eq!(
        aggregate.properties.state().state,
        ClusterState::Creating
    );
    // The healthy master and the gateway were not deleted.
    assert!(rig.provider.host_named("s4k-master-1").is_some());
    assert!(rig.provider.host_named("gw-s4k").is_some());
}

/// S5: a legacy document carrying Nodes v1 and Network v1 upgrades on load;
/// a second load finds everything current.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s5_legacy_metadata_upgrades_on_load() {
    let rig = rig();
    let ctx = TaskContext::root();

    let mut aggregate = ClusterAggregate::new(ClusterIdentity {
        name: "old".to_string(),
        flavor: ClusterFlavor::Boh,
        complexity: ClusterComplexity::Small,
        admin_password: "legacyPassword123456".to_string(),
        ..Default::default()
    });
    aggregate.properties.nodes = Some(NodesProperty::V1(ClusterNodesV1 {
        masters: vec![ClusterNodeV1 {
            id: "h-legacy-1".to_string(),
            name: "old-master-1".to_string(),
            private_ip: "192.168.210.10".to_string(),
            public_ip: None,
        }],
        private_nodes: vec![ClusterNodeV1 {
            id: "h-legacy-2".to_string(),
            name: "old-node-1".to_string(),
            private_ip: "192.168.210.20".to_string(),
            public_ip: None,
        }],
        master_last_index: 1,
        private_last_index: 1,
    }));
    aggregate.properties.network = Some(NetworkProperty::V1(ClusterNetworkV1 {
        network_id: "legacy-net".to_string(),
        cidr: "192.168.210.0/24".to_string(),
        gateway_id: "h-legacy-gw".to_string(),
        gateway_ip: "192.168.210.254".to_string(),
        public_ip: "203.0.113.99".to_string(),
    }));
    rig.services.clusters.write(&aggregate).await.expect("preload");

    let cluster = Cluster::load(&ctx, rig.services.clone(), "old")
        .await
        .expect("load");

    // Reads of the latest versions succeed with the upgraded payloads.
    let network = cluster.network_config().await.expect("network v3");
    assert_eq!(network.subnet_id, "legacy-net");
    assert_eq!(network.network_id, "");
    assert_eq!(network.default_route_ip, "192.168.210.254");
    assert_eq!(network.endpoint_ip, "203.0.113.99");

    let masters = cluster.list_masters().await.expect("masters v2");
    assert_eq!(masters[0].name, "old-master-1");
    assert_eq!(masters[0].numerical_id, 1);
    let nodes = cluster.list_nodes().await.expect("nodes v2");
    assert_eq!(nodes[0].numerical_id, 2);

    // The rewrite happened once; the stored document is already current.
    let stored = rig.services.clusters.read("old").await.expect("stored");
    assert!(matches!(stored.properties.nodes, Some(NodesProperty::V2(_))));
    assert!(matches!(
        stored.properties.network,
        Some(NetworkProperty::V3(_))
    ));

    // Loading again is a no-op.
    Cluster::load(&ctx, rig.services.clone(), "old")
        .await
        .expect("second load");
    let stored_again = rig.services.clusters.read("old").await.expect("stored");
    assert_eq!(stored, stored_again);
}

/// Boundary: adding a node to a cluster whose Defaults property is still at
/// v1 upgrades it transparently.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn add_node_upgrades_legacy_defaults() {
    let rig = rig();
    let ctx = TaskContext::root();

    Cluster::create(&ctx, rig.services.clone(), boh_request("cd", "192.168.204.0/24"))
        .await
        .expect("create");

    // Downgrade the stored defaults to the legacy schema.
    rig.services
        .clusters
        .alter("cd", |aggregate| {
            aggregate.properties.defaults = Some(DefaultsProperty::V1(ClusterDefaultsV1 {
                node_sizing: HostSizeV1 {
                    cores: 2,
                    ram_gb: 7.0,
                    disk_gb: 50,
                    gpu_count: -1,
                    cpu_freq: 0.0,
                },
                image: "Ubuntu 18.04".to_string(),
                ..Default::default()
            }));
            Ok(())
        })
        .await
        .expect("downgrade");

    let cluster = Cluster::load(&ctx, rig.services.clone(), "cd")
        .await
        .expect("load");
    let host = cluster
        .add_node(&ctx, SizingRequirements::default())
        .await
        .expect("add node");
    assert_eq!(host.name(), "cd-node-2");

    let stored = rig.services.clusters.read("cd").await.expect("stored");
    assert!(matches!(
        stored.properties.defaults,
        Some(DefaultsProperty::V2(_))
    ));
}

/// S6: two concurrent expansions never hand out the same numerical ID and
/// both nodes land in the worker list.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s6_concurrent_add_nodes_never_collide() {
    let rig = rig();
    let ctx = TaskContext::root();

    let cluster = Cluster::create(&ctx, rig.services.clone(), boh_request("c6", "192.168.205.0/24"))
        .await
        .expect("create");

    let a = {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            let ctx = TaskContext::root();
            cluster.add_node(&ctx, SizingRequirements::default()).await
        })
    };
    let b = {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            let ctx = TaskContext::root();
            cluster.add_node(&ctx, SizingRequirements::default()).await
        })
    };
    a.await.expect("join").expect("add node a");
    b.await.expect("join").expect("add node b");

    let nodes = cluster.list_nodes().await.expect("nodes");
    assert_eq!(nodes.len(), 3);
    let unique: BTreeSet<u32> = nodes.iter().map(|n| n.numerical_id).collect();
    assert_eq!(unique.len(), 3);
    let unique_names: BTreeSet<String> = nodes.iter().map(|n| n.name.clone()).collect();
    assert_eq!(unique_names.len(), 3);
}

/// Stop then start returns the cluster to nominal; repeating either is a
/// no-op.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_start_round_trip() {
    let rig = rig();
    let ctx = TaskContext::root();

    let cluster = Cluster::create(&ctx, rig.services.clone(), boh_request("c2", "192.168.206.0/24"))
        .await
        .expect("create");

    cluster.stop(&ctx).await.expect("stop");
    assert_eq!(
        cluster.persisted_state().await.expect("state"),
        ClusterState::Stopped
    );
    let gateway = rig.provider.host_named("gw-c2").expect("gateway");
    assert_eq!(
        rig.provider.host_state(&gateway.id).await.expect("state"),
        flotilla_provider::HostState::Stopped
    );

    // Stop from stopped is a no-op.
    cluster.stop(&ctx).await.expect("stop again");

    cluster.start(&ctx).await.expect("start");
    assert_eq!(
        cluster.persisted_state().await.expect("state"),
        ClusterState::Nominal
    );
    assert_eq!(
        rig.provider.host_state(&gateway.id).await.expect("state"),
        flotilla_provider::HostState::Started
    );

    // Start from nominal is a no-op.
    cluster.start(&ctx).await.expect("start again");
}

/// Deleting a cluster removes hosts, subnet, network and metadata; a second
/// delete reports not-found, which the API layer treats as success.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_then_delete_again() {
    let rig = rig();
    let ctx = TaskContext::root();

    let cluster = Cluster::create(&ctx, rig.services.clone(), boh_request("c3", "192.168.207.0/24"))
        .await
        .expect("create");

    cluster.delete(&ctx).await.expect("delete");
    assert!(rig.provider.hosts.is_empty());
    assert!(rig.provider.subnets.is_empty());
    assert!(rig.provider.networks.is_empty());
    // Both metadata folders are empty again.
    assert!(rig.storage.is_empty());
    assert!(rig
        .services
        .clusters
        .read("c3")
        .await
        .unwrap_err()
        .is_not_found());

    let err = cluster.delete(&ctx).await.expect_err("second delete");
    assert!(err.is_not_found());
}

/// Shrink boundaries: zero is a no-op, shrinking more than available fails
/// before any metadata changes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shrink_boundaries() {
    let rig = rig();
    let ctx = TaskContext::root();

    let cluster = Cluster::create(&ctx, rig.services.clone(), boh_request("c4", "192.168.208.0/24"))
        .await
        .expect("create");

    assert!(cluster.shrink(&ctx, 0).await.expect("shrink 0").is_empty());

    let err = cluster.shrink(&ctx, 5).await.expect_err("shrink too many");
    assert!(matches!(
        err.kind(),
        flotilla_cluster::ErrorKind::InvalidRequest { .. }
    ));
    assert_eq!(cluster.list_nodes().await.expect("nodes").len(), 1);
}

/// A request naming an existing network reuses it and leaves it alone on
/// delete.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_keeps_borrowed_network() {
    let rig = rig();
    let ctx = TaskContext::root();

    let existing = rig
        .provider
        .create_network(&flotilla_provider::NetworkRequest {
            name: "shared".to_string(),
            cidr: "10.0.0.0/16".to_string(),
        })
        .await
        .expect("existing network");

    let mut req = boh_request("c5", "10.0.1.0/24");
    req.network_id = Some(existing.id.clone());

    let cluster = Cluster::create(&ctx, rig.services.clone(), req)
        .await
        .expect("create");
    let network = cluster.network_config().await.expect("network");
    assert_eq!(network.network_id, existing.id);

    cluster.delete(&ctx).await.expect("delete");
    // The borrowed network survives the cluster.
    assert!(rig.provider.networks.contains_key(&existing.id));
    assert!(rig.provider.subnets.is_empty());
}
