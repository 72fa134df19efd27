//! End-to-end convergence scenarios
//!
//! Each test tells one story of an administrator editing the
//! NetworkAddonsConfig and what the operator makes of the cluster.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Duration;

use network_addons_operator::controller::{run_pass, REQUEUE_CONVERGING, RESYNC_INTERVAL};
use network_addons_operator::crd::{
    KubeMacPool, LinuxBridge, MacvtapCni, Multus, NetworkAddonsConfigSpec, Ovs, Placement,
    PlacementConfiguration,
};
use network_addons_operator::images::{
    DEFAULT_KUBEMACPOOL_IMAGE, DEFAULT_KUBE_RBAC_PROXY_IMAGE, DEFAULT_LINUX_BRIDGE_CNI_IMAGE,
    DEFAULT_LINUX_BRIDGE_MARKER_IMAGE, DEFAULT_MACVTAP_CNI_IMAGE, DEFAULT_MULTUS_IMAGE,
    DEFAULT_OVS_CNI_IMAGE,
};
use network_addons_operator::render::ObjectKind;

use super::fake::{config, context, t0, FakeCluster, MemoryCertStore};

fn all_components() -> NetworkAddonsConfigSpec {
    NetworkAddonsConfigSpec {
        multus: Some(Multus::default()),
        linux_bridge: Some(LinuxBridge::default()),
        kube_mac_pool: Some(KubeMacPool::default()),
        ovs: Some(Ovs::default()),
        macvtap_cni: Some(MacvtapCni::default()),
        ..Default::default()
    }
}

fn infra_on(label: &str) -> PlacementConfiguration {
    PlacementConfiguration {
        infra: Some(Placement {
            node_selector: Some(BTreeMap::from([(label.to_string(), "true".to_string())])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Scenario A: a component that cannot be scheduled
// =============================================================================

/// Story: KubeMacPool pinned to infra nodes that do not exist
///
/// The administrator enables only KubeMacPool and routes infra components to
/// nodes labelled `node-role.kubernetes.io/infra`, which no node carries. The
/// operator reports the scheduling failure right away, waits out the grace
/// period before calling the config Degraded, and never touches objects of
/// other components.
#[tokio::test]
async fn story_unschedulable_component_degrades_after_grace_period() {
    let cluster = FakeCluster::with_nodes(3);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config(
        "cluster",
        NetworkAddonsConfigSpec {
            kube_mac_pool: Some(KubeMacPool::default()),
            placement_configuration: Some(infra_on("node-role.kubernetes.io/infra")),
            ..Default::default()
        },
    ));
    let ctx = context(&cluster, &certs);

    let outcome = run_pass(&ctx, t0()).await.unwrap();
    assert_eq!(outcome.requeue_after, REQUEUE_CONVERGING);

    let status = cluster.status("cluster");
    let available = status.condition("Available").unwrap();
    assert!(!available.is_true());
    assert_eq!(available.reason, "Unschedulable");
    assert!(available.message.contains("didn't match"));
    assert_eq!(status.condition("KubeMacPoolAvailable").unwrap().reason, "Unschedulable");
    assert!(!status.condition("Degraded").unwrap().is_true());

    // Still inside the grace period
    run_pass(&ctx, t0() + Duration::seconds(120)).await.unwrap();
    assert!(!cluster.status("cluster").condition("Degraded").unwrap().is_true());

    run_pass(&ctx, t0() + Duration::seconds(301)).await.unwrap();
    let status = cluster.status("cluster");
    let degraded = status.condition("Degraded").unwrap();
    assert!(degraded.is_true());
    assert_eq!(degraded.reason, "Unschedulable");
    assert!(!status.condition("Available").unwrap().is_true());

    for (key, component) in cluster.objects() {
        assert!(
            matches!(component.as_deref(), Some("kubemacpool") | Some("monitoring")),
            "unexpected object {key} of {component:?}"
        );
    }
}

/// Story: labelling a node lets the stuck component recover
///
/// Once a node carries the infra label the Deployment becomes ready, and the
/// next pass clears both Degraded and the unavailable condition.
#[tokio::test]
async fn story_unschedulable_component_recovers() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config(
        "cluster",
        NetworkAddonsConfigSpec {
            kube_mac_pool: Some(KubeMacPool::default()),
            placement_configuration: Some(infra_on("kubernetes.io/hostname")),
            ..Default::default()
        },
    ));
    let ctx = context(&cluster, &certs);
    run_pass(&ctx, t0()).await.unwrap();
    run_pass(&ctx, t0() + Duration::seconds(400)).await.unwrap();
    assert!(cluster.status("cluster").condition("Degraded").unwrap().is_true());

    // Select an existing node by hostname instead
    cluster.put_config(config(
        "cluster",
        NetworkAddonsConfigSpec {
            kube_mac_pool: Some(KubeMacPool::default()),
            placement_configuration: Some(PlacementConfiguration {
                infra: Some(Placement {
                    node_selector: Some(BTreeMap::from([(
                        "kubernetes.io/hostname".to_string(),
                        "node-1".to_string(),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ));
    let outcome = run_pass(&ctx, t0() + Duration::seconds(460)).await.unwrap();

    assert_eq!(outcome.requeue_after, RESYNC_INTERVAL);
    let status = cluster.status("cluster");
    assert!(status.condition("Available").unwrap().is_true());
    assert!(!status.condition("Degraded").unwrap().is_true());
    assert!(status.condition("KubeMacPoolAvailable").unwrap().is_true());
}

// =============================================================================
// Scenario B: every component with default images
// =============================================================================

/// Story: enabling everything converges to Available with a full inventory
///
/// The container inventory lists exactly the default image of every
/// component plus the kube-rbac-proxy sidecar image.
#[tokio::test]
async fn story_all_components_become_available() {
    let cluster = FakeCluster::with_nodes(3);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config("cluster", all_components()));
    let ctx = context(&cluster, &certs);

    let outcome = run_pass(&ctx, t0()).await.unwrap();
    assert_eq!(outcome.requeue_after, RESYNC_INTERVAL);

    let status = cluster.status("cluster");
    let available = status.condition("Available").unwrap();
    assert!(available.is_true());
    assert_eq!(available.reason, "AsExpected");
    assert!(!status.condition("Progressing").unwrap().is_true());
    assert!(!status.condition("Degraded").unwrap().is_true());
    for condition in [
        "MultusAvailable",
        "LinuxBridgeAvailable",
        "KubeMacPoolAvailable",
        "OvsAvailable",
        "MacvtapCniAvailable",
    ] {
        assert!(status.condition(condition).unwrap().is_true(), "{condition}");
    }

    let images: BTreeSet<&str> = status.containers.iter().map(|c| c.image.as_str()).collect();
    let expected = BTreeSet::from([
        DEFAULT_MULTUS_IMAGE,
        DEFAULT_LINUX_BRIDGE_CNI_IMAGE,
        DEFAULT_LINUX_BRIDGE_MARKER_IMAGE,
        DEFAULT_KUBEMACPOOL_IMAGE,
        DEFAULT_OVS_CNI_IMAGE,
        DEFAULT_MACVTAP_CNI_IMAGE,
        DEFAULT_KUBE_RBAC_PROXY_IMAGE,
    ]);
    assert_eq!(images, expected);

    let mut sorted = status.containers.clone();
    sorted.sort();
    assert_eq!(status.containers, sorted);
    assert_eq!(status.observed_version, Some(ctx.operator.operator_version.clone()));
    assert_eq!(status.target_version, Some(ctx.operator.operator_version.clone()));
    assert!(ctx.metrics.export().contains("kubevirt_cnao_cr_ready 1"));
}

/// Story: the KubeMacPool metrics proxy gets ciphers it can parse
///
/// kube-rbac-proxy only understands IANA cipher names. The default
/// Intermediate profile reaches it translated, with the suites Go cannot
/// configure left out.
#[tokio::test]
async fn story_metrics_proxy_receives_iana_cipher_names() {
    let cluster = FakeCluster::with_nodes(3);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config("cluster", all_components()));
    let ctx = context(&cluster, &certs);
    run_pass(&ctx, t0()).await.unwrap();

    let (manager, _) = cluster
        .objects()
        .into_iter()
        .find(|(key, _)| key.kind == ObjectKind::Deployment && key.name == "kubemacpool-mac-controller-manager")
        .unwrap();
    let body = cluster.object(&manager).unwrap();
    let proxy = body["spec"]["template"]["spec"]["containers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "kube-rbac-proxy")
        .unwrap()
        .clone();
    let args: Vec<&str> = proxy["args"].as_array().unwrap().iter().filter_map(|a| a.as_str()).collect();

    assert!(args.contains(&"--tls-min-version=VersionTLS12"));
    let ciphers = args
        .iter()
        .find_map(|a| a.strip_prefix("--tls-cipher-suites="))
        .unwrap();
    assert_eq!(
        ciphers.split(',').collect::<Vec<_>>(),
        vec![
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
            "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
            "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
            "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
            "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        ]
    );
}

/// Story: a second pass over an unchanged cluster changes nothing
///
/// No object is written and the status, timestamps included, stays
/// byte-identical.
#[tokio::test]
async fn story_second_pass_is_idempotent() {
    let cluster = FakeCluster::with_nodes(3);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config("cluster", all_components()));
    let ctx = context(&cluster, &certs);

    run_pass(&ctx, t0()).await.unwrap();
    let first = cluster.status("cluster");
    assert!(!cluster.take_writes().is_empty());

    let outcome = run_pass(&ctx, t0() + Duration::seconds(300)).await.unwrap();

    assert_eq!(outcome.writes, 0);
    assert!(!outcome.status_written);
    assert!(cluster.take_writes().is_empty());
    assert_eq!(
        serde_json::to_string(&cluster.status("cluster")).unwrap(),
        serde_json::to_string(&first).unwrap()
    );
}

// =============================================================================
// Scenario C: operator liveness is separate from operand conditions
// =============================================================================

/// Story: stopping the operator leaves operand conditions alone
///
/// The operand status stays as last written while the operator's own
/// liveness signal goes down.
#[tokio::test]
async fn story_operator_liveness_is_independent_of_operands() {
    let cluster = FakeCluster::with_nodes(3);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config("cluster", all_components()));
    let ctx = context(&cluster, &certs);
    run_pass(&ctx, t0()).await.unwrap();
    let before = cluster.status("cluster");
    assert!(ctx.metrics.export().contains("kubevirt_cnao_operator_up 1"));

    ctx.metrics.shutdown();

    assert!(ctx.metrics.export().contains("kubevirt_cnao_operator_up 0"));
    assert!(!ctx.metrics.is_ready());
    assert_eq!(cluster.status("cluster"), before);
    assert!(before.condition("Available").unwrap().is_true());
}
