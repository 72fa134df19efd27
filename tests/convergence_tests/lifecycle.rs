//! Lifecycle stories: disabling components, deleting the config, and
//! configs the operator refuses to act on.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde_json::json;

use network_addons_operator::controller::run_pass;
use network_addons_operator::crd::{KubeMacPool, Multus, NetworkAddonsConfigSpec, Ovs, TlsSecurityProfile};
use network_addons_operator::render::{ObjectKey, ObjectKind};

use super::fake::{config, context, t0, FakeCluster, MemoryCertStore, NAMESPACE};

fn multus_and_ovs() -> NetworkAddonsConfigSpec {
    NetworkAddonsConfigSpec {
        multus: Some(Multus::default()),
        ovs: Some(Ovs::default()),
        ..Default::default()
    }
}

fn keys_of(cluster: &FakeCluster, component: &str) -> BTreeSet<ObjectKey> {
    cluster
        .objects()
        .into_iter()
        .filter(|(_, c)| c.as_deref() == Some(component))
        .map(|(key, _)| key)
        .collect()
}

/// Story: disabling a component removes exactly its objects
#[tokio::test]
async fn story_disabling_a_component_prunes_only_its_objects() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config("cluster", multus_and_ovs()));
    let ctx = context(&cluster, &certs);
    run_pass(&ctx, t0()).await.unwrap();

    let ovs = keys_of(&cluster, "ovs-cni");
    let multus = keys_of(&cluster, "multus");
    assert!(!ovs.is_empty());
    assert!(cluster.status("cluster").condition("OvsAvailable").is_some());
    cluster.take_writes();

    cluster.put_config(config(
        "cluster",
        NetworkAddonsConfigSpec {
            multus: Some(Multus::default()),
            ..Default::default()
        },
    ));
    let outcome = run_pass(&ctx, t0() + Duration::seconds(30)).await.unwrap();

    let writes = cluster.take_writes();
    let deleted: BTreeSet<ObjectKey> = writes.deleted.into_iter().collect();
    assert_eq!(deleted, ovs);
    assert!(writes.applied.is_empty());
    assert_eq!(outcome.writes, ovs.len());
    assert_eq!(keys_of(&cluster, "multus"), multus);

    let status = cluster.status("cluster");
    assert!(status.condition("OvsAvailable").is_none());
    assert!(status.containers.iter().all(|c| !c.parent_name.contains("ovs")));
}

/// Story: deleting the config tears everything down
///
/// Every object carrying either managed-by label goes away, including the
/// certificate material. Objects the operator never labelled survive.
#[tokio::test]
async fn story_deleting_the_config_tears_everything_down() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config(
        "cluster",
        NetworkAddonsConfigSpec {
            multus: Some(Multus::default()),
            kube_mac_pool: Some(KubeMacPool::default()),
            ..Default::default()
        },
    ));
    let foreign = ObjectKey {
        kind: ObjectKind::ConfigMap,
        namespace: Some(NAMESPACE.to_string()),
        name: "someone-elses".to_string(),
    };
    cluster.put_foreign(
        foreign.clone(),
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "someone-elses", "namespace": NAMESPACE},
        }),
    );

    let ctx = context(&cluster, &certs);
    run_pass(&ctx, t0()).await.unwrap();
    super::certificates::issue_certificates(&ctx, &certs).await;
    assert!(!certs.names().is_empty());

    cluster.remove_config("cluster");
    let outcome = run_pass(&ctx, t0() + Duration::seconds(60)).await.unwrap();

    assert!(outcome.writes > 0);
    let remaining: Vec<ObjectKey> = cluster.objects().into_iter().map(|(key, _)| key).collect();
    assert_eq!(remaining, vec![foreign.clone()]);
    assert!(cluster.object(&foreign).is_some());
    assert!(certs.names().is_empty());
    assert!(ctx.subscribe_plans().borrow().is_none());

    // Nothing left to do
    let again = run_pass(&ctx, t0() + Duration::seconds(120)).await.unwrap();
    assert_eq!(again.writes, 0);
}

/// Story: a config being deleted is treated as already gone
#[tokio::test]
async fn story_terminating_config_is_torn_down() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config("cluster", multus_and_ovs()));
    let ctx = context(&cluster, &certs);
    run_pass(&ctx, t0()).await.unwrap();

    let mut terminating = config("cluster", multus_and_ovs());
    terminating.metadata.deletion_timestamp = Some(Time(t0() + Duration::seconds(10)));
    cluster.put_config(terminating);
    run_pass(&ctx, t0() + Duration::seconds(20)).await.unwrap();

    assert!(cluster.objects().is_empty());
}

/// Story: a config not named `cluster` is flagged and ignored
///
/// The operator only acts on the singleton. Any other config gets a
/// Degraded condition explaining why, and nothing is deployed for it.
#[tokio::test]
async fn story_misnamed_config_is_flagged_and_ignored() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config("my-addons", multus_and_ovs()));
    let ctx = context(&cluster, &certs);

    run_pass(&ctx, t0()).await.unwrap();

    assert!(cluster.objects().is_empty());
    let status = cluster.status("my-addons");
    let degraded = status.condition("Degraded").unwrap();
    assert!(degraded.is_true());
    assert_eq!(degraded.reason, "InvalidConfigurationName");
    cluster.take_writes();

    // Stable: no status churn on later passes
    run_pass(&ctx, t0() + Duration::seconds(300)).await.unwrap();
    assert!(cluster.take_writes().is_empty());
}

/// Story: a broken component does not hold back the others
///
/// A half-declared MAC range is a configuration error for KubeMacPool only.
/// Multus still converges, and the config is Degraded with the field named.
#[tokio::test]
async fn story_invalid_component_config_is_isolated() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config(
        "cluster",
        NetworkAddonsConfigSpec {
            multus: Some(Multus::default()),
            kube_mac_pool: Some(KubeMacPool {
                range_end: Some("02:00:00:ff:ff:ff".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ));
    let ctx = context(&cluster, &certs);

    run_pass(&ctx, t0()).await.unwrap();

    let status = cluster.status("cluster");
    assert!(status.condition("MultusAvailable").unwrap().is_true());
    let kmp = status.condition("KubeMacPoolAvailable").unwrap();
    assert!(!kmp.is_true());
    assert_eq!(kmp.reason, "InvalidConfiguration");
    let degraded = status.condition("Degraded").unwrap();
    assert!(degraded.is_true());
    assert!(degraded.message.contains("kubeMacPool"));
    assert!(keys_of(&cluster, "kubemacpool").is_empty());
    assert!(!keys_of(&cluster, "multus").is_empty());
}

/// Story: an unsupported TLS profile only affects the TLS endpoint
///
/// The Modern profile is rejected, which fails KubeMacPool (the only
/// component terminating TLS). Multus and the monitoring objects are
/// deployed regardless.
#[tokio::test]
async fn story_invalid_tls_profile_spares_components_without_tls() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config(
        "cluster",
        NetworkAddonsConfigSpec {
            multus: Some(Multus::default()),
            kube_mac_pool: Some(KubeMacPool::default()),
            tls_security_profile: Some(TlsSecurityProfile {
                type_: Some("Modern".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ));
    let ctx = context(&cluster, &certs);

    run_pass(&ctx, t0()).await.unwrap();

    let status = cluster.status("cluster");
    assert!(status.condition("MultusAvailable").unwrap().is_true());
    let kmp = status.condition("KubeMacPoolAvailable").unwrap();
    assert!(!kmp.is_true());
    assert_eq!(kmp.reason, "InvalidConfiguration");
    assert!(kmp.message.contains("tlsSecurityProfile"));
    assert!(status.condition("Degraded").unwrap().is_true());

    assert!(!keys_of(&cluster, "multus").is_empty());
    assert!(!keys_of(&cluster, "monitoring").is_empty());
    assert!(keys_of(&cluster, "kubemacpool").is_empty());
}

/// Story: a hand edit to a managed object is reverted
///
/// Someone swaps the Multus image and leaves the operator's annotations in
/// place. The next pass notices the content no longer matches and writes
/// the rendered object back; the pass after that is quiet again.
#[tokio::test]
async fn story_hand_edited_object_is_reverted() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config("cluster", multus_and_ovs()));
    let ctx = context(&cluster, &certs);
    run_pass(&ctx, t0()).await.unwrap();

    let multus = ObjectKey {
        kind: ObjectKind::DaemonSet,
        namespace: Some(NAMESPACE.to_string()),
        name: "multus".to_string(),
    };
    let image_of = |cluster: &FakeCluster| {
        cluster.object(&multus).unwrap()["spec"]["template"]["spec"]["containers"][0]["image"].clone()
    };
    let rendered_image = image_of(cluster.as_ref());
    cluster.edit(&multus, |body| {
        body["spec"]["template"]["spec"]["containers"][0]["image"] = json!("registry.example/multus:edited");
    });
    cluster.take_writes();

    let outcome = run_pass(&ctx, t0() + Duration::seconds(30)).await.unwrap();

    assert_eq!(outcome.writes, 1);
    let writes = cluster.take_writes();
    assert_eq!(writes.applied, vec![(multus.clone(), Some("multus".to_string()))]);
    assert_eq!(image_of(cluster.as_ref()), rendered_image);

    let settled = run_pass(&ctx, t0() + Duration::seconds(60)).await.unwrap();
    assert_eq!(settled.writes, 0);
}
