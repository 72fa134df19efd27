//! Certificate material flowing from the rotation engine into rendered objects
//!
//! The engine and the controller never call each other: the controller
//! publishes a plan, the engine writes the store, and the next pass reads
//! the CA bundle back out of it.

use std::sync::Arc;

use chrono::Duration;

use network_addons_operator::certs::{RcgenIssuer, RotationEngine, TickReport, CA_SECRET_NAME};
use network_addons_operator::controller::{run_pass, Context};
use network_addons_operator::crd::{KubeMacPool, Multus, NetworkAddonsConfigSpec, SelfSignConfiguration};
use network_addons_operator::render::ObjectKind;

use super::fake::{config, context, t0, FakeCluster, MemoryCertStore};

/// Run one engine tick against the plan the controller last published
pub async fn issue_certificates(ctx: &Context, certs: &Arc<MemoryCertStore>) -> TickReport {
    let plan = ctx
        .subscribe_plans()
        .borrow()
        .clone()
        .expect("a pass publishes a rotation plan");
    let engine = RotationEngine::new(certs.clone(), Arc::new(RcgenIssuer));
    engine.tick(&plan, t0()).await.unwrap()
}

fn kubemacpool() -> NetworkAddonsConfigSpec {
    NetworkAddonsConfigSpec {
        kube_mac_pool: Some(KubeMacPool::default()),
        ..Default::default()
    }
}

/// Story: the webhook picks up the CA once the engine has issued it
///
/// The first pass renders the webhook without a caBundle. After the engine
/// writes the CA and the service certificates, the next pass injects the
/// bundle, and the pass after that has nothing left to write.
#[tokio::test]
async fn story_ca_bundle_reaches_the_webhook() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    cluster.put_config(config("cluster", kubemacpool()));
    let ctx = context(&cluster, &certs);

    run_pass(&ctx, t0()).await.unwrap();
    let webhook = cluster
        .objects()
        .into_iter()
        .map(|(key, _)| key)
        .find(|key| key.kind == ObjectKind::MutatingWebhookConfiguration)
        .unwrap();
    let body = cluster.object(&webhook).unwrap();
    assert!(body["webhooks"][0]["clientConfig"]["caBundle"].is_null());

    let report = issue_certificates(&ctx, &certs).await;
    assert!(report.ca_rotated);
    assert_eq!(report.issued, vec!["kubemacpool-service", "kubemacpool-metrics"]);
    assert!(certs.names().contains(&CA_SECRET_NAME.to_string()));
    cluster.take_writes();

    let outcome = run_pass(&ctx, t0() + Duration::seconds(10)).await.unwrap();
    assert!(outcome.writes > 0);
    let writes = cluster.take_writes();
    assert!(writes.applied.iter().any(|(key, _)| key == &webhook));

    let body = cluster.object(&webhook).unwrap();
    let bundle = body["webhooks"][0]["clientConfig"]["caBundle"].as_str().unwrap();
    assert!(!bundle.is_empty());

    let settled = run_pass(&ctx, t0() + Duration::seconds(20)).await.unwrap();
    assert_eq!(settled.writes, 0);
}

/// Story: the rotation plan follows the config
///
/// The schedule comes from selfSignConfiguration and the service list from
/// the enabled components. Components without TLS services leave the list
/// empty.
#[tokio::test]
async fn story_rotation_plan_follows_the_config() {
    let cluster = FakeCluster::with_nodes(2);
    let certs = Arc::new(MemoryCertStore::default());
    let mut spec = kubemacpool();
    spec.self_sign_configuration = Some(SelfSignConfiguration {
        ca_rotate_interval: Some("48h".to_string()),
        ca_overlap_interval: Some("4h".to_string()),
        cert_rotate_interval: Some("12h".to_string()),
        cert_overlap_interval: Some("1h".to_string()),
    });
    cluster.put_config(config("cluster", spec));
    let ctx = context(&cluster, &certs);
    let mut plans = ctx.subscribe_plans();

    run_pass(&ctx, t0()).await.unwrap();
    assert!(plans.has_changed().unwrap());
    let plan = plans.borrow_and_update().clone().unwrap();
    assert_eq!(plan.schedule.ca_rotate, Duration::hours(48));
    assert_eq!(plan.schedule.cert_rotate, Duration::hours(12));
    assert_eq!(plan.services.len(), 2);

    // Unchanged config publishes nothing new
    run_pass(&ctx, t0() + Duration::seconds(30)).await.unwrap();
    assert!(!plans.has_changed().unwrap());

    cluster.put_config(config(
        "cluster",
        NetworkAddonsConfigSpec {
            multus: Some(Multus::default()),
            ..Default::default()
        },
    ));
    run_pass(&ctx, t0() + Duration::seconds(60)).await.unwrap();
    let plan = plans.borrow_and_update().clone().unwrap();
    assert!(plan.services.is_empty());
}
