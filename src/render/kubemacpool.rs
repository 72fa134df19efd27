//! KubeMacPool MAC allocator
//!
//! The only infra-role component. Its manager serves a mutating webhook and
//! metrics, both over TLS with certificates maintained by the rotation engine:
//! the webhook certificate lives in the `kubemacpool-service` Secret and the
//! metrics proxy certificate in `kubemacpool-metrics`. Both Secret volumes are
//! optional so the pod starts before the first issuance.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapKeySelector, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction,
    ObjectFieldSelector, PodTemplateSpec, Probe, SecretVolumeSource, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;

use super::monitoring::{PROMETHEUS_LABEL_KEY, PROMETHEUS_LABEL_VALUE};
use super::{
    container, meta, metrics_proxy, pod_labels, pod_spec, push_cluster_rbac, requests, rule,
    strings, ComponentSpec, Objects,
};
use crate::Result;

pub(super) const NAME: &str = "kubemacpool";
pub(super) const MANAGER: &str = "kubemacpool-mac-controller-manager";
pub(super) const CONFIG_MAP: &str = "kubemacpool-mac-range-config";
/// Service fronting the admission webhook
pub const WEBHOOK_SERVICE: &str = "kubemacpool-service";
/// Service fronting the metrics proxy
pub const METRICS_SERVICE: &str = "kubemacpool-metrics";
pub(super) const MUTATOR: &str = "kubemacpool-mutator";

const WEBHOOK_PORT: i32 = 8000;
const WEBHOOK_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";
const METRICS_CERT_DIR: &str = "/etc/metrics-certs";
const MANAGER_METRICS_PORT: u16 = 8080;

pub(super) fn render(spec: &ComponentSpec, out: &mut Objects<'_>) -> Result<()> {
    push_cluster_rbac(
        out,
        spec,
        NAME,
        vec![
            rule(&[""], &["pods", "namespaces"], &["get", "list", "watch"]),
            rule(&[""], &["configmaps"], &["get", "list", "watch", "create", "update", "patch"]),
            rule(&[""], &["events"], &["create", "patch"]),
            rule(&["kubevirt.io"], &["virtualmachines"], &["get", "list", "watch", "update", "patch"]),
            rule(&["coordination.k8s.io"], &["leases"], &["get", "list", "watch", "create", "update", "patch"]),
        ],
    )?;

    if let Some(range) = &spec.mac_range {
        out.push(ConfigMap {
            metadata: meta(CONFIG_MAP),
            data: Some(BTreeMap::from([
                ("RANGE_START".to_string(), range.start.clone()),
                ("RANGE_END".to_string(), range.end.clone()),
            ])),
            ..Default::default()
        })?;
    }

    out.push(deployment(spec))?;
    out.push(service(spec, WEBHOOK_SERVICE, 443, IntOrString::Int(WEBHOOK_PORT), "webhook"))?;
    out.push(service(spec, METRICS_SERVICE, 8443, IntOrString::String("metrics".to_string()), "metrics"))?;
    out.push(mutating_webhook(spec))
}

fn range_env(name: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            config_map_key_ref: Some(ConfigMapKeySelector {
                name: CONFIG_MAP.to_string(),
                key: name.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            optional: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment(spec: &ComponentSpec) -> Deployment {
    let labels = pod_labels(spec, MANAGER);
    let mut template_labels = labels.clone();
    template_labels.insert(
        PROMETHEUS_LABEL_KEY.to_string(),
        PROMETHEUS_LABEL_VALUE.to_string(),
    );

    let mut manager = container(spec, "manager", &spec.images.kube_mac_pool.reference);
    manager.command = Some(strings(&["/manager"]));
    manager.args = Some(vec![
        "--v=production".to_string(),
        "--wait-time=600".to_string(),
        format!("--cert-dir={WEBHOOK_CERT_DIR}"),
        format!("--metrics-addr=127.0.0.1:{MANAGER_METRICS_PORT}"),
    ]);
    manager.env = Some(vec![
        range_env("RANGE_START"),
        range_env("RANGE_END"),
        EnvVar {
            name: "POD_NAMESPACE".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]);
    manager.ports = Some(vec![ContainerPort {
        name: Some("webhook".to_string()),
        container_port: WEBHOOK_PORT,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }]);
    manager.readiness_probe = Some(Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/readyz".to_string()),
            port: IntOrString::Int(WEBHOOK_PORT),
            scheme: Some("HTTPS".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        ..Default::default()
    });
    manager.resources = Some(requests("100m", "300Mi"));
    manager.volume_mounts = Some(vec![VolumeMount {
        name: "tls-key-pair".to_string(),
        mount_path: WEBHOOK_CERT_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }]);

    let mut proxy = metrics_proxy(spec, MANAGER_METRICS_PORT, Some(METRICS_CERT_DIR));
    proxy.volume_mounts = Some(vec![VolumeMount {
        name: "metrics-tls".to_string(),
        mount_path: METRICS_CERT_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }]);

    let mut pod = pod_spec(spec, Some(NAME), vec![manager, proxy]);
    pod.priority_class_name = Some("system-cluster-critical".to_string());
    pod.volumes = Some(vec![
        secret_volume("tls-key-pair", WEBHOOK_SERVICE),
        secret_volume("metrics-tls", METRICS_SERVICE),
    ]);

    Deployment {
        metadata: meta(MANAGER),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(template_labels),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(spec: &ComponentSpec, name: &str, port: i32, target: IntOrString, port_name: &str) -> Service {
    Service {
        metadata: meta(name),
        spec: Some(ServiceSpec {
            selector: Some(pod_labels(spec, MANAGER)),
            ports: Some(vec![ServicePort {
                name: Some(port_name.to_string()),
                port,
                target_port: Some(target),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mutating_webhook(spec: &ComponentSpec) -> MutatingWebhookConfiguration {
    let ca_bundle = (!spec.ca_bundle.is_empty()).then(|| ByteString(spec.ca_bundle.as_bytes().to_vec()));
    let webhook = |name: &str, path: &str, group: &str, resource: &str, failure_policy: &str, opt_in: &str| {
        MutatingWebhook {
            name: name.to_string(),
            admission_review_versions: strings(&["v1", "v1beta1"]),
            client_config: WebhookClientConfig {
                ca_bundle: ca_bundle.clone(),
                service: Some(ServiceReference {
                    name: WEBHOOK_SERVICE.to_string(),
                    namespace: spec.namespace.clone(),
                    path: Some(path.to_string()),
                    port: Some(443),
                }),
                url: None,
            },
            failure_policy: Some(failure_policy.to_string()),
            side_effects: "None".to_string(),
            namespace_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: opt_in.to_string(),
                    operator: "NotIn".to_string(),
                    values: Some(strings(&["ignore"])),
                }]),
                ..Default::default()
            }),
            rules: Some(vec![RuleWithOperations {
                api_groups: Some(vec![group.to_string()]),
                api_versions: Some(strings(&["v1"])),
                operations: Some(strings(&["CREATE", "UPDATE"])),
                resources: Some(vec![resource.to_string()]),
                scope: None,
            }]),
            ..Default::default()
        }
    };

    MutatingWebhookConfiguration {
        metadata: meta(MUTATOR),
        webhooks: Some(vec![
            webhook(
                "mutatepods.kubemacpool.io",
                "/mutate-pods",
                "",
                "pods",
                "Ignore",
                "mutatepods.kubemacpool.io",
            ),
            webhook(
                "mutatevirtualmachines.kubemacpool.io",
                "/mutate-virtualmachines",
                "kubevirt.io",
                "virtualmachines",
                "Fail",
                "mutatevirtualmachines.kubemacpool.io",
            ),
        ]),
    }
}
