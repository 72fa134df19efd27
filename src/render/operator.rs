//! Manifests that install the operator itself
//!
//! Printed by the `manifests` command; never applied by the controller.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction,
    ObjectFieldSelector, PodSecurityContext, PodSpec, PodTemplateSpec, Probe, SeccompProfile,
    SecurityContext, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResourceExt;
use serde::Serialize;

use super::monitoring::{PROMETHEUS_LABEL_KEY, PROMETHEUS_LABEL_VALUE};
use super::{requests, rule, strings};
use crate::config::OperatorConfig;
use crate::crd::NetworkAddonsConfig;
use crate::{Error, Result, API_GROUP, OPERATOR_NAME, VERSION_ANNOTATION};

/// Port of the operator health server, also the kube-rbac-proxy upstream
const HEALTH_PORT: i32 = 8080;

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([("name".to_string(), OPERATOR_NAME.to_string())])
}

fn namespaced_meta(config: &OperatorConfig) -> ObjectMeta {
    ObjectMeta {
        name: Some(OPERATOR_NAME.to_string()),
        namespace: Some(config.operand_namespace.clone()),
        labels: Some(labels()),
        ..Default::default()
    }
}

fn cluster_meta() -> ObjectMeta {
    ObjectMeta {
        name: Some(OPERATOR_NAME.to_string()),
        labels: Some(labels()),
        ..Default::default()
    }
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn value_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn http_probe(path: &str, initial_delay_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String("health".to_string()),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(10),
        ..Default::default()
    }
}

fn hardened() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Operator Deployment with the metrics proxy sidecar
pub fn deployment(config: &OperatorConfig, image_pull_policy: &str) -> Deployment {
    let image = config.operator_image();

    let mut env: Vec<EnvVar> = config
        .images
        .env_pairs()
        .iter()
        .map(|(name, reference)| value_env(name, reference))
        .collect();
    env.extend([
        value_env("OPERATOR_IMAGE", &image),
        value_env("OPERATOR_NAME", OPERATOR_NAME),
        value_env("OPERATOR_VERSION", &config.operator_version),
        field_env("OPERATOR_NAMESPACE", "metadata.namespace"),
        field_env("OPERAND_NAMESPACE", "metadata.namespace"),
        field_env("POD_NAME", "metadata.name"),
        value_env("MONITORING_NAMESPACE", &config.monitoring_namespace),
        value_env("MONITORING_SERVICE_ACCOUNT", &config.monitoring_service_account),
    ]);

    let operator = Container {
        name: OPERATOR_NAME.to_string(),
        image: Some(image),
        image_pull_policy: Some(image_pull_policy.to_string()),
        resources: Some(requests("50m", "30Mi")),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            name: Some("health".to_string()),
            protocol: Some("TCP".to_string()),
            container_port: HEALTH_PORT,
            ..Default::default()
        }]),
        liveness_probe: Some(http_probe("/healthz", 15)),
        readiness_probe: Some(http_probe("/readyz", 5)),
        security_context: Some(hardened()),
        ..Default::default()
    };

    let proxy = Container {
        name: "kube-rbac-proxy".to_string(),
        image: Some(config.images.kube_rbac_proxy.reference.clone()),
        image_pull_policy: Some(image_pull_policy.to_string()),
        ports: Some(vec![ContainerPort {
            name: Some("metrics".to_string()),
            protocol: Some("TCP".to_string()),
            container_port: 8443,
            ..Default::default()
        }]),
        args: Some(strings(&[
            "--logtostderr",
            "--secure-listen-address=:8443",
            "--upstream=http://127.0.0.1:8080",
        ])),
        resources: Some(requests("10m", "20Mi")),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        security_context: Some(hardened()),
        ..Default::default()
    };

    let mut template_labels = labels();
    template_labels.insert(PROMETHEUS_LABEL_KEY.to_string(), PROMETHEUS_LABEL_VALUE.to_string());

    let mut metadata = namespaced_meta(config);
    metadata.annotations = Some(BTreeMap::from([(
        VERSION_ANNOTATION.to_string(),
        config.operator_version.clone(),
    )]));
    if let Some(labels) = metadata.labels.as_mut() {
        labels.insert(PROMETHEUS_LABEL_KEY.to_string(), PROMETHEUS_LABEL_VALUE.to_string());
    }

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(template_labels),
                    annotations: Some(BTreeMap::from([(
                        "description".to_string(),
                        "cluster-network-addons-operator manages the lifecycle of different Kubernetes network components on top of Kubernetes cluster".to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(OPERATOR_NAME.to_string()),
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(true),
                        seccomp_profile: Some(SeccompProfile {
                            type_: "RuntimeDefault".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    priority_class_name: Some("system-cluster-critical".to_string()),
                    containers: vec![operator, proxy],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Namespaced permissions of the operator
pub fn role(config: &OperatorConfig) -> Role {
    let verbs = ["get", "list", "watch", "create", "patch", "update", "delete"];
    Role {
        metadata: namespaced_meta(config),
        rules: Some(vec![
            rule(&[""], &["pods", "configmaps", "secrets", "services", "serviceaccounts"], &verbs),
            rule(&["apps"], &["deployments", "daemonsets", "replicasets"], &verbs),
            rule(&["rbac.authorization.k8s.io"], &["roles", "rolebindings"], &verbs),
        ]),
    }
}

/// Cluster-wide permissions of the operator
pub fn cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: cluster_meta(),
        rules: Some(vec![
            rule(&["security.openshift.io"], &["securitycontextconstraints"], &["get", "list", "watch"]),
            rule(&["operator.openshift.io"], &["networks"], &["get", "list", "watch"]),
            rule(
                &[API_GROUP],
                &["networkaddonsconfigs", "networkaddonsconfigs/status"],
                &["get", "list", "watch", "update", "patch"],
            ),
            rule(&["*"], &["*"], &["*"]),
        ]),
        ..Default::default()
    }
}

fn subject(config: &OperatorConfig) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: OPERATOR_NAME.to_string(),
        namespace: Some(config.operand_namespace.clone()),
        ..Default::default()
    }
}

/// Binding of [`role`] to the operator service account
pub fn role_binding(config: &OperatorConfig) -> RoleBinding {
    RoleBinding {
        metadata: namespaced_meta(config),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: OPERATOR_NAME.to_string(),
        },
        subjects: Some(vec![subject(config)]),
    }
}

/// Binding of [`cluster_role`] to the operator service account
pub fn cluster_role_binding(config: &OperatorConfig) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: cluster_meta(),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: OPERATOR_NAME.to_string(),
        },
        subjects: Some(vec![subject(config)]),
    }
}

/// Service account the operator runs as
pub fn service_account(config: &OperatorConfig) -> ServiceAccount {
    ServiceAccount {
        metadata: namespaced_meta(config),
        ..Default::default()
    }
}

fn document(out: &mut String, object: &impl Serialize) -> Result<()> {
    let yaml = serde_yaml::to_string(object).map_err(|e| Error::serialization(e.to_string()))?;
    out.push_str("---\n");
    out.push_str(&yaml);
    Ok(())
}

/// Every installation manifest as one multi-document YAML stream
pub fn manifests(config: &OperatorConfig) -> Result<String> {
    let mut out = String::new();
    document(&mut out, &NetworkAddonsConfig::crd())?;
    document(&mut out, &service_account(config))?;
    document(&mut out, &role(config))?;
    document(&mut out, &role_binding(config))?;
    document(&mut out, &cluster_role())?;
    document(&mut out, &cluster_role_binding(config))?;
    document(&mut out, &deployment(config, super::DEFAULT_PULL_POLICY))?;
    document(&mut out, &NetworkAddonsConfig::sample())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_deployment_exports_every_image() {
        let config = OperatorConfig::default();
        let deployment = deployment(&config, "IfNotPresent");
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.priority_class_name.as_deref(), Some("system-cluster-critical"));

        let env = pod.containers[0].env.clone().unwrap();
        for (name, reference) in config.images.env_pairs() {
            let var = env.iter().find(|e| e.name == name).unwrap();
            assert_eq!(var.value.as_deref(), Some(reference));
        }
        assert!(env.iter().any(|e| e.name == "OPERATOR_IMAGE"));

        let proxy = &pod.containers[1];
        assert_eq!(proxy.name, "kube-rbac-proxy");
        assert!(proxy
            .args
            .as_ref()
            .unwrap()
            .contains(&"--upstream=http://127.0.0.1:8080".to_string()));
    }

    #[test]
    fn test_operator_health_checks_target_health_port() {
        let deployment = deployment(&OperatorConfig::default(), "IfNotPresent");
        let operator = deployment.spec.unwrap().template.spec.unwrap().containers.remove(0);

        let port = &operator.ports.as_ref().unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("health"));
        assert_eq!(port.container_port, 8080);

        let target = |probe: Option<Probe>| {
            let get = probe.unwrap().http_get.unwrap();
            (get.path.unwrap(), get.port)
        };
        assert_eq!(
            target(operator.liveness_probe),
            ("/healthz".to_string(), IntOrString::String("health".to_string()))
        );
        assert_eq!(
            target(operator.readiness_probe),
            ("/readyz".to_string(), IntOrString::String("health".to_string()))
        );
    }

    #[test]
    fn test_manifests_stream_contains_crd_and_sample() {
        let yaml = manifests(&OperatorConfig::default()).unwrap();
        let docs: Vec<serde_yaml::Value> = yaml
            .split("---\n")
            .filter(|d| !d.trim().is_empty())
            .map(|d| serde_yaml::from_str(d).unwrap())
            .collect();
        let kinds: Vec<&str> = docs.iter().map(|d| d["kind"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec![
                "CustomResourceDefinition",
                "ServiceAccount",
                "Role",
                "RoleBinding",
                "ClusterRole",
                "ClusterRoleBinding",
                "Deployment",
                "NetworkAddonsConfig",
            ]
        );
        assert_eq!(docs[7]["metadata"]["name"].as_str(), Some("cluster"));
    }
}
