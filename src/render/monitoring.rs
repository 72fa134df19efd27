//! Scrape access for the cluster monitoring stack

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{meta, rule, ComponentSpec, Objects};
use crate::Result;

pub(super) const RBAC_NAME: &str = "cluster-network-addons-operator-monitoring";
pub(super) const SERVICE_NAME: &str = "cluster-network-addons-operator-prometheus-metrics";

/// Label on every pod whose metrics proxy Prometheus scrapes
pub(crate) const PROMETHEUS_LABEL_KEY: &str = "prometheus.cnao.io";
pub(crate) const PROMETHEUS_LABEL_VALUE: &str = "true";

pub(super) fn render(spec: &ComponentSpec, out: &mut Objects<'_>) -> Result<()> {
    out.push(Role {
        metadata: meta(RBAC_NAME),
        rules: Some(vec![rule(&[""], &["services", "endpoints", "pods"], &["get", "list", "watch"])]),
    })?;

    out.push(RoleBinding {
        metadata: meta(RBAC_NAME),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: RBAC_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: spec.monitoring.service_account.clone(),
            namespace: Some(spec.monitoring.namespace.clone()),
            ..Default::default()
        }]),
    })?;

    out.push(Service {
        metadata: meta(SERVICE_NAME),
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                PROMETHEUS_LABEL_KEY.to_string(),
                PROMETHEUS_LABEL_VALUE.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("metrics".to_string()),
                port: 8443,
                target_port: Some(IntOrString::String("metrics".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}
