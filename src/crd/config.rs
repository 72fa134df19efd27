//! NetworkAddonsConfig Custom Resource Definition
//!
//! The singleton NetworkAddonsConfig named `cluster` declares which network
//! add-on components run on the cluster and how they are configured.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, ContainerInfo, KubeMacPool, LinuxBridge, MacvtapCni, Multus, Ovs,
    PlacementConfiguration, SelfSignConfiguration, TlsSecurityProfile,
};
use crate::CONFIG_NAME;

/// Desired state of the cluster's network add-ons
///
/// Each component toggle is enabled by its presence, even when empty:
/// `multus: {}` turns Multus on.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networkaddonsoperator.network.kubevirt.io",
    version = "v1",
    kind = "NetworkAddonsConfig",
    plural = "networkaddonsconfigs",
    shortname = "nac",
    status = "NetworkAddonsConfigStatus",
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.observedVersion"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAddonsConfigSpec {
    /// Multus meta CNI plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multus: Option<Multus>,

    /// Linux bridge CNI plugin and bridge marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux_bridge: Option<LinuxBridge>,

    /// KubeMacPool MAC allocation service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_mac_pool: Option<KubeMacPool>,

    /// OVS CNI plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovs: Option<Ovs>,

    /// Macvtap CNI plugin
    #[serde(rename = "macvtap", default, skip_serializing_if = "Option::is_none")]
    pub macvtap_cni: Option<MacvtapCni>,

    /// Image pull policy for every operand container (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Placement defaults by role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_configuration: Option<PlacementConfiguration>,

    /// TLS profile for TLS-terminating operands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_security_profile: Option<TlsSecurityProfile>,

    /// Self-signed certificate rotation schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_sign_configuration: Option<SelfSignConfiguration>,
}

/// Observed state written back by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAddonsConfigStatus {
    /// Ordered conditions: Available, Progressing, Degraded, then per component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Operand containers currently deployed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerInfo>,

    /// Version whose components were last observed fully available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_version: Option<String>,

    /// Version of the running operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_version: Option<String>,

    /// Version the operator is converging towards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
}

impl NetworkAddonsConfigStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

impl NetworkAddonsConfig {
    /// Whether this instance carries the singleton name and may be reconciled
    pub fn is_singleton(&self) -> bool {
        self.name_any() == CONFIG_NAME
    }

    /// Sample resource enabling every component with default settings
    pub fn sample() -> Self {
        Self::new(
            CONFIG_NAME,
            NetworkAddonsConfigSpec {
                multus: Some(Multus::default()),
                linux_bridge: Some(LinuxBridge::default()),
                kube_mac_pool: Some(KubeMacPool::default()),
                ovs: Some(Ovs::default()),
                macvtap_cni: Some(MacvtapCni::default()),
                image_pull_policy: Some("IfNotPresent".to_string()),
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_empty_toggle_means_enabled() {
        let spec: NetworkAddonsConfigSpec = serde_json::from_value(serde_json::json!({
            "multus": {},
            "macvtap": {}
        }))
        .unwrap();
        assert!(spec.multus.is_some());
        assert!(spec.macvtap_cni.is_some());
        assert!(spec.linux_bridge.is_none());
        assert!(spec.kube_mac_pool.is_none());
    }

    #[test]
    fn test_crd_is_cluster_scoped() {
        let crd = NetworkAddonsConfig::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "networkaddonsoperator.network.kubevirt.io");
        assert_eq!(crd.spec.names.plural, "networkaddonsconfigs");
    }

    #[test]
    fn test_sample_enables_every_component() {
        let sample = NetworkAddonsConfig::sample();
        assert!(sample.is_singleton());
        assert!(sample.spec.multus.is_some());
        assert!(sample.spec.linux_bridge.is_some());
        assert!(sample.spec.kube_mac_pool.is_some());
        assert!(sample.spec.ovs.is_some());
        assert!(sample.spec.macvtap_cni.is_some());
    }

    #[test]
    fn test_status_condition_lookup() {
        let now = chrono::Utc::now();
        let status = NetworkAddonsConfigStatus {
            conditions: vec![Condition::new(
                "Degraded",
                super::super::types::ConditionStatus::False,
                "AsExpected",
                "",
                now,
            )],
            ..Default::default()
        };
        assert!(status.condition("Degraded").is_some());
        assert!(status.condition("Available").is_none());
    }
}
