//! Process-wide settings read from the environment once at startup
//!
//! Every value has a documented default so the operator runs with an empty
//! environment. Malformed values are logged and replaced by their default.

use std::time::Duration;

use tracing::warn;

use crate::duration::parse_duration;
use crate::images::{AddonsImages, ImageOverrides};
use crate::{DEFAULT_DEGRADED_GRACE_PERIOD, DEFAULT_OPERAND_NAMESPACE, OPERATOR_NAME};

/// Default namespace of the cluster monitoring stack
pub const DEFAULT_MONITORING_NAMESPACE: &str = "openshift-monitoring";

/// Default service account Prometheus scrapes with
pub const DEFAULT_MONITORING_SERVICE_ACCOUNT: &str = "prometheus-k8s";

/// Default registry for the operator image
pub const DEFAULT_IMAGE_REGISTRY: &str = "quay.io";

/// Default repository for the operator image
pub const DEFAULT_IMAGE_REPOSITORY: &str = "kubevirt";

/// Operator settings derived from the environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Version of this operator build
    pub operator_version: String,
    /// Namespace the operands are deployed into
    pub operand_namespace: String,
    /// Namespace of the monitoring stack allowed to scrape metrics
    pub monitoring_namespace: String,
    /// Service account of the monitoring stack
    pub monitoring_service_account: String,
    /// Registry of the operator image
    pub image_registry: String,
    /// Repository of the operator image
    pub image_repository: String,
    /// Tag of the operator image
    pub image_tag: String,
    /// Operand images
    pub images: AddonsImages,
    /// How long a component may stay unavailable before it is Degraded
    pub degraded_grace_period: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        let version = env!("CARGO_PKG_VERSION").to_string();
        Self {
            image_tag: format!("v{version}"),
            operator_version: version,
            operand_namespace: DEFAULT_OPERAND_NAMESPACE.to_string(),
            monitoring_namespace: DEFAULT_MONITORING_NAMESPACE.to_string(),
            monitoring_service_account: DEFAULT_MONITORING_SERVICE_ACCOUNT.to_string(),
            image_registry: DEFAULT_IMAGE_REGISTRY.to_string(),
            image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            images: AddonsImages::default(),
            degraded_grace_period: DEFAULT_DEGRADED_GRACE_PERIOD,
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary lookup function
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let operator_version = get("OPERATOR_VERSION").unwrap_or(defaults.operator_version);
        let image_tag = get("OPERATOR_IMAGE_TAG").unwrap_or_else(|| format!("v{operator_version}"));

        let degraded_grace_period = match get("DEGRADED_GRACE_PERIOD") {
            None => defaults.degraded_grace_period,
            Some(raw) => match parse_duration(&raw).map(|d| d.to_std()) {
                Ok(Ok(d)) => d,
                _ => {
                    warn!(value = %raw, "invalid DEGRADED_GRACE_PERIOD, using default");
                    defaults.degraded_grace_period
                }
            },
        };

        let images = AddonsImages::from_overrides(&ImageOverrides {
            multus: get("MULTUS_IMAGE"),
            linux_bridge_cni: get("LINUX_BRIDGE_IMAGE"),
            linux_bridge_marker: get("LINUX_BRIDGE_MARKER_IMAGE"),
            kube_mac_pool: get("KUBEMACPOOL_IMAGE"),
            ovs_cni: get("OVS_CNI_IMAGE"),
            macvtap_cni: get("MACVTAP_CNI_IMAGE"),
            kube_rbac_proxy: get("KUBE_RBAC_PROXY_IMAGE"),
        });

        Self {
            operator_version,
            operand_namespace: get("OPERAND_NAMESPACE")
                .or_else(|| get("OPERATOR_NAMESPACE"))
                .unwrap_or(defaults.operand_namespace),
            monitoring_namespace: get("MONITORING_NAMESPACE")
                .unwrap_or(defaults.monitoring_namespace),
            monitoring_service_account: get("MONITORING_SERVICE_ACCOUNT")
                .unwrap_or(defaults.monitoring_service_account),
            image_registry: get("IMAGE_REGISTRY").unwrap_or(defaults.image_registry),
            image_repository: get("IMAGE_REPOSITORY").unwrap_or(defaults.image_repository),
            image_tag,
            images,
            degraded_grace_period,
        }
    }

    /// Full reference of the operator image
    pub fn operator_image(&self) -> String {
        format!(
            "{}/{}/{}:{}",
            self.image_registry, self.image_repository, OPERATOR_NAME, self.image_tag
        )
    }
}
