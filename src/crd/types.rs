//! Supporting types for the NetworkAddonsConfig CRD

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Affinity, Toleration};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Component toggles
// =============================================================================

/// Multus plugin enables attaching multiple network interfaces to Pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Multus {
    /// Placement override for this component's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

/// LinuxBridge plugin allows users to create a bridge and add the host and the container to it
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinuxBridge {
    /// Placement override for this component's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

/// KubeMacPool manages MAC allocation to Pods and VMs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeMacPool {
    /// First MAC address in the allocation range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<String>,

    /// Last MAC address in the allocation range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,

    /// Placement override for this component's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

/// Ovs plugin allows users to define networks on top of Open vSwitch bridges
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ovs {
    /// Placement override for this component's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

/// MacvtapCni plugin allows users to define networks on top of existing host interfaces
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MacvtapCni {
    /// Placement override for this component's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

// =============================================================================
// Placement
// =============================================================================

/// Scheduling constraints for one role or one component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    /// Node labels the pods must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Affinity scheduling rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Taints the pods tolerate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

/// Placement defaults keyed by role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlacementConfiguration {
    /// Placement for control-plane style components (KubeMacPool manager)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra: Option<Placement>,

    /// Placement for per-node components (CNI plugin DaemonSets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workloads: Option<Placement>,
}

// =============================================================================
// TLS security profile
// =============================================================================

/// Marker body for the predefined `old`/`intermediate`/`modern` profiles
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct NamedTlsProfile {}

/// User-defined TLS profile
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct CustomTlsProfile {
    /// Cipher suites negotiated during the handshake
    #[serde(default)]
    pub ciphers: Vec<String>,

    /// Minimum protocol version, e.g. `VersionTLS12`
    #[serde(rename = "minTLSVersion", default)]
    pub min_tls_version: String,
}

/// TLS security profile applied to every TLS-terminating operand
///
/// `type` selects one of `Old`, `Intermediate`, `Modern` or `Custom`. The
/// matching sibling field carries the profile body; only `custom` has content.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct TlsSecurityProfile {
    /// Profile type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Mozilla "old" backward compatibility profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<NamedTlsProfile>,

    /// Mozilla "intermediate" profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<NamedTlsProfile>,

    /// Mozilla "modern" profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modern: Option<NamedTlsProfile>,

    /// User-defined profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomTlsProfile>,
}

// =============================================================================
// Self-signed certificate schedule
// =============================================================================

/// Rotation schedule for the self-signed CA and service certificates
///
/// All values are duration strings such as `168h`, `1h30m` or `90s`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SelfSignConfiguration {
    /// How long a CA is used for signing before it is replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_rotate_interval: Option<String>,

    /// How long a replaced CA stays trusted next to its successor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_overlap_interval: Option<String>,

    /// How long a service certificate is served before it is replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_rotate_interval: Option<String>,

    /// How long a replaced service certificate stays valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_overlap_interval: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Map a boolean onto True/False
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Available, Degraded)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition changed status
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,

    /// Last time the condition was evaluated with a different reason or message
    #[serde(
        rename = "lastHeartbeatTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_heartbeat_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Create a condition that transitioned at `now`
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
            last_heartbeat_time: Some(now),
        }
    }

    /// Whether the condition currently reports True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// One operand container observed in a live workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    /// Kind of the owning workload (Deployment, DaemonSet)
    pub parent_kind: String,
    /// Name of the owning workload
    pub parent_name: String,
    /// Container name
    pub name: String,
    /// Container image reference
    pub image: String,
}
