//! Placement resolution for rendered workloads
//!
//! Components run in one of two roles. Infra components (the KubeMacPool
//! manager) prefer control-plane nodes; workload components (the CNI plugin
//! DaemonSets) run on every node. Each component may carry its own placement
//! override on top of the role default.
//!
//! Overrides replace whole fields: a component that only sets `nodeSelector`
//! keeps the role's affinity and tolerations untouched, while a component that
//! sets `tolerations` replaces the role's toleration list entirely. Individual
//! affinity terms are never merged.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelectorRequirement, NodeSelectorTerm, PreferredSchedulingTerm,
    Toleration,
};

use crate::crd::{Placement, PlacementConfiguration};

/// Node label identifying control-plane nodes
pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Legacy node label identifying control-plane nodes
pub const MASTER_LABEL: &str = "node-role.kubernetes.io/master";

/// Placement scope of a component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Cluster-wide controllers, preferably on control-plane nodes
    Infra,
    /// Per-node agents
    Workloads,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Infra => write!(f, "infra"),
            Self::Workloads => write!(f, "workloads"),
        }
    }
}

/// Concrete scheduling stanza for a pod template
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedPlacement {
    /// Node selector, empty when unconstrained
    pub node_selector: BTreeMap<String, String>,
    /// Affinity rules
    pub affinity: Option<Affinity>,
    /// Tolerations
    pub tolerations: Vec<Toleration>,
}

/// Built-in placement for a role when the user configured none
pub fn builtin_default(role: Role) -> Placement {
    match role {
        Role::Infra => Placement {
            node_selector: None,
            affinity: Some(Affinity {
                node_affinity: Some(NodeAffinity {
                    preferred_during_scheduling_ignored_during_execution: Some(
                        [CONTROL_PLANE_LABEL, MASTER_LABEL]
                            .into_iter()
                            .map(|label| PreferredSchedulingTerm {
                                weight: 10,
                                preference: NodeSelectorTerm {
                                    match_expressions: Some(vec![NodeSelectorRequirement {
                                        key: label.to_string(),
                                        operator: "Exists".to_string(),
                                        values: None,
                                    }]),
                                    match_fields: None,
                                },
                            })
                            .collect(),
                    ),
                    required_during_scheduling_ignored_during_execution: None,
                }),
                ..Default::default()
            }),
            tolerations: Some(
                [CONTROL_PLANE_LABEL, MASTER_LABEL]
                    .into_iter()
                    .map(|key| Toleration {
                        key: Some(key.to_string()),
                        operator: Some("Exists".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
        },
        Role::Workloads => Placement {
            node_selector: None,
            affinity: None,
            tolerations: Some(vec![Toleration {
                operator: Some("Exists".to_string()),
                ..Default::default()
            }]),
        },
    }
}

/// Role default: the user's per-role placement, else the built-in one
pub fn role_default(role: Role, config: Option<&PlacementConfiguration>) -> Placement {
    let configured = config.and_then(|c| match role {
        Role::Infra => c.infra.as_ref(),
        Role::Workloads => c.workloads.as_ref(),
    });
    configured.cloned().unwrap_or_else(|| builtin_default(role))
}

/// Merge a component override onto the role default, field by field
pub fn resolve(
    role: Role,
    component_override: Option<&Placement>,
    role_default: &Placement,
) -> ResolvedPlacement {
    let node_selector = component_override
        .and_then(|o| o.node_selector.as_ref())
        .filter(|m| !m.is_empty())
        .or(role_default.node_selector.as_ref())
        .cloned()
        .unwrap_or_default();

    let affinity = component_override
        .and_then(|o| o.affinity.as_ref())
        .filter(|a| !is_empty_affinity(a))
        .or(role_default.affinity.as_ref())
        .cloned();

    let tolerations = component_override
        .and_then(|o| o.tolerations.as_ref())
        .filter(|t| !t.is_empty())
        .or(role_default.tolerations.as_ref())
        .cloned()
        .unwrap_or_default();

    tracing::trace!(%role, selector_keys = node_selector.len(), "resolved placement");

    ResolvedPlacement {
        node_selector,
        affinity,
        tolerations,
    }
}

fn is_empty_affinity(affinity: &Affinity) -> bool {
    affinity.node_affinity.is_none()
        && affinity.pod_affinity.is_none()
        && affinity.pod_anti_affinity.is_none()
}
