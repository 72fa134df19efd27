//! Manifest rendering
//!
//! Turns a resolved [`ComponentSpec`] into the ordered list of cluster objects
//! for one component. Rendering is pure: the same spec always yields the same
//! objects with byte-identical canonical JSON, which is what the controller's
//! idempotent apply and its determinism check rely on.
//!
//! Every object gets the managed-by and component labels, the operator version
//! annotation, an owner reference to the NetworkAddonsConfig (when known) and
//! finally a `rendered-hash` annotation computed over everything else.

mod kubemacpool;
mod linux_bridge;
mod macvtap;
mod monitoring;
mod multus;
pub mod operator;
mod ovs;

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, Deployment, RollingUpdateDaemonSet,
};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, Container, PodSecurityContext, PodSpec, PodTemplateSpec,
    SeccompProfile, SecurityContext, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;

use crate::config::OperatorConfig;
use crate::crd::{NetworkAddonsConfig, NetworkAddonsConfigSpec, Placement};
use crate::images::AddonsImages;
use crate::placement::{self, ResolvedPlacement, Role as PlacementRole};
use crate::tls::ResolvedTlsProfile;
use crate::{
    Error, Result, COMPONENT_LABEL, MANAGED_BY_CONTROLLER, MANAGED_BY_LABEL,
    RENDERED_HASH_ANNOTATION, VERSION_ANNOTATION,
};

// =============================================================================
// Components
// =============================================================================

/// A deployable unit of the operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    /// Multus meta plugin
    Multus,
    /// Linux bridge CNI plugin and bridge marker
    LinuxBridge,
    /// KubeMacPool MAC allocator
    KubeMacPool,
    /// OVS CNI plugin
    Ovs,
    /// Macvtap CNI plugin and device plugin
    MacvtapCni,
    /// Metrics RBAC and Service, present whenever any other component is
    Monitoring,
}

impl Component {
    /// Every component in render and status order
    pub const ALL: [Component; 6] = [
        Self::Multus,
        Self::LinuxBridge,
        Self::KubeMacPool,
        Self::Ovs,
        Self::MacvtapCni,
        Self::Monitoring,
    ];

    /// Value of the component label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Multus => "multus",
            Self::LinuxBridge => "linux-bridge",
            Self::KubeMacPool => "kubemacpool",
            Self::Ovs => "ovs-cni",
            Self::MacvtapCni => "macvtap-cni",
            Self::Monitoring => "monitoring",
        }
    }

    /// Name used in condition types and messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::Multus => "Multus",
            Self::LinuxBridge => "LinuxBridge",
            Self::KubeMacPool => "KubeMacPool",
            Self::Ovs => "Ovs",
            Self::MacvtapCni => "MacvtapCni",
            Self::Monitoring => "Monitoring",
        }
    }

    /// Per-component status condition type, `None` for components without workloads
    pub fn condition_type(&self) -> Option<String> {
        match self {
            Self::Monitoring => None,
            other => Some(format!("{}Available", other.name())),
        }
    }

    /// Placement role, `None` for components without pods
    pub fn role(&self) -> Option<PlacementRole> {
        match self {
            Self::KubeMacPool => Some(PlacementRole::Infra),
            Self::Monitoring => None,
            _ => Some(PlacementRole::Workloads),
        }
    }

    /// Whether the config enables this component
    pub fn is_enabled(&self, spec: &NetworkAddonsConfigSpec) -> bool {
        match self {
            Self::Multus => spec.multus.is_some(),
            Self::LinuxBridge => spec.linux_bridge.is_some(),
            Self::KubeMacPool => spec.kube_mac_pool.is_some(),
            Self::Ovs => spec.ovs.is_some(),
            Self::MacvtapCni => spec.macvtap_cni.is_some(),
            Self::Monitoring => Self::ALL[..5].iter().any(|c| c.is_enabled(spec)),
        }
    }

    /// Components the config enables, in order
    pub fn enabled(spec: &NetworkAddonsConfigSpec) -> Vec<Component> {
        Self::ALL.into_iter().filter(|c| c.is_enabled(spec)).collect()
    }

    /// Placement override carried on the component's toggle
    pub fn placement_override<'a>(&self, spec: &'a NetworkAddonsConfigSpec) -> Option<&'a Placement> {
        match self {
            Self::Multus => spec.multus.as_ref()?.placement.as_ref(),
            Self::LinuxBridge => spec.linux_bridge.as_ref()?.placement.as_ref(),
            Self::KubeMacPool => spec.kube_mac_pool.as_ref()?.placement.as_ref(),
            Self::Ovs => spec.ovs.as_ref()?.placement.as_ref(),
            Self::MacvtapCni => spec.macvtap_cni.as_ref()?.placement.as_ref(),
            Self::Monitoring => None,
        }
    }

    /// Whether the component runs a TLS-terminating container
    pub fn terminates_tls(&self) -> bool {
        !self.tls_services().is_empty()
    }

    /// Services whose TLS certificates the rotation engine must maintain
    pub fn tls_services(&self) -> &'static [&'static str] {
        match self {
            Self::KubeMacPool => &[kubemacpool::WEBHOOK_SERVICE, kubemacpool::METRICS_SERVICE],
            _ => &[],
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Object identity
// =============================================================================

/// Kinds the renderer produces and the controller prunes
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    /// core/v1 ServiceAccount
    ServiceAccount,
    /// core/v1 ConfigMap
    ConfigMap,
    /// core/v1 Service
    Service,
    /// rbac/v1 Role
    Role,
    /// rbac/v1 RoleBinding
    RoleBinding,
    /// rbac/v1 ClusterRole
    ClusterRole,
    /// rbac/v1 ClusterRoleBinding
    ClusterRoleBinding,
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// admissionregistration/v1 MutatingWebhookConfiguration
    MutatingWebhookConfiguration,
}

impl ObjectKind {
    /// Every managed kind, scanned when pruning
    pub const ALL: [ObjectKind; 10] = [
        Self::ServiceAccount,
        Self::ConfigMap,
        Self::Service,
        Self::Role,
        Self::RoleBinding,
        Self::ClusterRole,
        Self::ClusterRoleBinding,
        Self::Deployment,
        Self::DaemonSet,
        Self::MutatingWebhookConfiguration,
    ];

    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceAccount => "ServiceAccount",
            Self::ConfigMap => "ConfigMap",
            Self::Service => "Service",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::MutatingWebhookConfiguration => "MutatingWebhookConfiguration",
        }
    }

    /// Look up a kind by its Kubernetes name
    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            Self::ClusterRole | Self::ClusterRoleBinding | Self::MutatingWebhookConfiguration
        )
    }

    /// API resource for dynamic clients
    pub fn api_resource(&self) -> ApiResource {
        match self {
            Self::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
            Self::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            Self::Service => ApiResource::erase::<Service>(&()),
            Self::Role => ApiResource::erase::<Role>(&()),
            Self::RoleBinding => ApiResource::erase::<RoleBinding>(&()),
            Self::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
            Self::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
            Self::Deployment => ApiResource::erase::<Deployment>(&()),
            Self::DaemonSet => ApiResource::erase::<DaemonSet>(&()),
            Self::MutatingWebhookConfiguration => {
                ApiResource::erase::<MutatingWebhookConfiguration>(&())
            }
        }
    }

    /// Whether health is read back from objects of this kind
    pub fn is_workload(&self) -> bool {
        matches!(self, Self::Deployment | Self::DaemonSet)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cluster object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Object kind
    pub kind: ObjectKind,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A rendered object ready to be applied
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestObject {
    key: ObjectKey,
    component: Component,
    hash: String,
    body: Value,
}

impl ManifestObject {
    /// Object identity
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Component that rendered the object
    pub fn component(&self) -> Component {
        self.component
    }

    /// Hash stored in the rendered-hash annotation
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Full object body including the hash annotation
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Canonical JSON text of the body. Object keys are always sorted.
    pub fn canonical(&self) -> String {
        self.body.to_string()
    }

    /// Pod selector labels of a workload object
    pub fn pod_selector(&self) -> Option<BTreeMap<String, String>> {
        let labels = self.body.pointer("/spec/selector/matchLabels")?;
        serde_json::from_value(labels.clone()).ok()
    }
}

/// Truncated SHA-256 of `input`, 16 hex characters
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

// =============================================================================
// Component spec
// =============================================================================

/// Valid values of `imagePullPolicy`
pub const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];

/// Pull policy used when the config has none
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// MAC address range handed to KubeMacPool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MacRange {
    /// First address
    pub start: String,
    /// Last address
    pub end: String,
}

/// Where the monitoring stack scrapes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitoringTarget {
    /// Namespace of the monitoring stack
    pub namespace: String,
    /// Service account Prometheus runs as
    pub service_account: String,
}

/// Everything needed to render one component, fully resolved
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentSpec {
    /// Component being rendered
    pub component: Component,
    /// Namespace for namespaced objects
    pub namespace: String,
    /// Operator version written into the version annotation
    pub operator_version: String,
    /// Operand images
    pub images: AddonsImages,
    /// Scheduling stanza for the component's pods
    pub placement: ResolvedPlacement,
    /// TLS settings, `None` for components that do not terminate TLS
    pub tls: Option<ResolvedTlsProfile>,
    /// Image pull policy for every container
    pub image_pull_policy: String,
    /// KubeMacPool allocation range
    pub mac_range: Option<MacRange>,
    /// PEM bundle of trusted CAs, empty before the first issuance
    pub ca_bundle: String,
    /// Monitoring stack identity
    pub monitoring: MonitoringTarget,
    /// Owner reference to the NetworkAddonsConfig
    pub owner: Option<OwnerReference>,
}

impl ComponentSpec {
    /// Resolve images, placement, TLS and options for `component`
    ///
    /// Returns a configuration error when the config is contradictory for
    /// this component. Settings are only validated for the components that
    /// consume them, so other components are unaffected.
    pub fn resolve(
        component: Component,
        config: &NetworkAddonsConfig,
        operator: &OperatorConfig,
        ca_bundle: &str,
    ) -> Result<Self> {
        let spec = &config.spec;
        let placement = match component.role() {
            Some(role) => {
                let role_default = placement::role_default(role, spec.placement_configuration.as_ref());
                placement::resolve(role, component.placement_override(spec), &role_default)
            }
            None => ResolvedPlacement::default(),
        };

        let mac_range = match component {
            Component::KubeMacPool => Some(resolve_mac_range(config)?),
            _ => None,
        };

        let tls = if component.terminates_tls() {
            Some(crate::tls::resolve_declared(spec.tls_security_profile.as_ref())?)
        } else {
            None
        };

        // Monitoring runs no pods
        let image_pull_policy = match component.role() {
            Some(_) => resolve_pull_policy(spec.image_pull_policy.as_deref())?,
            None => DEFAULT_PULL_POLICY.to_string(),
        };

        Ok(Self {
            component,
            namespace: operator.operand_namespace.clone(),
            operator_version: operator.operator_version.clone(),
            images: operator.images.clone(),
            placement,
            tls,
            image_pull_policy,
            mac_range,
            ca_bundle: ca_bundle.to_string(),
            monitoring: MonitoringTarget {
                namespace: operator.monitoring_namespace.clone(),
                service_account: operator.monitoring_service_account.clone(),
            },
            owner: config.controller_owner_ref(&()),
        })
    }
}

/// Validate `imagePullPolicy`, defaulting to `IfNotPresent`
pub fn resolve_pull_policy(declared: Option<&str>) -> Result<String> {
    match declared.map(str::trim) {
        None | Some("") => Ok(DEFAULT_PULL_POLICY.to_string()),
        Some(p) if PULL_POLICIES.contains(&p) => Ok(p.to_string()),
        Some(other) => Err(Error::configuration(
            "imagePullPolicy",
            format!("{other:?} is not one of Always, IfNotPresent, Never"),
        )),
    }
}

/// Validate the declared MAC range or derive a stable one from the config UID
fn resolve_mac_range(config: &NetworkAddonsConfig) -> Result<MacRange> {
    let declared = config.spec.kube_mac_pool.as_ref();
    let start = declared.and_then(|k| k.range_start.as_deref()).filter(|s| !s.is_empty());
    let end = declared.and_then(|k| k.range_end.as_deref()).filter(|s| !s.is_empty());

    match (start, end) {
        (Some(start), Some(end)) => {
            let first = parse_mac("kubeMacPool.rangeStart", start)?;
            let last = parse_mac("kubeMacPool.rangeEnd", end)?;
            if first > last {
                return Err(Error::configuration(
                    "kubeMacPool.rangeEnd",
                    format!("{end} is before rangeStart {start}"),
                ));
            }
            Ok(MacRange {
                start: start.to_lowercase(),
                end: end.to_lowercase(),
            })
        }
        (None, None) => {
            // Locally administered unicast prefix, stable for the lifetime of the config
            let seed = config.uid().unwrap_or_else(|| config.name_any());
            let hash = deterministic_hash(&seed);
            let prefix = format!("02:{}:{}", &hash[0..2], &hash[2..4]);
            Ok(MacRange {
                start: format!("{prefix}:00:00:00"),
                end: format!("{prefix}:ff:ff:ff"),
            })
        }
        _ => Err(Error::configuration(
            "kubeMacPool",
            "rangeStart and rangeEnd must be set together",
        )),
    }
}

fn parse_mac(field: &str, value: &str) -> Result<[u8; 6]> {
    let invalid = || Error::configuration(field, format!("{value:?} is not a MAC address"));
    let mut octets = [0u8; 6];
    let mut parts = value.split(':');
    for octet in octets.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        if part.len() != 2 {
            return Err(invalid());
        }
        *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(octets)
}

// =============================================================================
// Rendering
// =============================================================================

/// Render the ordered objects of one component
pub fn render(spec: &ComponentSpec) -> Result<Vec<ManifestObject>> {
    let mut out = Objects::new(spec);
    match spec.component {
        Component::Multus => multus::render(spec, &mut out)?,
        Component::LinuxBridge => linux_bridge::render(spec, &mut out)?,
        Component::KubeMacPool => kubemacpool::render(spec, &mut out)?,
        Component::Ovs => ovs::render(spec, &mut out)?,
        Component::MacvtapCni => macvtap::render(spec, &mut out)?,
        Component::Monitoring => monitoring::render(spec, &mut out)?,
    }
    Ok(out.finish())
}

/// Collects a component's objects, stamping ownership metadata on each
pub(crate) struct Objects<'a> {
    spec: &'a ComponentSpec,
    objects: Vec<ManifestObject>,
}

impl<'a> Objects<'a> {
    fn new(spec: &'a ComponentSpec) -> Self {
        Self {
            spec,
            objects: Vec::new(),
        }
    }

    /// Add a typed object
    pub(crate) fn push<K>(&mut self, object: K) -> Result<()>
    where
        K: k8s_openapi::Resource + Serialize,
    {
        let component = self.spec.component;
        let kind = ObjectKind::from_kind(K::KIND).ok_or_else(|| {
            Error::render(component.label(), format!("unmanaged kind {}", K::KIND))
        })?;
        let mut body = serde_json::to_value(&object)
            .map_err(|e| Error::render(component.label(), format!("{}: {e}", K::KIND)))?;

        let meta = body
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| Error::render(component.label(), format!("{} without metadata", K::KIND)))?;
        let name = meta
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::render(component.label(), format!("{} without name", K::KIND)))?;
        let namespace = if kind.is_namespaced() {
            meta.insert("namespace".to_string(), Value::String(self.spec.namespace.clone()));
            Some(self.spec.namespace.clone())
        } else {
            meta.remove("namespace");
            None
        };

        insert_string(meta, "labels", MANAGED_BY_LABEL, MANAGED_BY_CONTROLLER);
        insert_string(meta, "labels", COMPONENT_LABEL, component.label());
        insert_string(meta, "annotations", VERSION_ANNOTATION, &self.spec.operator_version);
        if let Some(owner) = &self.spec.owner {
            meta.insert("ownerReferences".to_string(), serde_json::to_value(vec![owner])?);
        }

        let hash = deterministic_hash(&body.to_string());
        if let Some(meta) = body.get_mut("metadata").and_then(Value::as_object_mut) {
            insert_string(meta, "annotations", RENDERED_HASH_ANNOTATION, &hash);
        }

        self.objects.push(ManifestObject {
            key: ObjectKey {
                kind,
                namespace,
                name,
            },
            component,
            hash,
            body,
        });
        Ok(())
    }

    fn finish(self) -> Vec<ManifestObject> {
        self.objects
    }
}

fn insert_string(meta: &mut serde_json::Map<String, Value>, map: &str, key: &str, value: &str) {
    let entry = meta
        .entry(map.to_string())
        .or_insert_with(|| Value::Object(Default::default()));
    if !entry.is_object() {
        *entry = Value::Object(Default::default());
    }
    if let Some(entries) = entry.as_object_mut() {
        entries.insert(key.to_string(), Value::String(value.to_string()));
    }
}

// =============================================================================
// Shared builders
// =============================================================================

pub(crate) const CNI_BIN_DIR: &str = "/opt/cni/bin";
pub(crate) const CNI_CONF_DIR: &str = "/etc/cni/net.d";

pub(crate) fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub(crate) fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Labels selecting a workload's pods
pub(crate) fn pod_labels(spec: &ComponentSpec, name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("name".to_string(), name.to_string()),
        (COMPONENT_LABEL.to_string(), spec.component.label().to_string()),
    ])
}

/// Security context applied to every container, not configurable
pub(crate) fn restricted_security_context() -> SecurityContext {
    SecurityContext {
        run_as_non_root: Some(true),
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn container(spec: &ComponentSpec, name: &str, image: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some(spec.image_pull_policy.clone()),
        security_context: Some(restricted_security_context()),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        ..Default::default()
    }
}

/// kube-rbac-proxy sidecar terminating TLS in front of a local metrics port
pub(crate) fn metrics_proxy(spec: &ComponentSpec, upstream_port: u16, cert_dir: Option<&str>) -> Container {
    let mut args = vec![
        "--logtostderr".to_string(),
        "--secure-listen-address=:8443".to_string(),
        format!("--upstream=http://127.0.0.1:{upstream_port}"),
    ];
    if let Some(tls) = &spec.tls {
        args.extend(tls.proxy_args());
    }
    if let Some(dir) = cert_dir {
        args.push(format!("--tls-cert-file={dir}/tls.crt"));
        args.push(format!("--tls-private-key-file={dir}/tls.key"));
    }
    Container {
        args: Some(args),
        ports: Some(vec![k8s_openapi::api::core::v1::ContainerPort {
            name: Some("metrics".to_string()),
            container_port: 8443,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(requests("10m", "20Mi")),
        ..container(spec, "kube-rbac-proxy", &spec.images.kube_rbac_proxy.reference)
    }
}

pub(crate) fn requests(cpu: &str, memory: &str) -> k8s_openapi::api::core::v1::ResourceRequirements {
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    k8s_openapi::api::core::v1::ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])),
        ..Default::default()
    }
}

/// Pod spec carrying the resolved placement and pod-level security defaults
pub(crate) fn pod_spec(spec: &ComponentSpec, service_account: Option<&str>, containers: Vec<Container>) -> PodSpec {
    let placement = &spec.placement;
    PodSpec {
        service_account_name: service_account.map(str::to_string),
        containers,
        node_selector: (!placement.node_selector.is_empty()).then(|| placement.node_selector.clone()),
        affinity: placement.affinity.clone(),
        tolerations: (!placement.tolerations.is_empty()).then(|| placement.tolerations.clone()),
        security_context: Some(PodSecurityContext {
            run_as_non_root: Some(true),
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        priority_class_name: Some("system-node-critical".to_string()),
        ..Default::default()
    }
}

pub(crate) fn daemon_set(spec: &ComponentSpec, name: &str, pod: PodSpec) -> DaemonSet {
    let labels = pod_labels(spec, name);
    DaemonSet {
        metadata: meta(name),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_unavailable: Some(IntOrString::String("10%".to_string())),
                    ..Default::default()
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn service_account(name: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(name),
        ..Default::default()
    }
}

pub(crate) fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: meta(name),
        rules: Some(rules),
        ..Default::default()
    }
}

pub(crate) fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(strings(api_groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

pub(crate) fn cluster_role_binding(spec: &ComponentSpec, name: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: meta(name),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(spec.namespace.clone()),
            ..Default::default()
        }]),
    }
}

/// ServiceAccount, ClusterRole and binding sharing one name
pub(crate) fn push_cluster_rbac(out: &mut Objects<'_>, spec: &ComponentSpec, name: &str, rules: Vec<PolicyRule>) -> Result<()> {
    out.push(service_account(name))?;
    out.push(cluster_role(name, rules))?;
    out.push(cluster_role_binding(spec, name))
}

pub(crate) fn host_path_volume(name: &str, path: &str) -> (k8s_openapi::api::core::v1::Volume, k8s_openapi::api::core::v1::VolumeMount) {
    use k8s_openapi::api::core::v1::{HostPathVolumeSource, Volume, VolumeMount};
    (
        Volume {
            name: name.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            ..Default::default()
        },
    )
}
