//! In-memory cluster for convergence scenarios
//!
//! Applied objects are stored as rendered. Workload status is synthesized
//! on read from a list of fake nodes: a pod schedules when some node carries
//! every label of its nodeSelector. Affinity and tolerations are ignored.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetStatus, Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodSpec, PodStatus, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use network_addons_operator::certs::{CertStore, StoredIdentity};
use network_addons_operator::config::OperatorConfig;
use network_addons_operator::controller::{Context, KubeClient, LiveObject};
use network_addons_operator::crd::{NetworkAddonsConfig, NetworkAddonsConfigSpec, NetworkAddonsConfigStatus};
use network_addons_operator::health::OperatorMetrics;
use network_addons_operator::render::{ManifestObject, ObjectKey, ObjectKind};
use network_addons_operator::{Result, MANAGED_BY_LABEL};

pub const NAMESPACE: &str = "cluster-network-addons";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn config(name: &str, spec: NetworkAddonsConfigSpec) -> NetworkAddonsConfig {
    let mut config = NetworkAddonsConfig::new(name, spec);
    config.metadata.uid = Some("0d7c5a52-9a1e-4d55-b9f8-3f5f0c1e2a11".to_string());
    config.metadata.generation = Some(1);
    config
}

/// Writes observed since the last [`FakeCluster::take_writes`]
#[derive(Debug, Default)]
pub struct Writes {
    pub applied: Vec<(ObjectKey, Option<String>)>,
    pub deleted: Vec<ObjectKey>,
    pub status: usize,
}

impl Writes {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.deleted.is_empty() && self.status == 0
    }
}

#[derive(Default)]
struct State {
    configs: BTreeMap<String, NetworkAddonsConfig>,
    objects: BTreeMap<ObjectKey, Value>,
    nodes: Vec<BTreeMap<String, String>>,
    writes: Writes,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn linux_node(index: usize) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("kubernetes.io/os".to_string(), "linux".to_string()),
        ("kubernetes.io/hostname".to_string(), format!("node-{index}")),
    ])
}

fn meta_of(body: &Value) -> ObjectMeta {
    serde_json::from_value(body["metadata"].clone()).unwrap_or_default()
}

fn matches(labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

impl FakeCluster {
    pub fn with_nodes(count: usize) -> Arc<Self> {
        let cluster = Self::default();
        cluster.state.lock().unwrap().nodes = (0..count).map(linux_node).collect();
        Arc::new(cluster)
    }

    pub fn put_config(&self, config: NetworkAddonsConfig) {
        let mut state = self.state.lock().unwrap();
        let name = config.metadata.name.clone().unwrap();
        // Keep the status the controller wrote, like a spec update would
        let status = state.configs.get(&name).and_then(|c| c.status.clone());
        let mut config = config;
        if config.status.is_none() {
            config.status = status;
        }
        state.configs.insert(name, config);
    }

    pub fn remove_config(&self, name: &str) {
        self.state.lock().unwrap().configs.remove(name);
    }

    pub fn status(&self, name: &str) -> NetworkAddonsConfigStatus {
        self.state
            .lock()
            .unwrap()
            .configs
            .get(name)
            .and_then(|c| c.status.clone())
            .unwrap_or_default()
    }

    /// Live objects with their component label
    pub fn objects(&self) -> Vec<(ObjectKey, Option<String>)> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .filter_map(|(key, body)| LiveObject::from_meta(key.kind, &meta_of(body)))
            .map(|live| (live.key, live.component))
            .collect()
    }

    pub fn object(&self, key: &ObjectKey) -> Option<Value> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn take_writes(&self) -> Writes {
        std::mem::take(&mut self.state.lock().unwrap().writes)
    }

    /// Create an object as if another controller owned it
    pub fn put_foreign(&self, key: ObjectKey, body: Value) {
        self.state.lock().unwrap().objects.insert(key, body);
    }

    /// Change a live object behind the operator's back
    pub fn edit(&self, key: &ObjectKey, edit: impl FnOnce(&mut Value)) {
        let mut state = self.state.lock().unwrap();
        if let Some(body) = state.objects.get_mut(key) {
            edit(body);
        }
    }

    fn schedulable_nodes(&self, pod: Option<&PodTemplateSpec>) -> usize {
        let selector = pod
            .and_then(|t| t.spec.as_ref())
            .and_then(|s: &PodSpec| s.node_selector.clone())
            .unwrap_or_default();
        let state = self.state.lock().unwrap();
        state.nodes.iter().filter(|n| matches(n, &selector)).count()
    }

    fn workload<T: serde::de::DeserializeOwned>(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<T> {
        let key = ObjectKey {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        };
        let body = self.state.lock().unwrap().objects.get(&key).cloned()?;
        serde_json::from_value(body).ok()
    }

    fn templates(&self, namespace: &str) -> Vec<PodTemplateSpec> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .filter(|(key, _)| key.namespace.as_deref() == Some(namespace))
            .filter_map(|(key, body)| match key.kind {
                ObjectKind::Deployment => serde_json::from_value::<Deployment>(body.clone())
                    .ok()
                    .and_then(|d| d.spec)
                    .map(|s| s.template),
                ObjectKind::DaemonSet => serde_json::from_value::<DaemonSet>(body.clone())
                    .ok()
                    .and_then(|d| d.spec)
                    .map(|s| s.template),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn list_configs(&self) -> Result<Vec<NetworkAddonsConfig>> {
        Ok(self.state.lock().unwrap().configs.values().cloned().collect())
    }

    async fn patch_status(&self, name: &str, status: &NetworkAddonsConfigStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(config) = state.configs.get_mut(name) {
            config.status = Some(status.clone());
        }
        state.writes.status += 1;
        Ok(())
    }

    async fn get_object(&self, key: &ObjectKey) -> Result<Option<Value>> {
        Ok(self.state.lock().unwrap().objects.get(key).cloned())
    }

    async fn apply_object(&self, object: &ManifestObject) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(object.key().clone(), object.body().clone());
        state
            .writes
            .applied
            .push((object.key().clone(), Some(object.component().label().to_string())));
        Ok(())
    }

    async fn list_managed(&self, kind: ObjectKind, managed_by: &str) -> Result<Vec<LiveObject>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(key, body)| (key, meta_of(body)))
            .filter(|(_, meta)| {
                meta.labels
                    .as_ref()
                    .and_then(|l| l.get(MANAGED_BY_LABEL))
                    .is_some_and(|v| v == managed_by)
            })
            .filter_map(|(key, meta)| LiveObject::from_meta(key.kind, &meta))
            .collect())
    }

    async fn delete_object(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.objects.remove(key).is_some() {
            state.writes.deleted.push(key.clone());
        }
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let Some(mut deployment) = self.workload::<Deployment>(ObjectKind::Deployment, namespace, name) else {
            return Ok(None);
        };
        let replicas = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let schedulable = self.schedulable_nodes(deployment.spec.as_ref().map(|s| &s.template)) > 0;
        deployment.status = Some(DeploymentStatus {
            replicas: Some(replicas),
            ready_replicas: Some(if schedulable { replicas } else { 0 }),
            available_replicas: Some(if schedulable { replicas } else { 0 }),
            updated_replicas: Some(replicas),
            ..Default::default()
        });
        Ok(Some(deployment))
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>> {
        let Some(mut daemon_set) = self.workload::<DaemonSet>(ObjectKind::DaemonSet, namespace, name) else {
            return Ok(None);
        };
        let nodes = self.schedulable_nodes(daemon_set.spec.as_ref().map(|s| &s.template)) as i32;
        daemon_set.status = Some(DaemonSetStatus {
            desired_number_scheduled: nodes,
            current_number_scheduled: nodes,
            number_ready: nodes,
            number_available: Some(nodes),
            updated_number_scheduled: Some(nodes),
            ..Default::default()
        });
        Ok(Some(daemon_set))
    }

    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let node_count = self.state.lock().unwrap().nodes.len();
        let mut pods = Vec::new();
        for template in self.templates(namespace) {
            let labels = template
                .metadata
                .as_ref()
                .and_then(|m| m.labels.clone())
                .unwrap_or_default();
            if !matches(&labels, selector) || self.schedulable_nodes(Some(&template)) > 0 {
                continue;
            }
            pods.push(Pod {
                metadata: ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                },
                spec: template.spec.clone(),
                status: Some(PodStatus {
                    phase: Some("Pending".to_string()),
                    conditions: Some(vec![PodCondition {
                        type_: "PodScheduled".to_string(),
                        status: "False".to_string(),
                        reason: Some("Unschedulable".to_string()),
                        message: Some(format!(
                            "0/{node_count} nodes are available: {node_count} node(s) didn't match Pod's node affinity/selector"
                        )),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            });
        }
        Ok(pods)
    }
}

/// Certificate store keeping identities in memory
#[derive(Default)]
pub struct MemoryCertStore {
    identities: Mutex<BTreeMap<String, (StoredIdentity, String)>>,
}

impl MemoryCertStore {
    pub fn names(&self) -> Vec<String> {
        self.identities.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl CertStore for MemoryCertStore {
    async fn load(&self, name: &str) -> Result<Option<StoredIdentity>> {
        Ok(self.identities.lock().unwrap().get(name).map(|(id, _)| id.clone()))
    }

    async fn save(&self, name: &str, identity: &StoredIdentity, ca_bundle: &str) -> Result<()> {
        self.identities
            .lock()
            .unwrap()
            .insert(name.to_string(), (identity.clone(), ca_bundle.to_string()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.names())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.identities.lock().unwrap().remove(name);
        Ok(())
    }
}

/// A controller context over a fake cluster and store
pub fn context(cluster: &Arc<FakeCluster>, certs: &Arc<MemoryCertStore>) -> Context {
    Context::from_parts(
        cluster.clone(),
        certs.clone(),
        OperatorConfig::default(),
        Arc::new(OperatorMetrics::new().unwrap()),
    )
}
