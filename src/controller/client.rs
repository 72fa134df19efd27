//! Cluster access used by the convergence controller

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{NetworkAddonsConfig, NetworkAddonsConfigStatus};
use crate::render::{ManifestObject, ObjectKey, ObjectKind};
use crate::{Result, COMPONENT_LABEL, MANAGED_BY_LABEL, OPERATOR_NAME, RENDERED_HASH_ANNOTATION};

/// What the controller needs to know about a live managed object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveObject {
    /// Object identity
    pub key: ObjectKey,
    /// Value of the component label
    pub component: Option<String>,
    /// Value of the rendered-hash annotation
    pub rendered_hash: Option<String>,
}

impl LiveObject {
    /// Extract the managed-object view from object metadata
    pub fn from_meta(kind: ObjectKind, meta: &ObjectMeta) -> Option<Self> {
        Some(Self {
            key: ObjectKey {
                kind,
                namespace: meta.namespace.clone().filter(|_| kind.is_namespaced()),
                name: meta.name.clone()?,
            },
            component: meta
                .labels
                .as_ref()
                .and_then(|l| l.get(COMPONENT_LABEL))
                .cloned(),
            rendered_hash: meta
                .annotations
                .as_ref()
                .and_then(|a| a.get(RENDERED_HASH_ANNOTATION))
                .cloned(),
        })
    }
}

/// Trait abstracting Kubernetes operations of the controller
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Every NetworkAddonsConfig, whatever its name
    async fn list_configs(&self) -> Result<Vec<NetworkAddonsConfig>>;

    /// Replace the status of a NetworkAddonsConfig
    async fn patch_status(&self, name: &str, status: &NetworkAddonsConfigStatus) -> Result<()>;

    /// Read a managed object as JSON, `None` when it does not exist
    async fn get_object(&self, key: &ObjectKey) -> Result<Option<serde_json::Value>>;

    /// Server-side apply a rendered object with the operator's field manager
    async fn apply_object(&self, object: &ManifestObject) -> Result<()>;

    /// Objects of `kind` carrying `app.kubernetes.io/managed-by=<managed_by>`
    async fn list_managed(&self, kind: ObjectKind, managed_by: &str) -> Result<Vec<LiveObject>>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete_object(&self, key: &ObjectKey) -> Result<()>;

    /// Read a Deployment with its status
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Read a DaemonSet with its status
    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>>;

    /// Pods in `namespace` matching every label of `selector`
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, kind: ObjectKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

const STATUS_FIELDS: [&str; 5] = [
    "conditions",
    "containers",
    "observedVersion",
    "operatorVersion",
    "targetVersion",
];

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn list_configs(&self) -> Result<Vec<NetworkAddonsConfig>> {
        let api: Api<NetworkAddonsConfig> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_status(&self, name: &str, status: &NetworkAddonsConfigStatus) -> Result<()> {
        let api: Api<NetworkAddonsConfig> = Api::all(self.client.clone());

        // Merge patches keep fields they omit, so emptied fields are nulled
        let mut body = serde_json::to_value(status)?;
        if let Some(fields) = body.as_object_mut() {
            for field in STATUS_FIELDS {
                fields.entry(field).or_insert(serde_json::Value::Null);
            }
        }
        let status_patch = serde_json::json!({
            "status": body
        });

        api.patch_status(
            name,
            &PatchParams::apply(OPERATOR_NAME),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn get_object(&self, key: &ObjectKey) -> Result<Option<serde_json::Value>> {
        let api = self.dynamic(key.kind, key.namespace.as_deref());
        match api.get_opt(&key.name).await? {
            Some(object) => Ok(Some(serde_json::to_value(object)?)),
            None => Ok(None),
        }
    }

    async fn apply_object(&self, object: &ManifestObject) -> Result<()> {
        let key = object.key();
        let api = self.dynamic(key.kind, key.namespace.as_deref());
        api.patch(
            &key.name,
            &PatchParams::apply(OPERATOR_NAME).force(),
            &Patch::Apply(object.body()),
        )
        .await?;
        debug!(object = %key, hash = %object.hash(), "applied object");
        Ok(())
    }

    async fn list_managed(&self, kind: ObjectKind, managed_by: &str) -> Result<Vec<LiveObject>> {
        let api = self.dynamic(kind, None);
        let params = ListParams::default().labels(&format!("{MANAGED_BY_LABEL}={managed_by}"));
        let list = api.list_metadata(&params).await?;
        Ok(list
            .items
            .iter()
            .filter_map(|item| LiveObject::from_meta(kind, &item.metadata))
            .collect())
    }

    async fn delete_object(&self, key: &ObjectKey) -> Result<()> {
        let api = self.dynamic(key.kind, key.namespace.as_deref());
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&label_selector(selector));
        Ok(api.list(&params).await?.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_object_reads_labels_and_hash() {
        let meta = ObjectMeta {
            name: Some("multus".to_string()),
            namespace: Some("cluster-network-addons".to_string()),
            labels: Some(BTreeMap::from([(COMPONENT_LABEL.to_string(), "multus".to_string())])),
            annotations: Some(BTreeMap::from([(
                RENDERED_HASH_ANNOTATION.to_string(),
                "0123456789abcdef".to_string(),
            )])),
            ..Default::default()
        };
        let live = LiveObject::from_meta(ObjectKind::DaemonSet, &meta).unwrap();
        assert_eq!(live.key.namespace.as_deref(), Some("cluster-network-addons"));
        assert_eq!(live.component.as_deref(), Some("multus"));
        assert_eq!(live.rendered_hash.as_deref(), Some("0123456789abcdef"));
    }

    #[test]
    fn test_cluster_scoped_objects_drop_namespace() {
        let meta = ObjectMeta {
            name: Some("multus".to_string()),
            namespace: Some("ignored".to_string()),
            ..Default::default()
        };
        let live = LiveObject::from_meta(ObjectKind::ClusterRole, &meta).unwrap();
        assert_eq!(live.key.namespace, None);
        assert!(LiveObject::from_meta(ObjectKind::ClusterRole, &ObjectMeta::default()).is_none());
    }

    #[test]
    fn test_label_selector_is_sorted() {
        let labels = BTreeMap::from([
            ("name".to_string(), "multus".to_string()),
            ("app".to_string(), "cnao".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "app=cnao,name=multus");
    }
}
