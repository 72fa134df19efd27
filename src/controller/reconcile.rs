//! NetworkAddonsConfig convergence
//!
//! One pass renders every enabled component, applies what changed, prunes
//! what is no longer wanted, reads workload health back and folds it into
//! the config's status. When the config is gone the pass tears everything
//! down instead.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use kube::{Client, ResourceExt};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::client::{KubeClient, KubeClientImpl, LiveObject};
use super::status::{
    self, ComponentReport, ComponentState, Problem, StatusInput, REASON_APPLY_FAILED,
    REASON_INVALID_CONFIGURATION, REASON_MINIMUM_REPLICAS_UNAVAILABLE, REASON_READ_FAILED,
    REASON_RENDER_FAILED, REASON_UNSCHEDULABLE,
};
use crate::certs::{
    CertStore, RotationPlan, RotationSchedule, SecretCertStore, ServiceIdentity, CA_SECRET_NAME,
};
use crate::config::OperatorConfig;
use crate::crd::{ContainerInfo, NetworkAddonsConfig};
use crate::health::OperatorMetrics;
use crate::render::{self, Component, ComponentSpec, ManifestObject, ObjectKey, ObjectKind};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result, MANAGED_BY_CONTROLLER, RENDERED_HASH_ANNOTATION};

/// Objects written or deleted at the same time
pub const APPLY_CONCURRENCY: usize = 8;

/// Requeue delay while anything is progressing or unavailable
pub const REQUEUE_CONVERGING: Duration = Duration::from_secs(10);

/// Requeue delay once everything is settled
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Shared state of the controller
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Certificate material written by the rotation engine
    pub certs: Arc<dyn CertStore>,
    /// Environment-provided defaults
    pub operator: OperatorConfig,
    /// Operator metrics updated after every pass
    pub metrics: Arc<OperatorMetrics>,
    plans: watch::Sender<Option<RotationPlan>>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Assemble a context from already constructed clients
    pub fn from_parts(
        kube: Arc<dyn KubeClient>,
        certs: Arc<dyn CertStore>,
        operator: OperatorConfig,
        metrics: Arc<OperatorMetrics>,
    ) -> Self {
        let (plans, _) = watch::channel(None);
        Self {
            kube,
            certs,
            operator,
            metrics,
            plans,
        }
    }

    /// Create a context for testing with default operator settings
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, certs: Arc<dyn CertStore>) -> Self {
        Self::from_parts(
            kube,
            certs,
            OperatorConfig::default(),
            Arc::new(OperatorMetrics::new().unwrap()),
        )
    }

    /// Receiver of the rotation plans published by each pass
    pub fn subscribe_plans(&self) -> watch::Receiver<Option<RotationPlan>> {
        self.plans.subscribe()
    }

    /// Publish a plan if it differs from the current one
    fn publish_plan(&self, plan: Option<RotationPlan>) -> bool {
        self.plans.send_if_modified(|current| {
            if *current == plan {
                return false;
            }
            *current = plan;
            true
        })
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    certs: Option<Arc<dyn CertStore>>,
    operator: OperatorConfig,
    metrics: Option<Arc<OperatorMetrics>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            certs: None,
            operator: OperatorConfig::default(),
            metrics: None,
        }
    }

    /// Set the environment-provided defaults
    pub fn operator_config(mut self, operator: OperatorConfig) -> Self {
        self.operator = operator;
        self
    }

    /// Share an existing metrics registry
    pub fn metrics(mut self, metrics: Arc<OperatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the certificate store (primarily for testing)
    pub fn cert_store(mut self, certs: Arc<dyn CertStore>) -> Self {
        self.certs = Some(certs);
        self
    }

    /// Build the context
    pub fn build(self) -> Result<Context> {
        let metrics = match self.metrics {
            Some(m) => m,
            None => Arc::new(
                OperatorMetrics::new().map_err(|e| Error::internal(format!("metrics: {e}")))?,
            ),
        };
        let kube = self
            .kube
            .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone())));
        let certs = self.certs.unwrap_or_else(|| {
            Arc::new(SecretCertStore::new(
                self.client.clone(),
                self.operator.operand_namespace.clone(),
            ))
        });
        Ok(Context::from_parts(kube, certs, self.operator, metrics))
    }
}

/// What a pass did
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassOutcome {
    /// When the next pass should run at the latest
    pub requeue_after: Duration,
    /// Objects created, updated or deleted
    pub writes: usize,
    /// Whether a status was written
    pub status_written: bool,
}

/// Run one pass over the configs present in the cluster
///
/// Configs not named `cluster` only get an `InvalidConfigurationName` status.
/// A singleton being deleted counts as absent.
pub async fn run_pass(ctx: &Context, now: DateTime<Utc>) -> Result<PassOutcome> {
    let mut singleton = None;
    let mut rejected = false;
    for config in ctx.kube.list_configs().await? {
        if config.is_singleton() {
            singleton = Some(config);
        } else {
            rejected |= reject_misnamed(ctx, &config, now).await?;
        }
    }

    let live = singleton.filter(|c| c.metadata.deletion_timestamp.is_none());
    let mut outcome = reconcile(live.as_ref(), ctx, now).await?;
    outcome.status_written |= rejected;
    Ok(outcome)
}

async fn reject_misnamed(ctx: &Context, config: &NetworkAddonsConfig, now: DateTime<Utc>) -> Result<bool> {
    let desired = status::invalid_name(config.status.as_ref(), &ctx.operator.operator_version, now);
    if config.status.as_ref() == Some(&desired) {
        return Ok(false);
    }
    let name = config.name_any();
    warn!(config = %name, "ignoring NetworkAddonsConfig with a name other than cluster");
    ctx.kube.patch_status(&name, &desired).await?;
    Ok(true)
}

/// Converge the cluster towards `config`, or tear down when it is `None`
#[instrument(skip(config, ctx), fields(present = config.is_some()))]
pub async fn reconcile(
    config: Option<&NetworkAddonsConfig>,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<PassOutcome> {
    match config {
        Some(config) => converge(config, ctx, now).await,
        None => teardown(ctx).await,
    }
}

/// Rendered objects of one component, or why there are none
struct ComponentRun {
    component: Component,
    objects: Vec<ManifestObject>,
    failure: Option<Problem>,
}

async fn converge(config: &NetworkAddonsConfig, ctx: &Context, now: DateTime<Utc>) -> Result<PassOutcome> {
    let name = config.name_any();
    let enabled = Component::enabled(&config.spec);
    debug!(components = ?enabled, "reconciling enabled components");

    let mut failures = Vec::new();
    match RotationSchedule::from_config(config.spec.self_sign_configuration.as_ref()) {
        Ok(schedule) => {
            let plan = rotation_plan(schedule, &enabled, &ctx.operator.operand_namespace);
            if ctx.publish_plan(Some(plan)) {
                info!("published certificate rotation plan");
            }
        }
        Err(e) => {
            warn!(error = %e, "invalid certificate rotation schedule, keeping the previous plan");
            failures.push(Problem::new(REASON_INVALID_CONFIGURATION, e.to_string()));
        }
    }

    let ca_bundle = ctx
        .certs
        .load(CA_SECRET_NAME)
        .await?
        .map(|ca| ca.trust_bundle(now))
        .unwrap_or_default();

    let mut runs = Vec::with_capacity(enabled.len());
    for component in enabled {
        let run = match render_component(component, config, ctx, &ca_bundle) {
            Ok(objects) => ComponentRun {
                component,
                objects,
                failure: None,
            },
            Err(e @ Error::Internal { .. }) => {
                error!(%component, error = %e, "aborting pass");
                return Err(e);
            }
            Err(e) => {
                warn!(%component, error = %e, "component not rendered");
                let reason = if e.is_configuration() {
                    REASON_INVALID_CONFIGURATION
                } else {
                    REASON_RENDER_FAILED
                };
                ComponentRun {
                    component,
                    objects: Vec::new(),
                    failure: Some(Problem::new(reason, e.to_string())),
                }
            }
        };
        runs.push(run);
    }

    let mut writes = apply_all(ctx, &mut runs).await;
    writes += prune(ctx, &runs, &mut failures).await;

    let mut reports = Vec::with_capacity(runs.len());
    let mut containers = Vec::new();
    for run in &runs {
        reports.push(observe(ctx, run, &mut containers).await);
    }

    let desired = status::aggregate(
        config.status.as_ref(),
        &StatusInput {
            reports: &reports,
            failures: &failures,
            containers,
            operator_version: &ctx.operator.operator_version,
            grace_period: ctx.operator.degraded_grace_period,
        },
        now,
    );

    let status_written = config.status.as_ref() != Some(&desired);
    if status_written {
        ctx.kube.patch_status(&name, &desired).await?;
        debug!("status updated");
    }

    let available = desired
        .condition(status::AVAILABLE)
        .is_some_and(|c| c.is_true());
    ctx.metrics.set_cr_ready(available);
    ctx.metrics
        .set_components(reports.iter().map(|r| (r.component.label(), r.is_ready())));

    let settled = failures.is_empty() && reports.iter().all(|r| r.is_ready() && !r.progressing);
    info!(writes, available, settled, "pass complete");

    Ok(PassOutcome {
        requeue_after: if settled {
            RESYNC_INTERVAL
        } else {
            REQUEUE_CONVERGING
        },
        writes,
        status_written,
    })
}

fn rotation_plan(schedule: RotationSchedule, enabled: &[Component], namespace: &str) -> RotationPlan {
    RotationPlan {
        schedule,
        services: enabled
            .iter()
            .flat_map(|c| c.tls_services())
            .map(|service| ServiceIdentity::for_service(service, namespace))
            .collect(),
    }
}

/// Resolve and render a component twice, refusing non-deterministic output
fn render_component(
    component: Component,
    config: &NetworkAddonsConfig,
    ctx: &Context,
    ca_bundle: &str,
) -> Result<Vec<ManifestObject>> {
    let spec = ComponentSpec::resolve(component, config, &ctx.operator, ca_bundle)?;
    let objects = render::render(&spec)?;
    let again = render::render(&spec)?;

    let stable = objects.len() == again.len()
        && objects
            .iter()
            .zip(&again)
            .all(|(a, b)| a.canonical() == b.canonical());
    if !stable {
        return Err(Error::internal(format!("rendering {component} is not deterministic")));
    }
    Ok(objects)
}

/// Whether a live object is the rendered one, edits by others included
///
/// The rendered hash must match and every field the operator sets must
/// still hold its rendered value. Fields added by the API server are
/// ignored.
fn in_sync(live: &Value, object: &ManifestObject) -> bool {
    let hash = live
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(RENDERED_HASH_ANNOTATION))
        .and_then(Value::as_str);
    hash == Some(object.hash()) && covers(live, object.body())
}

/// `live` holds every value of `wanted`; empty values the server drops count as held
fn covers(live: &Value, wanted: &Value) -> bool {
    match (live, wanted) {
        (Value::Object(live), Value::Object(wanted)) => wanted.iter().all(|(key, w)| match live.get(key) {
            Some(l) => covers(l, w),
            None => is_empty(w),
        }),
        (Value::Array(live), Value::Array(wanted)) => {
            live.len() == wanted.len() && live.iter().zip(wanted).all(|(l, w)| covers(l, w))
        }
        _ => live == wanted,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Write an object unless its live copy is already in sync
async fn apply_if_changed(ctx: &Context, object: &ManifestObject) -> Result<bool> {
    let operation = format!("apply {}", object.key());
    retry_with_backoff(&RetryConfig::apply(), &operation, Error::is_transient, move || async move {
        let live = ctx.kube.get_object(object.key()).await?;
        if live.as_ref().is_some_and(|l| in_sync(l, object)) {
            return Ok(false);
        }
        if live.is_some() {
            debug!(object = %object.key(), "live object differs from rendered");
        }
        ctx.kube.apply_object(object).await?;
        Ok(true)
    })
    .await
}

/// List managed objects of one kind, retrying transient errors
async fn list_managed(ctx: &Context, kind: ObjectKind) -> Result<Vec<LiveObject>> {
    let operation = format!("list {kind}");
    retry_with_backoff(&RetryConfig::read(), &operation, Error::is_transient, || {
        ctx.kube.list_managed(kind, MANAGED_BY_CONTROLLER)
    })
    .await
}

/// Apply every rendered object, recording the first failure per component
async fn apply_all(ctx: &Context, runs: &mut [ComponentRun]) -> usize {
    let applies: Vec<_> = runs
        .iter()
        .flat_map(|r| r.objects.iter())
        .map(move |object| {
            async move {
                (
                    object.component(),
                    object.key().to_string(),
                    apply_if_changed(ctx, object).await,
                )
            }
            .boxed()
        })
        .collect();
    let results: Vec<(Component, String, Result<bool>)> = stream::iter(applies)
        .buffer_unordered(APPLY_CONCURRENCY)
        .collect()
        .await;

    let mut writes = 0;
    let mut failed: BTreeMap<Component, Problem> = BTreeMap::new();
    for (component, key, result) in results {
        match result {
            Ok(true) => {
                debug!(object = %key, "object written");
                writes += 1;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(%component, object = %key, error = %e, "apply failed");
                failed
                    .entry(component)
                    .or_insert_with(|| Problem::new(REASON_APPLY_FAILED, format!("failed to apply {key}: {e}")));
            }
        }
    }

    for run in runs.iter_mut() {
        if let Some(problem) = failed.remove(&run.component) {
            run.failure = Some(problem);
        }
    }
    writes
}

async fn delete_keys(ctx: &Context, keys: Vec<ObjectKey>) -> Vec<(ObjectKey, Result<()>)> {
    stream::iter(keys)
        .map(move |key| async move {
            let operation = format!("delete {key}");
            let result = retry_with_backoff(&RetryConfig::apply(), &operation, Error::is_transient, || {
                ctx.kube.delete_object(&key)
            })
            .await;
            (key, result)
        })
        .buffer_unordered(APPLY_CONCURRENCY)
        .collect()
        .await
}

/// Delete managed objects outside the target set
///
/// Objects of a component that failed to render are kept: the last good
/// rollout keeps running until the config is fixed.
async fn prune(ctx: &Context, runs: &[ComponentRun], failures: &mut Vec<Problem>) -> usize {
    let desired: BTreeSet<&ObjectKey> = runs
        .iter()
        .flat_map(|r| r.objects.iter().map(ManifestObject::key))
        .collect();
    let protected: BTreeSet<&str> = runs
        .iter()
        .filter(|r| r.objects.is_empty() && r.failure.is_some())
        .map(|r| r.component.label())
        .collect();

    let mut stale = Vec::new();
    for kind in ObjectKind::ALL {
        let listed = match list_managed(ctx, kind).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(%kind, error = %e, "cannot list managed objects, skipping prune");
                failures.push(Problem::new(REASON_READ_FAILED, format!("failed to list {kind}: {e}")));
                continue;
            }
        };
        for live in listed {
            let keep = desired.contains(&live.key)
                || live
                    .component
                    .as_deref()
                    .is_some_and(|c| protected.contains(c));
            if !keep {
                stale.push(live.key);
            }
        }
    }

    let mut deleted = 0;
    for (key, result) in delete_keys(ctx, stale).await {
        match result {
            Ok(()) => {
                info!(object = %key, "pruned object");
                deleted += 1;
            }
            Err(e) => {
                warn!(object = %key, error = %e, "prune failed");
                failures.push(Problem::new(REASON_APPLY_FAILED, format!("failed to delete {key}: {e}")));
            }
        }
    }
    deleted
}

/// Delete everything carrying either managed-by label
async fn teardown(ctx: &Context) -> Result<PassOutcome> {
    if ctx.publish_plan(None) {
        info!("withdrew certificate rotation plan");
    }

    let mut keys = Vec::new();
    for kind in ObjectKind::ALL {
        keys.extend(list_managed(ctx, kind).await?.into_iter().map(|l| l.key));
    }

    let mut writes = 0;
    let mut first_error = None;
    for (key, result) in delete_keys(ctx, keys).await {
        match result {
            Ok(()) => writes += 1,
            Err(e) => {
                warn!(object = %key, error = %e, "teardown delete failed");
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    for secret in ctx.certs.list().await? {
        ctx.certs.delete(&secret).await?;
        writes += 1;
    }

    ctx.metrics.set_cr_ready(false);
    ctx.metrics.set_components(std::iter::empty());
    if writes > 0 {
        info!(deleted = writes, "tore down network add-ons");
    }

    Ok(PassOutcome {
        requeue_after: RESYNC_INTERVAL,
        writes,
        status_written: false,
    })
}

// =============================================================================
// Health readback
// =============================================================================

/// Rollout state of one workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rollout {
    /// Enough pods are ready
    pub ready: bool,
    /// A new template or replica count is still being rolled out
    pub progressing: bool,
    /// Replica summary for messages
    pub summary: String,
}

impl Rollout {
    fn missing() -> Self {
        Self {
            ready: false,
            progressing: true,
            summary: "not created yet".to_string(),
        }
    }
}

fn generation_lags(observed: Option<i64>, generation: Option<i64>) -> bool {
    match (observed, generation) {
        (Some(observed), Some(generation)) => observed < generation,
        (None, Some(_)) => true,
        _ => false,
    }
}

/// Ready iff `readyReplicas >= spec.replicas`
pub fn deployment_rollout(deployment: &Deployment) -> Rollout {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = deployment.status.clone().unwrap_or_default();
    let ready = status.ready_replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    Rollout {
        ready: ready >= desired,
        progressing: generation_lags(status.observed_generation, deployment.metadata.generation)
            || updated < desired,
        summary: format!("{ready}/{desired} replicas ready"),
    }
}

/// Ready iff `numberAvailable >= desiredNumberScheduled` and at least one pod is available
pub fn daemon_set_rollout(daemon_set: &DaemonSet) -> Rollout {
    let status = daemon_set.status.clone().unwrap_or_default();
    let desired = status.desired_number_scheduled;
    let available = status.number_available.unwrap_or(0);
    let updated = status.updated_number_scheduled.unwrap_or(0);
    Rollout {
        ready: available >= desired && available > 0,
        progressing: generation_lags(status.observed_generation, daemon_set.metadata.generation)
            || updated < desired,
        summary: format!("{available}/{desired} pods available"),
    }
}

/// Message of the first pod the scheduler could not place
pub fn unschedulable_message(pods: &[Pod]) -> Option<String> {
    pods.iter()
        .filter_map(|p| p.status.as_ref()?.conditions.as_ref())
        .flatten()
        .find(|c| {
            c.type_ == "PodScheduled" && c.status == "False" && c.reason.as_deref() == Some("Unschedulable")
        })
        .map(|c| c.message.clone().unwrap_or_else(|| "pod cannot be scheduled".to_string()))
}

fn inventory(kind: ObjectKind, name: &str, pod: Option<&PodSpec>) -> Vec<ContainerInfo> {
    pod.map(|pod| {
        pod.containers
            .iter()
            .map(|c| ContainerInfo {
                parent_kind: kind.as_str().to_string(),
                parent_name: name.to_string(),
                name: c.name.clone(),
                image: c.image.clone().unwrap_or_default(),
            })
            .collect()
    })
    .unwrap_or_default()
}

/// Read a workload back, returning its rollout and why it is not ready
async fn read_workload(
    ctx: &Context,
    object: &ManifestObject,
    containers: &mut Vec<ContainerInfo>,
) -> Result<(Rollout, Option<Problem>)> {
    let key = object.key();
    let namespace = key
        .namespace
        .as_deref()
        .unwrap_or(&ctx.operator.operand_namespace);

    let operation = format!("read {key}");
    let retry = RetryConfig::read();
    let rollout = match key.kind {
        ObjectKind::Deployment => match retry_with_backoff(&retry, &operation, Error::is_transient, || {
            ctx.kube.get_deployment(namespace, &key.name)
        })
        .await?
        {
            Some(d) => {
                containers.extend(inventory(key.kind, &key.name, d.spec.as_ref().and_then(|s| s.template.spec.as_ref())));
                deployment_rollout(&d)
            }
            None => Rollout::missing(),
        },
        ObjectKind::DaemonSet => match retry_with_backoff(&retry, &operation, Error::is_transient, || {
            ctx.kube.get_daemon_set(namespace, &key.name)
        })
        .await?
        {
            Some(ds) => {
                containers.extend(inventory(key.kind, &key.name, ds.spec.as_ref().and_then(|s| s.template.spec.as_ref())));
                daemon_set_rollout(&ds)
            }
            None => Rollout::missing(),
        },
        _ => return Err(Error::internal(format!("{key} is not a workload"))),
    };

    if rollout.ready {
        return Ok((rollout, None));
    }

    let pods = match object.pod_selector() {
        Some(selector) if !selector.is_empty() => {
            retry_with_backoff(&retry, &format!("list pods of {key}"), Error::is_transient, || {
                ctx.kube.list_pods(namespace, &selector)
            })
            .await?
        }
        _ => Vec::new(),
    };
    let problem = match unschedulable_message(&pods) {
        Some(message) => Problem::new(REASON_UNSCHEDULABLE, format!("{key}: {message}")),
        None => Problem::new(
            REASON_MINIMUM_REPLICAS_UNAVAILABLE,
            format!("{key}: {}", rollout.summary),
        ),
    };
    Ok((rollout, Some(problem)))
}

/// Fold the health of a component's workloads into one report
///
/// A workload that cannot be read fails its own component only.
async fn observe(ctx: &Context, run: &ComponentRun, containers: &mut Vec<ContainerInfo>) -> ComponentReport {
    let mut problems = Vec::new();
    let mut progressing = false;
    let mut read_failure = None;
    for object in run.objects.iter().filter(|o| o.key().kind.is_workload()) {
        match read_workload(ctx, object, containers).await {
            Ok((rollout, problem)) => {
                progressing |= rollout.progressing;
                problems.extend(problem);
            }
            Err(e) => {
                warn!(component = %run.component, object = %object.key(), error = %e, "cannot read workload");
                read_failure.get_or_insert_with(|| {
                    Problem::new(REASON_READ_FAILED, format!("failed to read {}: {e}", object.key()))
                });
            }
        }
    }

    let state = if let Some(failure) = run.failure.clone().or(read_failure) {
        ComponentState::Failed(failure)
    } else if problems.is_empty() {
        ComponentState::Ready
    } else {
        let reason = if problems.iter().any(|p| p.reason == REASON_UNSCHEDULABLE) {
            REASON_UNSCHEDULABLE
        } else {
            REASON_MINIMUM_REPLICAS_UNAVAILABLE
        };
        let message = problems
            .iter()
            .map(|p| p.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        ComponentState::Unavailable(Problem::new(reason, message))
    };

    ComponentReport {
        component: run.component,
        state,
        progressing,
    }
}
