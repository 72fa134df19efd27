//! Single-flight trigger loop
//!
//! Watch events only ever wake the loop; they carry no payload. A trigger
//! fired while a pass is running stores one wake-up, so any number of
//! events during a pass collapse into exactly one follow-up pass.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DynamicObject};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reconcile::{run_pass, Context, RESYNC_INTERVAL};
use crate::crd::NetworkAddonsConfig;
use crate::health::PassResult;
use crate::render::ObjectKind;
use crate::{MANAGED_BY_CERTIFICATES, MANAGED_BY_CONTROLLER, MANAGED_BY_LABEL};

/// Delay before the next pass after a pass failed
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Wake-up signal for the reconcile loop
#[derive(Clone, Default)]
pub struct Trigger {
    notify: Arc<Notify>,
}

impl Trigger {
    /// Create an unfired trigger
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pass. Repeated calls before the next pass starts coalesce.
    pub fn fire(&self) {
        self.notify.notify_one();
    }

    async fn fired(&self) {
        self.notify.notified().await;
    }
}

/// Run passes until cancelled
///
/// A pass starts on a trigger or when the previous pass's requeue delay
/// expires. Passes never overlap. Cancellation abandons a running pass.
pub async fn run_loop(ctx: Arc<Context>, trigger: Trigger, cancel: CancellationToken) {
    trigger.fire();
    let mut next = RESYNC_INTERVAL;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = trigger.fired() => {}
            _ = tokio::time::sleep(next) => debug!("requeue delay expired"),
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = run_pass(&ctx, Utc::now()) => result,
        };

        next = match result {
            Ok(outcome) => {
                ctx.metrics.record_pass(PassResult::Success);
                debug!(?outcome, "reconciliation completed");
                outcome.requeue_after
            }
            Err(e) => {
                ctx.metrics.record_pass(PassResult::Error);
                error!(error = %e, "reconciliation failed");
                ERROR_REQUEUE
            }
        };
    }

    info!("reconcile loop stopped");
}

fn watch<K>(
    api: Api<K>,
    config: watcher::Config,
    what: &'static str,
    trigger: Trigger,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    tokio::spawn(async move {
        let stream = watcher::watcher(api, config).default_backoff();
        let mut stream = std::pin::pin!(stream);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = stream.next() => match event {
                    Some(Ok(Event::Apply(_) | Event::Delete(_) | Event::InitDone)) => trigger.fire(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(watch = what, error = %e, "watch error"),
                    None => break,
                },
            }
        }
        debug!(watch = what, "watch stopped");
    })
}

/// Watch the config, every managed kind and the certificate Secrets
pub fn spawn_watchers(
    client: &Client,
    trigger: &Trigger,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = vec![watch(
        Api::<NetworkAddonsConfig>::all(client.clone()),
        watcher::Config::default(),
        "NetworkAddonsConfig",
        trigger.clone(),
        cancel.clone(),
    )];

    let managed = format!("{MANAGED_BY_LABEL}={MANAGED_BY_CONTROLLER}");
    for kind in ObjectKind::ALL {
        let api: Api<DynamicObject> = Api::all_with(client.clone(), &kind.api_resource());
        handles.push(watch(
            api,
            watcher::Config::default().labels(&managed),
            kind.as_str(),
            trigger.clone(),
            cancel.clone(),
        ));
    }

    handles.push(watch(
        Api::<Secret>::all(client.clone()),
        watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY_CERTIFICATES}")),
        "certificate Secret",
        trigger.clone(),
        cancel.clone(),
    ));

    handles
}

/// Watch the cluster and reconcile until cancelled
pub async fn run(ctx: Arc<Context>, client: Client, cancel: CancellationToken) {
    let trigger = Trigger::new();
    let watchers = spawn_watchers(&client, &trigger, &cancel);
    info!(watches = watchers.len(), "starting NetworkAddonsConfig controller");

    run_loop(ctx, trigger, cancel.clone()).await;

    cancel.cancel();
    for handle in watchers {
        if let Err(e) = handle.await {
            warn!(error = %e, "watch task failed");
        }
    }
}
