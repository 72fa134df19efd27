//! Operator liveness, readiness and metrics
//!
//! Served on a loopback address and exposed through the kube-rbac-proxy
//! sidecar of the operator Deployment. These signals describe the operator
//! process, not the operands: a stopped operator drops them while the last
//! written NetworkAddonsConfig conditions stay in place.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome label of `kubevirt_cnao_reconcile_total`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassResult {
    /// The pass completed, whatever the operand state
    Success,
    /// The pass aborted with an error
    Error,
}

impl PassResult {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Prometheus metrics and readiness of the operator process
pub struct OperatorMetrics {
    registry: Registry,
    operator_up: IntGauge,
    cr_ready: IntGauge,
    reconcile_total: IntCounterVec,
    component_ready: IntGaugeVec,
    ready: AtomicBool,
}

impl OperatorMetrics {
    /// Create and register the operator metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operator_up = IntGauge::new("kubevirt_cnao_operator_up", "Whether the operator process is running")?;
        registry.register(Box::new(operator_up.clone()))?;

        let cr_ready = IntGauge::new(
            "kubevirt_cnao_cr_ready",
            "Whether the NetworkAddonsConfig reports Available=True",
        )?;
        registry.register(Box::new(cr_ready.clone()))?;

        let reconcile_total = IntCounterVec::new(
            Opts::new("kubevirt_cnao_reconcile_total", "Reconciliation passes by result"),
            &["result"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;

        let component_ready = IntGaugeVec::new(
            Opts::new("kubevirt_cnao_component_ready", "Readiness of each enabled component"),
            &["component"],
        )?;
        registry.register(Box::new(component_ready.clone()))?;

        operator_up.set(1);

        Ok(Self {
            registry,
            operator_up,
            cr_ready,
            reconcile_total,
            component_ready,
            ready: AtomicBool::new(false),
        })
    }

    /// Count a finished pass
    pub fn record_pass(&self, result: PassResult) {
        self.reconcile_total.with_label_values(&[result.as_str()]).inc();
        if result == PassResult::Success {
            self.ready.store(true, Ordering::Release);
        }
    }

    /// Publish the overall availability of the config
    pub fn set_cr_ready(&self, ready: bool) {
        self.cr_ready.set(i64::from(ready));
    }

    /// Replace the per-component readiness series
    pub fn set_components<'a>(&self, components: impl IntoIterator<Item = (&'a str, bool)>) {
        self.component_ready.reset();
        for (component, ready) in components {
            self.component_ready
                .with_label_values(&[component])
                .set(i64::from(ready));
        }
    }

    /// Whether the operator completed at least one pass
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Mark the process as going away
    pub fn shutdown(&self) {
        self.operator_up.set(0);
        self.ready.store(false, Ordering::Release);
    }

    /// Metrics in the Prometheus text format
    pub fn export(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Arc<OperatorMetrics>>) -> Response {
    if metrics.is_ready() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics_handler(State(metrics): State<Arc<OperatorMetrics>>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics.export(),
    )
        .into_response()
}

/// Router serving `/healthz`, `/readyz` and `/metrics`
pub fn health_router(metrics: Arc<OperatorMetrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serve the health router on `addr` until cancelled
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<OperatorMetrics>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "health server listening");
    axum::serve(listener, health_router(metrics))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
