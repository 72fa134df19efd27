//! Cluster network add-ons operator

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};

use network_addons_operator::certs::{RcgenIssuer, RotationEngine, SecretCertStore, DEFAULT_TICK_INTERVAL};
use network_addons_operator::config::OperatorConfig;
use network_addons_operator::controller::{self, Context};
use network_addons_operator::crd::NetworkAddonsConfig;
use network_addons_operator::health::{self, OperatorMetrics};
use network_addons_operator::render;
use network_addons_operator::telemetry::{init_telemetry, TelemetryConfig};
use network_addons_operator::DEFAULT_HEALTH_ADDR;
use tokio_util::sync::CancellationToken;

/// Deploys and keeps converged the network add-ons declared by the NetworkAddonsConfig
#[derive(Parser, Debug)]
#[command(name = "cluster-network-addons-operator", version, about, long_about = None)]
struct Cli {
    /// Print the NetworkAddonsConfig CRD and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller(ControllerArgs),

    /// Print the operator installation manifests
    ///
    /// CRD, RBAC, operator Deployment and a sample config, rendered with the
    /// same environment the controller would read.
    Manifests,

    /// Print the related-images list used for disconnected mirroring
    RelatedImages,
}

#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Address serving /healthz, /readyz and /metrics
    #[arg(long, env = "HEALTH_ADDR", default_value = DEFAULT_HEALTH_ADDR)]
    health_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - FIPS-validated aws-lc-rs
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install crypto provider: {:?}. \
             The operator cannot talk to the API server without a working TLS implementation.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&NetworkAddonsConfig::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let operator = OperatorConfig::from_env();

    match cli.command {
        Some(Commands::Manifests) => {
            print!("{}", render::operator::manifests(&operator)?);
            Ok(())
        }
        Some(Commands::RelatedImages) => {
            let operator_image = operator.operator_image();
            let images = operator.images.related_images(&[operator_image.as_str()]);
            println!("{}", serde_json::to_string_pretty(&images)?);
            Ok(())
        }
        Some(Commands::Controller(args)) => run_controller(operator, args.health_addr).await,
        None => {
            let health_addr = DEFAULT_HEALTH_ADDR.parse()?;
            run_controller(operator, health_addr).await
        }
    }
}

/// Run the controller, the rotation engine and the health server until interrupted
async fn run_controller(operator: OperatorConfig, health_addr: SocketAddr) -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::default())?;

    tracing::info!(
        version = %operator.operator_version,
        namespace = %operator.operand_namespace,
        "starting cluster-network-addons-operator"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let metrics = Arc::new(OperatorMetrics::new()?);
    let namespace = operator.operand_namespace.clone();
    let ctx = Arc::new(
        Context::builder(client.clone())
            .operator_config(operator)
            .metrics(metrics.clone())
            .build()?,
    );

    let cancel = CancellationToken::new();

    let engine = RotationEngine::new(
        Arc::new(SecretCertStore::new(client.clone(), namespace)),
        Arc::new(RcgenIssuer),
    );
    let engine_task = tokio::spawn(engine.run(ctx.subscribe_plans(), DEFAULT_TICK_INTERVAL, cancel.clone()));

    let health_task = tokio::spawn(health::serve(health_addr, metrics.clone(), cancel.clone()));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
        }
        signal_cancel.cancel();
    });

    controller::run(ctx, client, cancel.clone()).await;

    metrics.shutdown();
    cancel.cancel();

    if let Err(e) = engine_task.await {
        tracing::warn!(error = %e, "rotation engine task failed");
    }
    match health_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "health server failed"),
        Err(e) => tracing::warn!(error = %e, "health server task failed"),
    }

    tracing::info!("cluster-network-addons-operator shutting down");
    Ok(())
}
