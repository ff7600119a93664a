use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use networksim_operator::{
    api::AppState,
    config::Config,
    controller::TopologyController,
    create_router,
    error::{Error, ReconcileError},
    k8s::K8sClient,
    models::Topology,
    workload::WorkloadRenderer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs() {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(namespace = %config.namespace, "Starting NetworkSim operator");

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Metrics recorder not installed: {}", e);
            None
        }
    };
    let state = AppState::new(metrics);

    let client = K8sClient::new(&config.namespace).await?;
    client.health_check().await?;
    client.ensure_namespace().await?;

    let mut renderer = WorkloadRenderer::default();
    config.apply_overrides(renderer.classifier_mut());
    let controller = TopologyController::new(Arc::new(client), renderer, config.namespace.clone());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = create_router(state.clone());
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    let mut ticker = tokio::time::interval(config.reconcile_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Read fresh every pass: nothing is cached between passes
        let topology = match Topology::from_yaml_file(&config.topology_path) {
            Ok(topology) => topology,
            Err(e) => {
                tracing::error!(path = %config.topology_path, "Failed to load topology: {}", e);
                state
                    .record_failure(&config.topology_path, &Error::from(e))
                    .await;
                continue;
            }
        };

        match controller.reconcile(&topology, &cancel).await {
            Ok(report) => state.record_report(&report).await,
            Err(Error::Reconcile(ReconcileError::Cancelled)) => break,
            Err(e) => state.record_failure(&topology.name, &e).await,
        }
    }

    tracing::info!("Shutting down");
    server.await??;

    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
