//! Kafka Topic Kubernetes Operator
//!
//! Main entry point for the operator. Loads configuration, sets up the
//! Kubernetes and Kafka clients, and runs the KafkaTopic reconciliation loop.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kafka_topic_operator::{
    config::OperatorConfig,
    controllers::{self, Context},
    kafka::{ControllerManager, KafkaCluster},
    metrics,
    reconcilers::TopicReconciler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting Kafka Topic Operator");

    let config = OperatorConfig::from_env()?;
    info!(
        hosts = ?config.bootstrap_servers,
        operation_timeout = ?config.operation_timeout,
        "Loaded operator configuration"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // One cluster client shared by every reconciliation
    let cluster = KafkaCluster::new(config.client_config());
    let controller = Arc::new(ControllerManager::new(cluster));
    let reconciler =
        TopicReconciler::new(controller).with_operation_timeout(config.operation_timeout);

    let metrics_port = config.metrics_port;
    let context = Arc::new(Context::new(client.clone(), reconciler, config));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let topic_controller = controllers::run_topic_controller(client, context);

    // Handle graceful shutdown
    tokio::select! {
        _ = topic_controller => {
            error!("Topic controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        result = shutdown_signal() => {
            result?;
            info!("Received shutdown signal, stopping operator");
        }
    }

    info!("Kafka Topic Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Resolve on SIGTERM or SIGINT
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received CTRL+C signal");
        }
        _ = terminate.recv() => {
            info!("Received SIGTERM signal");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    signal::ctrl_c().await
}
