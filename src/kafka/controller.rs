//! Serialized access to the controller broker

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{AdminConnection, Cluster};
use crate::error::{Error, Result};
use crate::metrics;

/// Owns the cluster client and the open broker connections.
///
/// Controller lookup and the optional connect run under one lock, so
/// concurrent reconciliations never race on discovery or open duplicate
/// connections. Connections live as long as the manager.
pub struct ControllerManager<C: Cluster> {
    cluster: C,
    connections: Mutex<HashMap<i32, Arc<C::Connection>>>,
}

impl<C: Cluster> ControllerManager<C> {
    pub fn new(cluster: C) -> Self {
        Self {
            cluster,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Connection to the broker that currently holds the controller role
    pub async fn acquire_controller(&self) -> Result<Arc<C::Connection>> {
        let mut connections = self.connections.lock().await;

        let broker = self
            .cluster
            .controller()
            .await
            .map_err(|e| into_connection_error("controller lookup failed", e))?;

        if let Some(connection) = connections.get(&broker.node_id) {
            if connection.is_connected() {
                debug!(controller = broker.node_id, "Reusing controller connection");
                return Ok(connection.clone());
            }
        }

        let connection = match self.cluster.connect(&broker).await {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                metrics::CONTROLLER_CONNECTIONS
                    .with_label_values(&["failure"])
                    .inc();
                return Err(into_connection_error(
                    &format!("failed to connect to controller {}", broker.address()),
                    e,
                ));
            }
        };
        metrics::CONTROLLER_CONNECTIONS
            .with_label_values(&["success"])
            .inc();
        info!(
            controller = broker.node_id,
            address = %broker.address(),
            "Connected to controller broker"
        );

        connections.insert(broker.node_id, connection.clone());
        Ok(connection)
    }
}

fn into_connection_error(context: &str, error: Error) -> Error {
    match error {
        Error::Connection(msg) => Error::connection(format!("{context}: {msg}")),
        other => Error::connection(format!("{context}: {other}")),
    }
}
