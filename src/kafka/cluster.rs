//! Cluster client over the Kafka wire protocol

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::connection::{BrokerConnection, ClientConfig};
use super::{AdminConnection, BrokerInfo, Cluster};
use crate::error::{Error, Result};

/// Cluster client that discovers the controller through a bootstrap broker
pub struct KafkaCluster {
    config: ClientConfig,
    bootstrap: Mutex<Option<Arc<BrokerConnection>>>,
}

impl KafkaCluster {
    pub fn new(config: ClientConfig) -> Self {
        info!(
            hosts = ?config.bootstrap_servers,
            client_id = %config.client_id,
            tls = config.tls,
            sasl = config.sasl.is_some(),
            "Initializing Kafka cluster client"
        );
        Self {
            config,
            bootstrap: Mutex::new(None),
        }
    }

    /// Return the cached bootstrap connection, or connect to the first
    /// reachable bootstrap server.
    async fn bootstrap_connection(&self) -> Result<Arc<BrokerConnection>> {
        let mut cached = self.bootstrap.lock().await;
        if let Some(connection) = cached.as_ref() {
            if connection.is_connected() {
                return Ok(connection.clone());
            }
        }

        if self.config.bootstrap_servers.is_empty() {
            return Err(Error::connection("no bootstrap servers configured"));
        }

        let mut last_error = None;
        for address in &self.config.bootstrap_servers {
            match BrokerConnection::connect(address, &self.config).await {
                Ok(connection) => {
                    debug!(broker = %address, "Connected to bootstrap broker");
                    let connection = Arc::new(connection);
                    *cached = Some(connection.clone());
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(broker = %address, error = %e, "Bootstrap broker unreachable");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::connection("no bootstrap broker reachable")))
    }
}

impl Cluster for KafkaCluster {
    type Connection = BrokerConnection;

    async fn controller(&self) -> Result<BrokerInfo> {
        let bootstrap = self.bootstrap_connection().await?;
        let metadata = bootstrap.cluster_metadata().await?;

        metadata
            .brokers
            .into_iter()
            .find(|broker| broker.node_id == metadata.controller_id)
            .ok_or_else(|| {
                Error::connection(format!(
                    "controller {} is not in the broker list returned by {}",
                    metadata.controller_id,
                    bootstrap.address()
                ))
            })
    }

    async fn connect(&self, broker: &BrokerInfo) -> Result<BrokerConnection> {
        BrokerConnection::connect(&broker.address(), &self.config).await
    }
}
