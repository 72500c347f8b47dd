//! Kafka cluster access for topic administration
//!
//! The reconciler talks to the cluster through two seams:
//! - [`Cluster`] knows the topology and can open a connection to a broker
//! - [`AdminConnection`] issues admin requests to one broker
//!
//! [`KafkaCluster`] and [`BrokerConnection`] implement them over the Kafka
//! wire protocol; [`ControllerManager`] hands out the connection to whichever
//! broker currently holds the controller role.

mod cluster;
mod connection;
mod controller;
mod error_code;
mod transport;

pub use cluster::KafkaCluster;
pub use connection::{BrokerConnection, ClientConfig};
pub use controller::ControllerManager;
pub use error_code::ErrorCode;
pub use transport::SaslPlain;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// A broker as advertised in cluster metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerInfo {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

impl BrokerInfo {
    /// `host:port` for opening a socket
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Metadata for one topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub error: ErrorCode,
    pub partitions: Vec<PartitionMetadata>,
}

/// Metadata for one partition of a topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub partition: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
}

/// A topic to be created
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTopic {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i16,
    pub config_entries: BTreeMap<String, String>,
}

/// Outcome for one named resource inside an admin response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceResult {
    pub name: String,
    pub error: ErrorCode,
    pub message: Option<String>,
}

impl ResourceResult {
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: ErrorCode::None,
            message: None,
        }
    }

    /// Turn a non-`NONE` code into [`Error::TopicOperation`]
    pub fn into_result(self) -> Result<()> {
        if self.error.is_ok() {
            Ok(())
        } else {
            Err(Error::topic_operation(self.name, self.error, self.message))
        }
    }
}

/// One configuration entry as reported by DescribeConfigs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigEntry {
    pub name: String,
    /// `None` for sensitive entries the broker refuses to reveal
    pub value: Option<String>,
}

/// Described configuration of one topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigResource {
    pub name: String,
    pub error: ErrorCode,
    pub message: Option<String>,
    pub entries: Vec<ConfigEntry>,
}

/// Topology view of a cluster plus the means to connect to its brokers
pub trait Cluster: Send + Sync {
    type Connection: AdminConnection;

    /// Look up the broker currently acting as controller
    fn controller(&self) -> impl Future<Output = Result<BrokerInfo>> + Send;

    /// Open a new connection to `broker` with the client's configuration
    fn connect(&self, broker: &BrokerInfo)
        -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// Admin requests against a single broker.
///
/// Implementations serialize their own request/response pairs so one
/// connection can be shared by concurrent callers.
pub trait AdminConnection: Send + Sync {
    /// Whether the underlying transport is still usable
    fn is_connected(&self) -> bool;

    /// Metadata for exactly the named topics, without auto-creating them
    fn metadata(&self, topics: &[String])
        -> impl Future<Output = Result<Vec<TopicMetadata>>> + Send;

    fn create_topics(
        &self,
        topics: &[NewTopic],
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<ResourceResult>>> + Send;

    /// Grow `topic` to `count` partitions in total
    fn create_partitions(
        &self,
        topic: &str,
        count: i32,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<ResourceResult>>> + Send;

    fn delete_topics(
        &self,
        topics: &[String],
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<ResourceResult>>> + Send;

    /// Replace the whole configuration of `topic` with `entries`
    fn alter_topic_configs(
        &self,
        topic: &str,
        entries: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Vec<ResourceResult>>> + Send;

    fn describe_topic_configs(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Vec<ConfigResource>>> + Send;
}
