//! Broker connection speaking the Kafka admin protocol
//!
//! Requests are length-prefixed frames (4 bytes, big-endian) carrying a
//! request header and body encoded by `kafka-protocol`. One request is in
//! flight per connection at a time. The stream is optionally TLS, and SASL/PLAIN
//! authentication runs before the connection is handed out.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use kafka_protocol::messages::alter_configs_request::{AlterConfigsResource, AlterableConfig};
use kafka_protocol::messages::create_partitions_request::CreatePartitionsTopic;
use kafka_protocol::messages::create_topics_request::{CreatableTopic, CreatableTopicConfig};
use kafka_protocol::messages::describe_configs_request::DescribeConfigsResource;
use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::{
    AlterConfigsRequest, CreatePartitionsRequest, CreateTopicsRequest, DeleteTopicsRequest,
    DescribeConfigsRequest, MetadataRequest, MetadataResponse, RequestHeader, ResponseHeader,
    SaslAuthenticateRequest, SaslHandshakeRequest, TopicName,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Request, StrBytes};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use super::transport::{BrokerStream, SaslPlain};
use super::{
    AdminConnection, BrokerInfo, ConfigEntry, ConfigResource, ErrorCode, NewTopic,
    PartitionMetadata, ResourceResult, TopicMetadata,
};
use crate::error::{Error, Result};

const METADATA_VERSION: i16 = 4;
const CREATE_TOPICS_VERSION: i16 = 2;
const CREATE_PARTITIONS_VERSION: i16 = 1;
const DELETE_TOPICS_VERSION: i16 = 1;
const ALTER_CONFIGS_VERSION: i16 = 1;
const DESCRIBE_CONFIGS_VERSION: i16 = 1;
const SASL_HANDSHAKE_VERSION: i16 = 1;
const SASL_AUTHENTICATE_VERSION: i16 = 0;

const SASL_MECHANISM: &str = "PLAIN";

/// Config resource type for topics in Alter/DescribeConfigs
const TOPIC_RESOURCE_TYPE: i8 = 2;

/// Largest response frame accepted (same as Kafka's default message limit)
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Settings shared by every connection a cluster client opens
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// `host:port` entries tried in order for cluster metadata
    pub bootstrap_servers: Vec<String>,
    /// Client id sent in every request header
    pub client_id: String,
    /// Upper bound for connecting and for a single request/response
    pub request_timeout: Duration,
    /// Wrap connections in TLS
    pub tls: bool,
    /// Authenticate with SASL/PLAIN after connecting
    pub sasl: Option<SaslPlain>,
}

/// Cluster-wide view returned by a topic-less metadata request
#[derive(Clone, Debug)]
pub(crate) struct ClusterMetadata {
    pub controller_id: i32,
    pub brokers: Vec<BrokerInfo>,
}

/// An open connection to one broker
pub struct BrokerConnection {
    address: String,
    client_id: StrBytes,
    request_timeout: Duration,
    framed: Mutex<Framed<BrokerStream, LengthDelimitedCodec>>,
    connected: AtomicBool,
    correlation_id: AtomicI32,
}

impl BrokerConnection {
    /// Connect to `address` (`host:port`), then secure and authenticate the
    /// connection as `config` asks
    pub async fn connect(address: &str, config: &ClientConfig) -> Result<Self> {
        let stream = match timeout(config.request_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::connection(format!(
                    "failed to connect to broker {address}: {e}"
                )))
            }
            Err(_) => {
                return Err(Error::connection(format!(
                    "timed out connecting to broker {address} after {:?}",
                    config.request_timeout
                )))
            }
        };
        stream
            .set_nodelay(true)
            .map_err(|e| Error::connection(format!("failed to configure socket for {address}: {e}")))?;

        let stream = if config.tls {
            timeout(config.request_timeout, BrokerStream::tls(stream, address))
                .await
                .map_err(|_| {
                    Error::connection(format!(
                        "timed out during TLS handshake with {address} after {:?}",
                        config.request_timeout
                    ))
                })??
        } else {
            BrokerStream::Plain(stream)
        };

        let codec = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .max_frame_length(MAX_FRAME_SIZE)
            .new_codec();

        let connection = Self {
            address: address.to_string(),
            client_id: StrBytes::from_string(config.client_id.clone()),
            request_timeout: config.request_timeout,
            framed: Mutex::new(Framed::new(stream, codec)),
            connected: AtomicBool::new(true),
            correlation_id: AtomicI32::new(0),
        };

        if let Some(credentials) = &config.sasl {
            connection.authenticate(credentials).await?;
        }

        debug!(broker = %address, tls = config.tls, sasl = config.sasl.is_some(), "Opened broker connection");
        Ok(connection)
    }

    /// SASL/PLAIN: handshake on the mechanism, then send the credentials
    async fn authenticate(&self, credentials: &SaslPlain) -> Result<()> {
        let handshake = SaslHandshakeRequest::default()
            .with_mechanism(StrBytes::from_static_str(SASL_MECHANISM));
        let response = self.send(handshake, SASL_HANDSHAKE_VERSION).await?;
        let code = ErrorCode::from(response.error_code);
        if !code.is_ok() {
            let offered: Vec<&str> = response.mechanisms.iter().map(|m| m.as_str()).collect();
            return Err(Error::connection(format!(
                "SASL handshake with {} failed: {code}; broker offers {offered:?}",
                self.address
            )));
        }

        let authenticate =
            SaslAuthenticateRequest::default().with_auth_bytes(credentials.auth_bytes());
        let response = self.send(authenticate, SASL_AUTHENTICATE_VERSION).await?;
        let code = ErrorCode::from(response.error_code);
        if !code.is_ok() {
            let message = response
                .error_message
                .as_ref()
                .map(|m| format!(": {}", m.as_str()))
                .unwrap_or_default();
            return Err(Error::connection(format!(
                "SASL authentication with {} as '{}' failed: {code}{message}",
                self.address, credentials.username
            )));
        }

        debug!(broker = %self.address, user = %credentials.username, "SASL authentication succeeded");
        Ok(())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Brokers and controller id, without any topic metadata
    pub(crate) async fn cluster_metadata(&self) -> Result<ClusterMetadata> {
        let request = MetadataRequest::default()
            .with_topics(Some(Vec::new()))
            .with_allow_auto_topic_creation(false);
        let response: MetadataResponse = self.send(request, METADATA_VERSION).await?;

        let brokers = response
            .brokers
            .iter()
            .map(|broker| BrokerInfo {
                node_id: broker.node_id.0,
                host: broker.host.as_str().to_owned(),
                port: broker.port,
            })
            .collect();

        Ok(ClusterMetadata {
            controller_id: response.controller_id.0,
            brokers,
        })
    }

    async fn send<R: Request>(&self, request: R, version: i16) -> Result<R::Response> {
        let correlation_id = self.correlation_id.fetch_add(1, Ordering::Relaxed);
        let header = RequestHeader::default()
            .with_request_api_key(R::KEY)
            .with_request_api_version(version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(self.client_id.clone()));

        let mut buf = BytesMut::new();
        header
            .encode(&mut buf, <R as HeaderVersion>::header_version(version))
            .map_err(|e| Error::protocol(format!("failed to encode request header: {e}")))?;
        request
            .encode(&mut buf, version)
            .map_err(|e| Error::protocol(format!("failed to encode request (api key {}): {e}", R::KEY)))?;

        let mut frame = self.round_trip(buf.freeze()).await?;

        let response_header =
            ResponseHeader::decode(&mut frame, <R::Response as HeaderVersion>::header_version(version))
                .map_err(|e| Error::protocol(format!("failed to decode response header: {e}")))?;
        if response_header.correlation_id != correlation_id {
            // Later responses on this stream would be misattributed too.
            self.connected.store(false, Ordering::Release);
            return Err(Error::protocol(format!(
                "correlation id mismatch from {}: sent {}, received {}",
                self.address, correlation_id, response_header.correlation_id
            )));
        }

        R::Response::decode(&mut frame, version)
            .map_err(|e| Error::protocol(format!("failed to decode response (api key {}): {e}", R::KEY)))
    }

    async fn round_trip(&self, payload: Bytes) -> Result<Bytes> {
        let mut framed = self.framed.lock().await;

        let exchange = async {
            framed.send(payload).await?;
            match framed.next().await {
                Some(frame) => frame,
                None => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by broker",
                )),
            }
        };

        match timeout(self.request_timeout, exchange).await {
            Ok(Ok(frame)) => Ok(frame.freeze()),
            Ok(Err(e)) => {
                self.connected.store(false, Ordering::Release);
                warn!(broker = %self.address, error = %e, "Broker request failed");
                Err(Error::connection(format!(
                    "request to broker {} failed: {e}",
                    self.address
                )))
            }
            Err(_) => {
                // The response may still arrive later and would desync the stream.
                self.connected.store(false, Ordering::Release);
                warn!(broker = %self.address, "Broker request timed out");
                Err(Error::connection(format!(
                    "request to broker {} timed out after {:?}",
                    self.address, self.request_timeout
                )))
            }
        }
    }
}

impl AdminConnection for BrokerConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn metadata(&self, topics: &[String]) -> Result<Vec<TopicMetadata>> {
        let request = MetadataRequest::default()
            .with_topics(Some(
                topics
                    .iter()
                    .map(|name| MetadataRequestTopic::default().with_name(Some(topic_name(name))))
                    .collect(),
            ))
            .with_allow_auto_topic_creation(false);
        let response = self.send(request, METADATA_VERSION).await?;

        Ok(response
            .topics
            .into_iter()
            .map(|topic| TopicMetadata {
                name: topic
                    .name
                    .as_ref()
                    .map(|n| n.as_str().to_owned())
                    .unwrap_or_default(),
                error: ErrorCode::from(topic.error_code),
                partitions: topic
                    .partitions
                    .into_iter()
                    .map(|p| PartitionMetadata {
                        partition: p.partition_index,
                        leader: p.leader_id.0,
                        replicas: p.replica_nodes.iter().map(|id| id.0).collect(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn create_topics(&self, topics: &[NewTopic], timeout: Duration) -> Result<Vec<ResourceResult>> {
        let creatable = topics
            .iter()
            .map(|topic| {
                CreatableTopic::default()
                    .with_name(topic_name(&topic.name))
                    .with_num_partitions(topic.num_partitions)
                    .with_replication_factor(topic.replication_factor)
                    .with_configs(
                        topic
                            .config_entries
                            .iter()
                            .map(|(name, value)| {
                                CreatableTopicConfig::default()
                                    .with_name(str_bytes(name))
                                    .with_value(Some(str_bytes(value)))
                            })
                            .collect(),
                    )
            })
            .collect();
        let request = CreateTopicsRequest::default()
            .with_topics(creatable)
            .with_timeout_ms(timeout_ms(timeout));
        let response = self.send(request, CREATE_TOPICS_VERSION).await?;

        Ok(response
            .topics
            .into_iter()
            .map(|topic| ResourceResult {
                name: topic.name.as_str().to_owned(),
                error: ErrorCode::from(topic.error_code),
                message: topic.error_message.map(|m| m.as_str().to_owned()),
            })
            .collect())
    }

    async fn create_partitions(&self, topic: &str, count: i32, timeout: Duration) -> Result<Vec<ResourceResult>> {
        let request = CreatePartitionsRequest::default()
            .with_topics(vec![CreatePartitionsTopic::default()
                .with_name(topic_name(topic))
                .with_count(count)
                .with_assignments(None)])
            .with_timeout_ms(timeout_ms(timeout));
        let response = self.send(request, CREATE_PARTITIONS_VERSION).await?;

        Ok(response
            .results
            .into_iter()
            .map(|result| ResourceResult {
                name: result.name.as_str().to_owned(),
                error: ErrorCode::from(result.error_code),
                message: result.error_message.map(|m| m.as_str().to_owned()),
            })
            .collect())
    }

    async fn delete_topics(&self, topics: &[String], timeout: Duration) -> Result<Vec<ResourceResult>> {
        let request = DeleteTopicsRequest::default()
            .with_topic_names(topics.iter().map(|name| topic_name(name)).collect())
            .with_timeout_ms(timeout_ms(timeout));
        let response = self.send(request, DELETE_TOPICS_VERSION).await?;

        Ok(response
            .responses
            .into_iter()
            .map(|result| ResourceResult {
                name: result
                    .name
                    .as_ref()
                    .map(|n| n.as_str().to_owned())
                    .unwrap_or_default(),
                error: ErrorCode::from(result.error_code),
                message: result.error_message.map(|m| m.as_str().to_owned()),
            })
            .collect())
    }

    async fn alter_topic_configs(
        &self,
        topic: &str,
        entries: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceResult>> {
        let resource = AlterConfigsResource::default()
            .with_resource_type(TOPIC_RESOURCE_TYPE)
            .with_resource_name(str_bytes(topic))
            .with_configs(
                entries
                    .iter()
                    .map(|(name, value)| {
                        AlterableConfig::default()
                            .with_name(str_bytes(name))
                            .with_value(Some(str_bytes(value)))
                    })
                    .collect(),
            );
        let request = AlterConfigsRequest::default()
            .with_resources(vec![resource])
            .with_validate_only(false);
        let response = self.send(request, ALTER_CONFIGS_VERSION).await?;

        Ok(response
            .responses
            .into_iter()
            .map(|result| ResourceResult {
                name: result.resource_name.as_str().to_owned(),
                error: ErrorCode::from(result.error_code),
                message: result.error_message.map(|m| m.as_str().to_owned()),
            })
            .collect())
    }

    async fn describe_topic_configs(&self, topic: &str) -> Result<Vec<ConfigResource>> {
        let request = DescribeConfigsRequest::default().with_resources(vec![
            DescribeConfigsResource::default()
                .with_resource_type(TOPIC_RESOURCE_TYPE)
                .with_resource_name(str_bytes(topic))
                .with_configuration_keys(None),
        ]);
        let response = self.send(request, DESCRIBE_CONFIGS_VERSION).await?;

        Ok(response
            .results
            .into_iter()
            .map(|result| ConfigResource {
                name: result.resource_name.as_str().to_owned(),
                error: ErrorCode::from(result.error_code),
                message: result.error_message.map(|m| m.as_str().to_owned()),
                entries: result
                    .configs
                    .into_iter()
                    .map(|config| ConfigEntry {
                        name: config.name.as_str().to_owned(),
                        value: config.value.map(|v| v.as_str().to_owned()),
                    })
                    .collect(),
            })
            .collect())
    }
}

fn str_bytes(value: &str) -> StrBytes {
    StrBytes::from_string(value.to_owned())
}

fn topic_name(name: &str) -> TopicName {
    TopicName::from(str_bytes(name))
}

fn timeout_ms(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
}
