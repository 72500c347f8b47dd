//! In-memory Kafka cluster for driving the reconciler in tests

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kafka_topic_operator::kafka::{
    AdminConnection, BrokerInfo, Cluster, ConfigEntry, ConfigResource, ControllerManager,
    ErrorCode, NewTopic, PartitionMetadata, ResourceResult, TopicMetadata,
};
use kafka_topic_operator::reconcilers::TopicReconciler;
use kafka_topic_operator::{Error, Result};

/// Brokers in the fake cluster; replication factors above this are rejected
pub const BROKERS: i16 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rpc {
    Metadata,
    CreateTopics,
    CreatePartitions,
    DeleteTopics,
    AlterConfigs,
    DescribeConfigs,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeTopic {
    pub partitions: i32,
    pub replication_factor: i16,
    pub config: BTreeMap<String, String>,
}

/// Injected error and how many more calls it applies to; `None` is every call
#[derive(Clone, Copy)]
struct Failure {
    code: ErrorCode,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    topics: BTreeMap<String, FakeTopic>,
    calls: HashMap<Rpc, usize>,
    controller_lookups: usize,
    connects: usize,
    refuse_connections: bool,
    failures: HashMap<Rpc, Failure>,
    duplicate_metadata: bool,
    sensitive: BTreeSet<String>,
}

impl State {
    /// Error injected for this call of `rpc`, if any
    fn injected(&mut self, rpc: Rpc) -> Option<ErrorCode> {
        let failure = self.failures.get_mut(&rpc)?;
        let code = failure.code;
        let exhausted = match failure.remaining.as_mut() {
            Some(n) => {
                *n -= 1;
                *n == 0
            }
            None => false,
        };
        if exhausted {
            self.failures.remove(&rpc);
        }
        Some(code)
    }
}

/// Shared handle to the fake cluster; clones see the same state
#[derive(Clone, Default)]
pub struct FakeKafka {
    state: Arc<Mutex<State>>,
}

impl FakeKafka {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciler wired to this cluster through a fresh controller manager
    pub fn reconciler(&self) -> TopicReconciler<FakeKafka> {
        TopicReconciler::new(Arc::new(ControllerManager::new(self.clone())))
            .with_operation_timeout(Duration::from_secs(15))
    }

    pub fn calls(&self, rpc: Rpc) -> usize {
        self.state.lock().unwrap().calls.get(&rpc).copied().unwrap_or(0)
    }

    /// Admin RPCs plus controller lookups and connects
    pub fn total_calls(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.values().sum::<usize>() + state.controller_lookups + state.connects
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn topic(&self, name: &str) -> Option<FakeTopic> {
        self.state.lock().unwrap().topics.get(name).cloned()
    }

    pub fn insert_topic(&self, name: &str, partitions: i32, replication_factor: i16, config: &[(&str, &str)]) {
        self.state.lock().unwrap().topics.insert(
            name.to_string(),
            FakeTopic {
                partitions,
                replication_factor,
                config: entries(config),
            },
        );
    }

    /// Simulate a topic deleted by someone else
    pub fn remove_topic(&self, name: &str) {
        self.state.lock().unwrap().topics.remove(name);
    }

    /// Make every following `rpc` fail with `code` for its resource
    pub fn fail(&self, rpc: Rpc, code: ErrorCode) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(rpc, Failure { code, remaining: None });
    }

    /// Make the next `times` calls of `rpc` fail with `code`
    pub fn fail_times(&self, rpc: Rpc, code: ErrorCode, times: usize) {
        assert!(times > 0);
        self.state.lock().unwrap().failures.insert(
            rpc,
            Failure {
                code,
                remaining: Some(times),
            },
        );
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connections = refuse;
    }

    /// Report `key` without its value, as brokers do for passwords
    pub fn sensitive(&self, key: &str) {
        self.state.lock().unwrap().sensitive.insert(key.to_string());
    }

    /// Return every metadata entry twice
    pub fn duplicate_metadata(&self, duplicate: bool) {
        self.state.lock().unwrap().duplicate_metadata = duplicate;
    }
}

pub fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Broker defaults reported by DescribeConfigs for every topic
fn broker_defaults() -> BTreeMap<String, String> {
    entries(&[
        ("cleanup.policy", "delete"),
        ("retention.ms", "604800000"),
        ("retention.bytes", "-1"),
        ("segment.bytes", "1073741824"),
        ("min.insync.replicas", "1"),
    ])
}

impl Cluster for FakeKafka {
    type Connection = FakeConnection;

    async fn controller(&self) -> Result<BrokerInfo> {
        self.state.lock().unwrap().controller_lookups += 1;
        Ok(BrokerInfo {
            node_id: 1,
            host: "kafka-1".to_string(),
            port: 9092,
        })
    }

    async fn connect(&self, broker: &BrokerInfo) -> Result<FakeConnection> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connections {
            return Err(Error::connection(format!(
                "failed to connect to broker {}: connection refused",
                broker.address()
            )));
        }
        state.connects += 1;
        Ok(FakeConnection {
            state: self.state.clone(),
        })
    }
}

pub struct FakeConnection {
    state: Arc<Mutex<State>>,
}

impl FakeConnection {
    /// Count the call and lock the cluster state
    fn enter(&self, rpc: Rpc) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(rpc).or_default() += 1;
        state
    }
}

fn result(name: &str, code: ErrorCode, message: Option<&str>) -> ResourceResult {
    ResourceResult {
        name: name.to_string(),
        error: code,
        message: message.map(str::to_string),
    }
}

impl AdminConnection for FakeConnection {
    fn is_connected(&self) -> bool {
        true
    }

    async fn metadata(&self, topics: &[String]) -> Result<Vec<TopicMetadata>> {
        let mut state = self.enter(Rpc::Metadata);
        let injected = state.injected(Rpc::Metadata);

        let mut response: Vec<TopicMetadata> = topics
            .iter()
            .map(|name| match (injected, state.topics.get(name)) {
                (Some(code), _) => TopicMetadata {
                    name: name.clone(),
                    error: code,
                    partitions: vec![],
                },
                (None, None) => TopicMetadata {
                    name: name.clone(),
                    error: ErrorCode::UnknownTopicOrPartition,
                    partitions: vec![],
                },
                (None, Some(topic)) => TopicMetadata {
                    name: name.clone(),
                    error: ErrorCode::None,
                    partitions: (0..topic.partitions)
                        .map(|partition| PartitionMetadata {
                            partition,
                            leader: 1,
                            replicas: (1..=i32::from(topic.replication_factor)).collect(),
                        })
                        .collect(),
                },
            })
            .collect();

        if state.duplicate_metadata {
            response.extend(response.clone());
        }
        Ok(response)
    }

    async fn create_topics(&self, topics: &[NewTopic], _timeout: Duration) -> Result<Vec<ResourceResult>> {
        let mut state = self.enter(Rpc::CreateTopics);
        let injected = state.injected(Rpc::CreateTopics);

        Ok(topics
            .iter()
            .map(|topic| {
                if let Some(code) = injected {
                    return result(&topic.name, code, None);
                }
                if state.topics.contains_key(&topic.name) {
                    return result(
                        &topic.name,
                        ErrorCode::TopicAlreadyExists,
                        Some(&format!("Topic '{}' already exists.", topic.name)),
                    );
                }
                if topic.replication_factor > BROKERS {
                    return result(
                        &topic.name,
                        ErrorCode::InvalidReplicationFactor,
                        Some("Replication factor is larger than available brokers"),
                    );
                }
                state.topics.insert(
                    topic.name.clone(),
                    FakeTopic {
                        partitions: topic.num_partitions,
                        replication_factor: topic.replication_factor,
                        config: topic.config_entries.clone(),
                    },
                );
                result(&topic.name, ErrorCode::None, None)
            })
            .collect())
    }

    async fn create_partitions(&self, topic: &str, count: i32, _timeout: Duration) -> Result<Vec<ResourceResult>> {
        let mut state = self.enter(Rpc::CreatePartitions);
        if let Some(code) = state.injected(Rpc::CreatePartitions) {
            return Ok(vec![result(topic, code, None)]);
        }

        let outcome = match state.topics.get_mut(topic) {
            None => result(topic, ErrorCode::UnknownTopicOrPartition, None),
            Some(existing) if count <= existing.partitions => result(
                topic,
                ErrorCode::InvalidPartitions,
                Some(&format!("Topic already has {} partitions.", existing.partitions)),
            ),
            Some(existing) => {
                existing.partitions = count;
                result(topic, ErrorCode::None, None)
            }
        };
        Ok(vec![outcome])
    }

    async fn delete_topics(&self, topics: &[String], _timeout: Duration) -> Result<Vec<ResourceResult>> {
        let mut state = self.enter(Rpc::DeleteTopics);
        let injected = state.injected(Rpc::DeleteTopics);

        Ok(topics
            .iter()
            .map(|name| match injected {
                Some(code) => result(name, code, None),
                None if state.topics.remove(name).is_some() => result(name, ErrorCode::None, None),
                None => result(name, ErrorCode::UnknownTopicOrPartition, None),
            })
            .collect())
    }

    async fn alter_topic_configs(
        &self,
        topic: &str,
        entries: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceResult>> {
        let mut state = self.enter(Rpc::AlterConfigs);
        if let Some(code) = state.injected(Rpc::AlterConfigs) {
            return Ok(vec![result(topic, code, Some("Invalid value for config"))]);
        }

        let outcome = match state.topics.get_mut(topic) {
            None => result(topic, ErrorCode::UnknownTopicOrPartition, None),
            Some(existing) => {
                // AlterConfigs replaces the whole set
                existing.config = entries.clone();
                result(topic, ErrorCode::None, None)
            }
        };
        Ok(vec![outcome])
    }

    async fn describe_topic_configs(&self, topic: &str) -> Result<Vec<ConfigResource>> {
        let mut state = self.enter(Rpc::DescribeConfigs);
        if let Some(code) = state.injected(Rpc::DescribeConfigs) {
            return Ok(vec![ConfigResource {
                name: topic.to_string(),
                error: code,
                message: Some("describe failed".to_string()),
                entries: vec![],
            }]);
        }

        let resource = match state.topics.get(topic) {
            None => ConfigResource {
                name: topic.to_string(),
                error: ErrorCode::UnknownTopicOrPartition,
                message: None,
                entries: vec![],
            },
            Some(existing) => {
                let mut config = broker_defaults();
                config.extend(existing.config.clone());
                ConfigResource {
                    name: topic.to_string(),
                    error: ErrorCode::None,
                    message: None,
                    entries: config
                        .into_iter()
                        .map(|(name, value)| ConfigEntry {
                            value: (!state.sensitive.contains(&name)).then_some(value),
                            name,
                        })
                        .collect(),
                }
            }
        };
        Ok(vec![resource])
    }
}
