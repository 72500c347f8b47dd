//! Topic reconciler
//!
//! Drives a single topic through its lifecycle against the controller broker:
//! - create, then read back what the cluster actually holds
//! - read, detecting topics deleted behind our back
//! - update, growing partitions and replacing configuration
//! - delete, and import of topics created elsewhere
//!
//! Nothing here retries; the caller owns retry and backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::config_diff::{self, ConfigDiff, ConfigEntries, TrackedKeys};
use crate::error::{Error, Result};
use crate::kafka::{AdminConnection, Cluster, ControllerManager, ErrorCode, NewTopic, ResourceResult};
use crate::metrics;

/// Server-side timeout for create, partition increase and delete
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Desired state of a topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i16,
    pub config_entries: ConfigEntries,
}

/// State of a topic as read from the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicObservedState {
    pub name: String,
    pub partition_count: i32,
    /// Replica count of the first partition; 0 without partitions
    pub replication_factor: i16,
    pub exists: bool,
    /// Cluster values of the tracked configuration keys only
    pub config_entries: ConfigEntries,
    /// Tracked keys that are set but whose values the cluster does not reveal
    pub withheld_keys: TrackedKeys,
}

impl TopicObservedState {
    /// The observed state expressed as a spec, for diffing against a new one
    pub fn to_spec(&self) -> TopicSpec {
        TopicSpec {
            name: self.name.clone(),
            num_partitions: self.partition_count,
            replication_factor: self.replication_factor,
            config_entries: self.config_entries.clone(),
        }
    }

    /// Like [`to_spec`](Self::to_spec), with withheld values assumed to match
    /// `desired`. A withheld key `desired` no longer declares stays visible
    /// so its removal is seen.
    pub fn to_spec_against(&self, desired: &TopicSpec) -> TopicSpec {
        let mut spec = self.to_spec();
        for key in &self.withheld_keys {
            let value = desired.config_entries.get(key).cloned().unwrap_or_default();
            spec.config_entries.insert(key.clone(), value);
        }
        spec
    }
}

/// Result of reading a topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Present(TopicObservedState),
    /// The topic is gone; the caller should forget its identity
    Absent,
}

/// Validate a topic spec before it is sent anywhere
pub fn validate(spec: &TopicSpec) -> Result<()> {
    if spec.name.trim().is_empty() {
        return Err(Error::validation("Topic name must not be empty"));
    }
    if spec.num_partitions < 1 {
        return Err(Error::validation(format!(
            "Invalid partition count {}: must be greater than 0",
            spec.num_partitions
        )));
    }
    if spec.replication_factor < 1 {
        return Err(Error::validation(format!(
            "Invalid replication factor {}: must be greater than 0",
            spec.replication_factor
        )));
    }
    Ok(())
}

/// Reconciles topics through whichever broker is currently controller
pub struct TopicReconciler<C: Cluster> {
    controller: Arc<ControllerManager<C>>,
    operation_timeout: Duration,
}

impl<C: Cluster> TopicReconciler<C> {
    pub fn new(controller: Arc<ControllerManager<C>>) -> Self {
        Self {
            controller,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Create the topic, then read it back from the cluster
    pub async fn create(&self, spec: &TopicSpec) -> Result<TopicObservedState> {
        self.create_topic(spec).await?;
        self.read_created(spec).await
    }

    /// Issue CreateTopics only. On success the topic exists and `spec.name`
    /// is its identity, whatever happens next.
    pub async fn create_topic(&self, spec: &TopicSpec) -> Result<()> {
        validate(spec)?;

        observe("create", async {
            let controller = self.controller.acquire_controller().await?;
            let request = NewTopic {
                name: spec.name.clone(),
                num_partitions: spec.num_partitions,
                replication_factor: spec.replication_factor,
                config_entries: spec.config_entries.clone(),
            };
            let results = controller
                .create_topics(std::slice::from_ref(&request), self.operation_timeout)
                .await?;
            single_result(results, &spec.name)?.into_result()
        })
        .await?;

        info!(
            topic = %spec.name,
            partitions = spec.num_partitions,
            replication_factor = spec.replication_factor,
            configs = spec.config_entries.len(),
            "Created topic"
        );
        Ok(())
    }

    /// Read back a topic just created from `spec`, tracking its declared keys
    pub async fn read_created(&self, spec: &TopicSpec) -> Result<TopicObservedState> {
        match self.read(&spec.name, &config_diff::tracked_keys(&spec.config_entries)).await? {
            ReadOutcome::Present(state) => Ok(state),
            ReadOutcome::Absent => Err(Error::Absent(spec.name.clone())),
        }
    }

    /// Read the topic, reporting configuration only for `tracked` keys.
    ///
    /// With no tracked keys the configuration is not fetched at all.
    pub async fn read(&self, name: &str, tracked: &TrackedKeys) -> Result<ReadOutcome> {
        observe("read", async {
            let controller = self.controller.acquire_controller().await?;

            let topics = controller.metadata(&[name.to_string()]).await?;
            let count = topics.len();
            let Ok([topic]) = <[_; 1]>::try_from(topics) else {
                return Err(Error::protocol(format!(
                    "expected 1 topic in metadata for '{name}', got {count}"
                )));
            };

            match topic.error {
                ErrorCode::None => {}
                ErrorCode::UnknownTopicOrPartition => {
                    info!(topic = %name, "Topic does not exist on the cluster");
                    return Ok(ReadOutcome::Absent);
                }
                code => return Err(Error::topic_operation(name, code, None)),
            }

            let partition_count = i32::try_from(topic.partitions.len())
                .map_err(|_| Error::protocol(format!("too many partitions for '{name}'")))?;
            // First partition only; heterogeneous replica counts are not reconciled.
            let replication_factor = topic
                .partitions
                .first()
                .map_or(0, |partition| partition.replicas.len());
            let replication_factor = i16::try_from(replication_factor)
                .map_err(|_| Error::protocol(format!("too many replicas for '{name}'")))?;

            let (config_entries, withheld_keys) = if tracked.is_empty() {
                (ConfigEntries::new(), TrackedKeys::new())
            } else {
                let resources = controller.describe_topic_configs(name).await?;
                let count = resources.len();
                let Ok([resource]) = <[_; 1]>::try_from(resources) else {
                    return Err(Error::protocol(format!(
                        "expected 1 config resource for '{name}', got {count}"
                    )));
                };
                if !resource.error.is_ok() {
                    return Err(Error::topic_operation(name, resource.error, resource.message));
                }
                (
                    config_diff::observed_entries(&resource.entries, tracked),
                    config_diff::withheld_keys(&resource.entries, tracked),
                )
            };

            debug!(
                topic = %name,
                partitions = partition_count,
                replication_factor = replication_factor,
                configs = config_entries.len(),
                "Read topic"
            );

            Ok(ReadOutcome::Present(TopicObservedState {
                name: if topic.name.is_empty() { name.to_string() } else { topic.name },
                partition_count,
                replication_factor,
                exists: true,
                config_entries,
                withheld_keys,
            }))
        })
        .await
    }

    /// Move the topic from `old` to `new`, then read it back.
    ///
    /// All constraint checks happen before the controller is contacted. A
    /// failure after partitions were grown leaves them grown; calling again
    /// converges.
    pub async fn update(&self, old: &TopicSpec, new: &TopicSpec) -> Result<ReadOutcome> {
        if old.name != new.name {
            return Err(Error::validation(format!(
                "Topic name cannot change in place ('{}' -> '{}'); the topic must be replaced",
                old.name, new.name
            )));
        }
        if old.replication_factor != new.replication_factor {
            return Err(Error::unsupported_change(format!(
                "replication factor of '{}' cannot be changed ({} -> {})",
                new.name, old.replication_factor, new.replication_factor
            )));
        }
        if new.num_partitions < old.num_partitions {
            return Err(Error::validation(format!(
                "partition count of '{}' can only grow: new {} must be >= old {}",
                new.name, new.num_partitions, old.num_partitions
            )));
        }

        let grow_partitions = new.num_partitions != old.num_partitions;
        let config_diff = ConfigDiff::between(&old.config_entries, &new.config_entries);

        if grow_partitions || !config_diff.is_empty() {
            observe("update", async {
                let controller = self.controller.acquire_controller().await?;

                if grow_partitions {
                    let results = controller
                        .create_partitions(&new.name, new.num_partitions, self.operation_timeout)
                        .await?;
                    single_result(results, &new.name)?.into_result()?;
                    info!(
                        topic = %new.name,
                        from = old.num_partitions,
                        to = new.num_partitions,
                        "Increased partition count"
                    );
                }

                if !config_diff.is_empty() {
                    let entries = config_diff::alteration_entries(&new.config_entries);
                    let results = controller.alter_topic_configs(&new.name, &entries).await?;
                    for result in results {
                        result.into_result()?;
                    }
                    info!(
                        topic = %new.name,
                        added = ?config_diff.added,
                        changed = ?config_diff.changed,
                        removed = ?config_diff.removed,
                        "Replaced topic configuration"
                    );
                }

                Ok(())
            })
            .await?;
        } else {
            debug!(topic = %new.name, "No changes to apply");
        }

        self.read(&new.name, &config_diff::tracked_keys(&new.config_entries))
            .await
    }

    /// Delete the topic. The caller drops its identity on success.
    pub async fn delete(&self, name: &str) -> Result<()> {
        observe("delete", async {
            let controller = self.controller.acquire_controller().await?;
            let results = controller
                .delete_topics(&[name.to_string()], self.operation_timeout)
                .await?;
            single_result(results, name)?.into_result()
        })
        .await?;

        info!(topic = %name, "Deleted topic");
        Ok(())
    }

    /// Adopt a topic created outside this operator
    pub async fn import(&self, name: &str, tracked: &TrackedKeys) -> Result<TopicObservedState> {
        match self.read(name, tracked).await? {
            ReadOutcome::Present(state) => {
                info!(topic = %name, "Imported existing topic");
                Ok(state)
            }
            ReadOutcome::Absent => Err(Error::Absent(name.to_string())),
        }
    }
}

/// The result for `name` in a response to a single-topic request
fn single_result(results: Vec<ResourceResult>, name: &str) -> Result<ResourceResult> {
    let count = results.len();
    let mut matching = results.into_iter().filter(|result| result.name == name);
    match (matching.next(), matching.next()) {
        (Some(result), None) => Ok(result),
        _ => Err(Error::protocol(format!(
            "expected exactly 1 result for topic '{name}', got {count} results"
        ))),
    }
}

/// Record duration and outcome of one topic operation
async fn observe<T>(
    operation: &str,
    future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    let started = Instant::now();
    let result = future.await;

    metrics::TOPIC_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());
    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => {
            warn!(operation = operation, error = %e, "Topic operation failed");
            "failure"
        }
    };
    metrics::TOPIC_OPERATIONS
        .with_label_values(&[operation, outcome])
        .inc();

    result
}
