//! KafkaTopic reconciler
//!
//! Handles the business logic for KafkaTopic resources including:
//! - Spec validation
//! - Identity bookkeeping through the resource status
//! - Drift detection, replacement on rename, recreation after external deletion
//! - Status updates

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::{
    api::{Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::config_diff::{self, ConfigDiff, TrackedKeys};
use super::topic::{self, ReadOutcome, TopicObservedState, TopicReconciler, TopicSpec};
use crate::crd::{DeletionPolicy, KafkaTopic, KafkaTopicStatus};
use crate::error::{Error, Result};
use crate::kafka::{Cluster, ErrorCode};
use crate::metrics;

const FIELD_MANAGER: &str = "kafka-topic-operator";

/// What a sync did to bring the cluster in line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    Created,
    Adopted,
    Updated,
    Replaced,
    Recreated,
    InSync,
}

impl SyncAction {
    pub fn reason(self) -> &'static str {
        match self {
            SyncAction::Created => "TopicCreated",
            SyncAction::Adopted => "TopicAdopted",
            SyncAction::Updated => "TopicUpdated",
            SyncAction::Replaced => "TopicReplaced",
            SyncAction::Recreated => "TopicRecreated",
            SyncAction::InSync => "TopicInSync",
        }
    }
}

/// Result of a successful sync
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOutcome {
    pub state: TopicObservedState,
    pub action: SyncAction,
}

/// Validate the KafkaTopic spec
pub fn validate(resource: &KafkaTopic) -> Result<()> {
    if let Some(name) = &resource.spec.topic_name {
        if name.trim().is_empty() {
            return Err(Error::validation("topicName must not be empty when set"));
        }
    }
    topic::validate(&desired_spec(resource))
}

/// Desired topic state declared by the resource
pub fn desired_spec(resource: &KafkaTopic) -> TopicSpec {
    TopicSpec {
        name: resource
            .spec
            .topic_name
            .clone()
            .unwrap_or_else(|| resource.name_any()),
        num_partitions: resource.spec.partitions,
        replication_factor: resource.spec.replication_factor,
        config_entries: resource.spec.config.clone(),
    }
}

/// Keys recorded in status plus keys declared now.
///
/// Keys dropped from the declaration stay tracked for one more read so their
/// removal is seen as drift.
pub fn tracked_keys(status: Option<&KafkaTopicStatus>, desired: &TopicSpec) -> TrackedKeys {
    let mut keys = config_diff::tracked_keys(&desired.config_entries);
    if let Some(status) = status {
        keys.extend(status.config.keys().cloned());
    }
    keys
}

/// Bring the cluster in line with `desired`.
///
/// `status` carries the identity and configuration recorded by the previous
/// sync, if any.
pub async fn sync<C: Cluster>(
    reconciler: &TopicReconciler<C>,
    desired: &TopicSpec,
    status: Option<&KafkaTopicStatus>,
    adopt_existing: bool,
) -> Result<SyncOutcome> {
    let tracked = tracked_keys(status, desired);

    match status.and_then(|s| s.topic_name.as_deref()) {
        None => {
            if adopt_existing {
                match reconciler.import(&desired.name, &tracked).await {
                    Ok(existing) => {
                        let state = converge(reconciler, existing, desired).await?;
                        return Ok(SyncOutcome {
                            state,
                            action: SyncAction::Adopted,
                        });
                    }
                    Err(Error::Absent(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            let state = create(reconciler, desired).await?;
            Ok(SyncOutcome {
                state,
                action: SyncAction::Created,
            })
        }
        Some(current) if current != desired.name => {
            info!(from = %current, to = %desired.name, "Topic name changed, replacing topic");
            delete_if_present(reconciler, current).await?;
            let state = create(reconciler, desired).await?;
            Ok(SyncOutcome {
                state,
                action: SyncAction::Replaced,
            })
        }
        Some(current) => match reconciler.read(current, &tracked).await? {
            ReadOutcome::Absent => {
                warn!(topic = %current, "Topic was deleted outside the operator, recreating");
                let state = create(reconciler, desired).await?;
                Ok(SyncOutcome {
                    state,
                    action: SyncAction::Recreated,
                })
            }
            ReadOutcome::Present(observed) => {
                let in_sync = observed.to_spec_against(desired) == *desired;
                let state = converge(reconciler, observed, desired).await?;
                Ok(SyncOutcome {
                    state,
                    action: if in_sync {
                        SyncAction::InSync
                    } else {
                        SyncAction::Updated
                    },
                })
            }
        },
    }
}

/// Create the topic and read it back.
///
/// Once CreateTopics succeeds the topic exists, so a failed read-back is
/// returned as [`Error::CreatedUnread`] carrying the name to record.
async fn create<C: Cluster>(
    reconciler: &TopicReconciler<C>,
    desired: &TopicSpec,
) -> Result<TopicObservedState> {
    reconciler.create_topic(desired).await?;
    reconciler
        .read_created(desired)
        .await
        .map_err(|e| Error::created_unread(&desired.name, e))
}

/// Update `observed` towards `desired` when they differ
async fn converge<C: Cluster>(
    reconciler: &TopicReconciler<C>,
    observed: TopicObservedState,
    desired: &TopicSpec,
) -> Result<TopicObservedState> {
    let current = observed.to_spec_against(desired);
    if current == *desired {
        return Ok(observed);
    }

    record_drift(&current, desired);
    match reconciler.update(&current, desired).await? {
        ReadOutcome::Present(state) => Ok(state),
        ReadOutcome::Absent => Err(Error::Absent(desired.name.clone())),
    }
}

fn record_drift(current: &TopicSpec, desired: &TopicSpec) {
    let config = ConfigDiff::between(&current.config_entries, &desired.config_entries);
    info!(
        topic = %desired.name,
        partitions_observed = current.num_partitions,
        partitions_declared = desired.num_partitions,
        replication_observed = current.replication_factor,
        replication_declared = desired.replication_factor,
        config_added = ?config.added,
        config_changed = ?config.changed,
        config_removed = ?config.removed,
        "Detected drift"
    );

    if current.num_partitions != desired.num_partitions {
        metrics::DRIFT_DETECTED.with_label_values(&["partitions"]).inc();
    }
    if current.replication_factor != desired.replication_factor {
        metrics::DRIFT_DETECTED
            .with_label_values(&["replicationFactor"])
            .inc();
    }
    if !config.is_empty() {
        metrics::DRIFT_DETECTED.with_label_values(&["config"]).inc();
    }
}

/// Delete the topic, treating an already missing topic as done
pub async fn delete_if_present<C: Cluster>(reconciler: &TopicReconciler<C>, name: &str) -> Result<()> {
    match reconciler.delete(name).await {
        Err(e) if e.error_code() == Some(ErrorCode::UnknownTopicOrPartition) => {
            info!(topic = %name, "Topic already absent");
            Ok(())
        }
        other => other,
    }
}

/// Remove the Kafka topic behind a resource that is being deleted
pub async fn cleanup<C: Cluster>(reconciler: &TopicReconciler<C>, resource: &KafkaTopic) -> Result<()> {
    let Some(name) = resource
        .status
        .as_ref()
        .and_then(|status| status.topic_name.as_deref())
    else {
        info!(resource = %resource.name_any(), "No topic was created, nothing to clean up");
        return Ok(());
    };

    match resource.spec.deletion_policy {
        DeletionPolicy::Retain => {
            info!(topic = %name, "Deletion policy is Retain, leaving topic in place");
            Ok(())
        }
        DeletionPolicy::Delete => delete_if_present(reconciler, name).await,
    }
}

/// Status patch for a successful sync
pub fn ready_status_patch(
    resource: &KafkaTopic,
    outcome: &SyncOutcome,
    now: DateTime<Utc>,
) -> Value {
    let prior = resource
        .status
        .as_ref()
        .map(|status| &status.config);
    let state = &outcome.state;
    let message = format!(
        "Topic {} has {} partitions, replication factor {}",
        state.name, state.partition_count, state.replication_factor
    );

    json!({
        "status": {
            "phase": "Ready",
            "message": message,
            "topicName": state.name,
            "partitions": state.partition_count,
            "replicationFactor": state.replication_factor,
            "config": config_patch(prior, &recorded_config(state)),
            "lastSyncTime": now,
            "observedGeneration": resource.metadata.generation,
            "conditions": [{
                "type": "Ready",
                "status": "True",
                "lastTransitionTime": now,
                "reason": outcome.action.reason(),
                "message": message
            }]
        }
    })
}

/// Status patch for a failed sync.
///
/// Identity and observed values are kept, except that a topic created before
/// the failure becomes the recorded identity.
pub fn failed_status_patch(resource: &KafkaTopic, error: &Error, now: DateTime<Utc>) -> Value {
    let reason = match error.cause() {
        Error::Validation(_) => "ValidationFailed",
        Error::UnsupportedChange(_) => "UnsupportedChange",
        Error::Connection(_) => "ControllerUnavailable",
        Error::TopicOperation { .. } => "TopicOperationFailed",
        Error::Protocol(_) => "ProtocolError",
        Error::Absent(_) => "TopicAbsent",
        _ => "ReconcileFailed",
    };

    let mut patch = json!({
        "status": {
            "phase": "Failed",
            "message": error.to_string(),
            "observedGeneration": resource.metadata.generation,
            "conditions": [{
                "type": "Ready",
                "status": "False",
                "lastTransitionTime": now,
                "reason": reason,
                "message": error.to_string()
            }]
        }
    });
    if let Some(topic) = error.created_topic() {
        patch["status"]["topicName"] = Value::String(topic.to_string());
    }
    patch
}

/// Configuration as recorded in status. Withheld keys are kept with an empty
/// value so they stay tracked without exposing the secret.
fn recorded_config(state: &TopicObservedState) -> BTreeMap<String, String> {
    let mut config = state.config_entries.clone();
    for key in &state.withheld_keys {
        config.insert(key.clone(), String::new());
    }
    config
}

/// Merge-patch body for the status config map.
///
/// Keys recorded before but no longer observed are nulled; a plain merge
/// patch would keep them.
fn config_patch(
    prior: Option<&BTreeMap<String, String>>,
    current: &BTreeMap<String, String>,
) -> Map<String, Value> {
    let mut patch: Map<String, Value> = current
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    for key in prior.into_iter().flat_map(|prior| prior.keys()) {
        if !current.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    patch
}

/// Update status to Ready
pub async fn update_status_ready(
    resource: &KafkaTopic,
    client: &Client,
    namespace: &str,
    outcome: &SyncOutcome,
) -> Result<()> {
    let api: Api<KafkaTopic> = Api::namespaced(client.clone(), namespace);
    let status = ready_status_patch(resource, outcome, Utc::now());

    api.patch_status(
        &resource.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(status),
    )
    .await?;

    Ok(())
}

/// Update status to Failed
pub async fn update_status_failed(
    resource: &KafkaTopic,
    client: &Client,
    namespace: &str,
    error: &Error,
) -> Result<()> {
    let api: Api<KafkaTopic> = Api::namespaced(client.clone(), namespace);
    let status = failed_status_patch(resource, error, Utc::now());

    api.patch_status(
        &resource.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(status),
    )
    .await?;

    Ok(())
}
