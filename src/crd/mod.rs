//! Custom Resource Definitions for the Kafka Topic Operator

mod kafka_topic;

pub use kafka_topic::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![serde_yaml::to_string(&KafkaTopic::crd())?])
}
