//! Kubernetes controllers for the KafkaTopic CRD
//!
//! This module contains the controller implementation that watches for CRD
//! changes and triggers reconciliation.

mod topic_controller;

pub use topic_controller::run as run_topic_controller;

use kube::Client;

use crate::config::OperatorConfig;
use crate::kafka::KafkaCluster;
use crate::reconcilers::TopicReconciler;

/// Shared context for the controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Topic reconciler bound to the managed Kafka cluster
    pub reconciler: TopicReconciler<KafkaCluster>,
    /// Operator settings
    pub config: OperatorConfig,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        reconciler: TopicReconciler<KafkaCluster>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            client,
            reconciler,
            config,
        }
    }
}
