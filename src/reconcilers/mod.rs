//! Reconcilers for Kafka topics
//!
//! This module contains the business logic for bringing a cluster in line
//! with a declared topic:
//! - Topic lifecycle operations against the controller broker
//! - Configuration diffing between declared and observed entries
//! - KafkaTopic resource handling and status updates

pub mod config_diff;
pub mod kafka_topic;
pub mod topic;

pub use config_diff::{ConfigDiff, ConfigEntries, TrackedKeys};
pub use topic::{ReadOutcome, TopicObservedState, TopicReconciler, TopicSpec};
