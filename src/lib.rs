//! Kafka Topic Kubernetes Operator
//!
//! This operator reconciles KafkaTopic custom resources against a live Kafka
//! cluster, issuing topic administration requests through the cluster's
//! controller broker.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
