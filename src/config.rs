//! Operator configuration from the environment

use std::time::Duration;

use crate::error::{Error, Result};
use crate::kafka::{ClientConfig, SaslPlain};

/// Default client id sent to brokers
pub const DEFAULT_CLIENT_ID: &str = "kafka-topic-operator";

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Operator settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Bootstrap brokers (`KAFKA_HOSTS`, comma separated)
    pub bootstrap_servers: Vec<String>,
    /// Client id for broker requests (`KAFKA_CLIENT_ID`)
    pub client_id: String,
    /// Connect and round-trip bound (`KAFKA_REQUEST_TIMEOUT_SECS`)
    pub request_timeout: Duration,
    /// Server-side timeout for topic operations (`KAFKA_OPERATION_TIMEOUT_SECS`)
    pub operation_timeout: Duration,
    /// Port for `/metrics` and health endpoints (`METRICS_PORT`)
    pub metrics_port: u16,
    /// How often in-sync topics are re-read for drift (`RESYNC_INTERVAL_SECS`)
    pub resync_interval: Duration,
    /// Connect to brokers over TLS (`KAFKA_TLS_ENABLE`)
    pub tls_enable: bool,
    /// SASL/PLAIN credentials (`KAFKA_SASL_ENABLE`, `KAFKA_SASL_USERNAME`,
    /// `KAFKA_SASL_PASSWORD`)
    pub sasl: Option<SaslPlain>,
}

impl OperatorConfig {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bootstrap_servers = parse_hosts(&lookup("KAFKA_HOSTS").unwrap_or_default());
        if bootstrap_servers.is_empty() {
            return Err(Error::config(
                "KAFKA_HOSTS must list at least one bootstrap server",
            ));
        }

        let client_id = lookup("KAFKA_CLIENT_ID")
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let sasl = if flag(&lookup, "KAFKA_SASL_ENABLE")? {
            Some(SaslPlain {
                username: required(&lookup, "KAFKA_SASL_USERNAME", "KAFKA_SASL_ENABLE")?,
                password: required(&lookup, "KAFKA_SASL_PASSWORD", "KAFKA_SASL_ENABLE")?,
            })
        } else {
            None
        };

        Ok(Self {
            bootstrap_servers,
            client_id,
            request_timeout: secs(&lookup, "KAFKA_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            operation_timeout: secs(
                &lookup,
                "KAFKA_OPERATION_TIMEOUT_SECS",
                DEFAULT_OPERATION_TIMEOUT_SECS,
            )?,
            metrics_port: parse(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT)?,
            resync_interval: secs(&lookup, "RESYNC_INTERVAL_SECS", DEFAULT_RESYNC_INTERVAL_SECS)?,
            tls_enable: flag(&lookup, "KAFKA_TLS_ENABLE")?,
            sasl,
        })
    }

    /// Settings for the Kafka cluster client
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            bootstrap_servers: self.bootstrap_servers.clone(),
            client_id: self.client_id.clone(),
            request_timeout: self.request_timeout,
            tls: self.tls_enable,
            sasl: self.sasl.clone(),
        }
    }
}

fn parse_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid {key} '{raw}': {e}"))),
    }
}

/// Boolean switch, off when unset
fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::config(format!(
                "Invalid {key} '{raw}': expected true or false"
            ))),
        },
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    because: &str,
) -> Result<String> {
    lookup(key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::config(format!("{key} is required when {because} is set")))
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    let value: u64 = parse(lookup, key, default)?;
    if value == 0 {
        return Err(Error::config(format!("{key} must be greater than 0")));
    }
    Ok(Duration::from_secs(value))
}
