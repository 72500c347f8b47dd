//! Error types for the Kafka Topic Operator

use thiserror::Error;

use crate::kafka::ErrorCode;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Controller lookup or connect failure
    #[error("Controller connection error: {0}")]
    Connection(String),

    /// Caller-side constraint violation, detected before any request is sent
    #[error("Validation error: {0}")]
    Validation(String),

    /// Change the cluster cannot apply in place
    #[error("Unsupported change: {0}")]
    UnsupportedChange(String),

    /// The cluster rejected the request for the named topic
    #[error("Topic operation on '{topic}' failed: {code}{}", detail(.message))]
    TopicOperation {
        topic: String,
        code: ErrorCode,
        message: Option<String>,
    },

    /// Response shape does not match the request
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Topic does not exist on the cluster
    #[error("Topic not found: {0}")]
    Absent(String),

    /// The cluster accepted the topic but reading it back failed
    #[error("Topic '{topic}' was created but reading it back failed: {source}")]
    CreatedUnread {
        topic: String,
        #[source]
        source: Box<Error>,
    },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Finalizer error
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

fn detail(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

impl Error {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create an unsupported change error
    pub fn unsupported_change(msg: impl Into<String>) -> Self {
        Error::UnsupportedChange(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a per-topic cluster error
    pub fn topic_operation(
        topic: impl Into<String>,
        code: ErrorCode,
        message: Option<String>,
    ) -> Self {
        Error::TopicOperation {
            topic: topic.into(),
            code,
            message,
        }
    }

    /// Wrap a read-back failure for a topic the cluster already created
    pub fn created_unread(topic: impl Into<String>, source: Error) -> Self {
        Error::CreatedUnread {
            topic: topic.into(),
            source: Box::new(source),
        }
    }

    /// The underlying failure, looking through [`Error::CreatedUnread`]
    pub fn cause(&self) -> &Error {
        match self {
            Error::CreatedUnread { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Name of a topic that exists on the cluster despite this failure
    pub fn created_topic(&self) -> Option<&str> {
        match self {
            Error::CreatedUnread { topic, .. } => Some(topic),
            _ => None,
        }
    }

    /// True for caller-side failures that no retry will fix.
    ///
    /// An unsupported change is a validation failure too; it stays a separate
    /// variant because it reports a permanent cluster limitation.
    pub fn is_validation(&self) -> bool {
        matches!(self.cause(), Error::Validation(_) | Error::UnsupportedChange(_))
    }

    /// The cluster error code carried by this error, if any
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.cause() {
            Error::TopicOperation { code, .. } => Some(*code),
            _ => None,
        }
    }
}
