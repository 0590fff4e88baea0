//! Error taxonomy for the runtime (spec §7).
//!
//! Every variant keeps the originating error as its `source()` so
//! [`crate::helper::error_chain_fmt`] can print the full chain.

use crate::helper::error_chain_fmt;

/// Missing or invalid configuration. Fatal at startup.
#[derive(thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found (set CONFIG_PATH or place config.yaml in a parent directory)")]
    NotFound,
    #[error("failed to read or parse configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("missing required configuration field: {0}")]
    MissingField(String),
}

impl std::fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Connect/publish/consume failure from the broker.
#[derive(thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),
    #[error("timed out connecting to broker")]
    ConnectTimeout,
    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),
    #[error("failed to declare or bind topology: {0}")]
    Topology(#[source] lapin::Error),
    #[error("failed to publish message: {0}")]
    Publish(#[source] lapin::Error),
    #[error("failed to register consumer: {0}")]
    Consume(#[source] lapin::Error),
    #[error("failed to ack/nack delivery: {0}")]
    Ack(#[source] lapin::Error),
}

impl std::fmt::Debug for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Malformed envelope on the client side: the request couldn't be
/// serialized, or the reply body couldn't be parsed back. A malformed
/// routing key or unknown method reaching the *server* is instead reported
/// to the caller as a [`RemoteError`], since the server always replies
/// rather than failing locally.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[source] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(#[source] serde_json::Error),
}

/// A well-formed error response from a remote handler.
///
/// Carries the five Nameko fields verbatim so that a caller can report
/// exactly what the remote side reported, cross-language.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RemoteError {
    pub exc_type: String,
    pub exc_path: String,
    pub exc_args: Vec<serde_json::Value>,
    pub exc_kwargs: serde_json::Map<String, serde_json::Value>,
    pub value: String,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote error: {}", self.value)
    }
}

impl std::error::Error for RemoteError {}

impl RemoteError {
    /// Builds the envelope the server sends back for a plain handler-side
    /// failure: `exc_type`/`exc_path` empty, `exc_args` holding the message,
    /// matching `namego/pkg/rpc/server.go`'s `sendResponse` verbatim.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            exc_type: String::new(),
            exc_path: String::new(),
            exc_args: vec![serde_json::Value::String(message.clone())],
            exc_kwargs: serde_json::Map::new(),
            value: message,
        }
    }
}

/// Server-side exception captured while running a handler; turned into a
/// [`RemoteError`] before it crosses the wire.
#[derive(thiserror::Error, Debug)]
pub enum HandlerFault {
    #[error("{0}")]
    Failed(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerFault {
    pub fn into_remote_error(self) -> RemoteError {
        match self {
            HandlerFault::Failed(message) => RemoteError::from_message(message),
            HandlerFault::Panicked(message) => RemoteError::from_message(message),
        }
    }
}

/// Everything a `Client::call` can fail with.
#[derive(thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("call timed out")]
    Timeout,
    #[error("call canceled")]
    Canceled,
}

impl std::fmt::Debug for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Everything `Server::start` or a queue-topology registration can fail with.
#[derive(thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl std::fmt::Debug for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
