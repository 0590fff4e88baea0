//! Broker session (spec §4.2).
//!
//! Owns the AMQP connection and hands out channels on demand — one per
//! logical role (client-publish, client-reply-consume, server-consume,
//! event-consume), since a `lapin::Channel` is not meant to be shared
//! across concurrent publishers/consumers.

use std::sync::Arc;
use std::time::Duration;

use lapin::{Channel, Connection, ConnectionProperties};
use tokio::time::timeout;

use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Owns a broker connection. Cheap to clone: internally an `Arc<Connection>`.
#[derive(Clone)]
pub struct BrokerSession {
    connection: Arc<Connection>,
}

impl BrokerSession {
    /// Connects to `amqp_url`, using the tokio executor/reactor so lapin
    /// drives I/O on the same runtime as the rest of the process.
    pub async fn connect(amqp_url: &str) -> Result<Self, TransportError> {
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let connection = timeout(CONNECT_TIMEOUT, Connection::connect(amqp_url, properties))
            .await
            .map_err(|_| TransportError::ConnectTimeout)?
            .map_err(TransportError::Connect)?;

        Ok(Self {
            connection: Arc::new(connection),
        })
    }

    /// Opens a fresh channel. Each logical role (publish, consume, RPC
    /// reply) should take its own channel.
    pub async fn open_channel(&self) -> Result<Channel, TransportError> {
        self.connection
            .create_channel()
            .await
            .map_err(TransportError::Channel)
    }

    /// Closes the underlying connection, terminating any consumers riding
    /// on its channels.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.connection
            .close(0, "shutdown")
            .await
            .map_err(TransportError::Channel)
    }
}
