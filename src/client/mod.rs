//! RPC client (spec §4.4).
//!
//! A [`Client`] is bound to one `target_service`. It shares a reply
//! [`ReplyMultiplexer`] (one per process) and holds its own publish channel.

pub mod multiplexer;

use std::sync::Arc;
use std::time::Duration;

use lapin::{options::BasicPublishOptions, BasicProperties, Channel};
use serde_json::{Map, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

pub use multiplexer::ReplyMultiplexer;

use crate::envelope::{rpc_request_routing_key, RequestEnvelope, ResponseEnvelope};
use crate::error::{ClientError, ProtocolError, TransportError};

/// A synchronous-feeling façade for calling methods on one target service.
pub struct Client {
    target_service: String,
    channel: Channel,
    exchange_name: String,
    multiplexer: Arc<ReplyMultiplexer>,
}

impl Client {
    pub fn new(
        target_service: impl Into<String>,
        channel: Channel,
        exchange_name: impl Into<String>,
        multiplexer: Arc<ReplyMultiplexer>,
    ) -> Self {
        Self {
            target_service: target_service.into(),
            channel,
            exchange_name: exchange_name.into(),
            multiplexer,
        }
    }

    /// Calls `method` with no deadline and no cancellation.
    pub async fn call(
        &self,
        method: &str,
        args: Value,
        kwargs: Option<Map<String, Value>>,
    ) -> Result<Value, ClientError> {
        self.call_with_options(method, args, kwargs, None, None)
            .await
    }

    /// Calls `method`, failing with [`ClientError::Timeout`] if no reply
    /// arrives within `deadline`.
    pub async fn call_with_deadline(
        &self,
        method: &str,
        args: Value,
        kwargs: Option<Map<String, Value>>,
        deadline: Duration,
    ) -> Result<Value, ClientError> {
        self.call_with_options(method, args, kwargs, Some(deadline), None)
            .await
    }

    /// Calls `method`, failing with [`ClientError::Canceled`] if `token` is
    /// canceled before a reply arrives.
    pub async fn call_with_cancellation(
        &self,
        method: &str,
        args: Value,
        kwargs: Option<Map<String, Value>>,
        token: CancellationToken,
    ) -> Result<Value, ClientError> {
        self.call_with_options(method, args, kwargs, None, Some(token))
            .await
    }

    #[instrument(name = "rpc call", skip(self, args, kwargs, cancellation), fields(target = %self.target_service, method))]
    pub async fn call_with_options(
        &self,
        method: &str,
        args: Value,
        kwargs: Option<Map<String, Value>>,
        deadline: Option<Duration>,
        cancellation: Option<CancellationToken>,
    ) -> Result<Value, ClientError> {
        let correlation_id = Uuid::new_v4().to_string();
        let receiver = self.multiplexer.register(correlation_id.clone());

        let body = serde_json::to_vec(&RequestEnvelope::new(args, kwargs))
            .map_err(ProtocolError::InvalidRequest)?;

        let routing_key = rpc_request_routing_key(&self.target_service, method);

        let publish_result = self
            .channel
            .basic_publish(
                &self.exchange_name,
                &routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_correlation_id(correlation_id.clone().into())
                    .with_reply_to(self.multiplexer.reply_queue_id().into()),
            )
            .await;

        if let Err(error) = publish_result {
            self.multiplexer.unregister(&correlation_id);
            return Err(TransportError::Publish(error).into());
        }

        let outcome = wait_for_reply(receiver, deadline, cancellation).await;
        if outcome.is_err() {
            self.multiplexer.unregister(&correlation_id);
        }

        let body = outcome?;
        let response: ResponseEnvelope =
            serde_json::from_slice(&body).map_err(ProtocolError::InvalidResponse)?;

        Ok(response.into_result()?)
    }
}

async fn wait_for_reply(
    receiver: tokio::sync::oneshot::Receiver<Vec<u8>>,
    deadline: Option<Duration>,
    cancellation: Option<CancellationToken>,
) -> Result<Vec<u8>, ClientError> {
    match (deadline, cancellation) {
        (None, None) => receiver.await.map_err(|_| ClientError::Canceled),
        (Some(deadline), None) => match timeout(deadline, receiver).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(ClientError::Canceled),
            Err(_) => Err(ClientError::Timeout),
        },
        (None, Some(token)) => tokio::select! {
            result = receiver => result.map_err(|_| ClientError::Canceled),
            _ = token.cancelled() => Err(ClientError::Canceled),
        },
        (Some(deadline), Some(token)) => tokio::select! {
            result = timeout(deadline, receiver) => match result {
                Ok(Ok(body)) => Ok(body),
                Ok(Err(_)) => Err(ClientError::Canceled),
                Err(_) => Err(ClientError::Timeout),
            },
            _ = token.cancelled() => Err(ClientError::Canceled),
        },
    }
}
