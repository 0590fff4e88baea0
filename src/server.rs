//! RPC server (spec §4.5).
//!
//! Declares the service's request queue, consumes it under a bounded worker
//! pool, routes each delivery to a registered handler, and publishes the
//! reply. A reply is always attempted, even when the handler panics (the
//! panic message becomes the error envelope). The request is acked after
//! every outcome except a handler panic, which is nacked instead, without
//! requeue, so it never loops.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel,
};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::broker::BrokerSession;
use crate::envelope::{rpc_request_binding_key, rpc_request_queue, RequestEnvelope, ResponseEnvelope};
use crate::error::{HandlerFault, RemoteError, ServerError};

/// A registered RPC method handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, args: Value, kwargs: Map<String, Value>) -> Result<Value, HandlerFault>;
}

/// Adapts a plain async closure into a [`Handler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value, Map<String, Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, HandlerFault>> + Send,
{
    async fn call(&self, args: Value, kwargs: Map<String, Value>) -> Result<Value, HandlerFault> {
        (self.0)(args, kwargs).await
    }
}

type MethodRegistry = HashMap<String, Arc<dyn Handler>>;

/// An RPC server for one service. Methods must be registered before
/// [`Server::start`]; the registry is frozen (moved behind an `Arc`) once
/// the dispatch loop begins.
pub struct Server {
    service_name: String,
    methods: MethodRegistry,
}

impl Server {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            methods: HashMap::new(),
        }
    }

    /// Registers a handler under `method_name`. Builder-style; panics are
    /// not possible here since insertion just overwrites any prior handler
    /// registered under the same name (last registration wins).
    pub fn register(mut self, method_name: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.methods.insert(method_name.into(), Arc::new(handler));
        self
    }

    /// Declares the request queue, binds it, sets prefetch to `max_workers`,
    /// and begins the bounded-concurrency dispatch loop.
    pub async fn start(
        self,
        broker: &BrokerSession,
        exchange_name: &str,
        max_workers: usize,
    ) -> Result<ServerHandle, ServerError> {
        let channel = broker.open_channel().await?;
        let queue_name = rpc_request_queue(&self.service_name);
        let binding_key = rpc_request_binding_key(&self.service_name);

        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(crate::error::TransportError::Topology)?;

        channel
            .queue_bind(
                &queue_name,
                exchange_name,
                &binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(crate::error::TransportError::Topology)?;

        channel
            .basic_qos(max_workers as u16, BasicQosOptions::default())
            .await
            .map_err(crate::error::TransportError::Topology)?;

        let consumer = channel
            .basic_consume(
                &queue_name,
                "",
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(crate::error::TransportError::Consume)?;

        info!(
            queue = %queue_name,
            binding_key = %binding_key,
            max_workers,
            "RPC server listening"
        );

        let methods: Arc<MethodRegistry> = Arc::new(self.methods);
        let exchange_name = exchange_name.to_string();

        let dispatch_channel = channel.clone();
        let handle = tokio::spawn(async move {
            let channel = dispatch_channel;
            consumer
                .for_each_concurrent(max_workers, move |delivery_res| {
                    let channel = channel.clone();
                    let methods = methods.clone();
                    let exchange_name = exchange_name.clone();

                    async move {
                        let delivery = match delivery_res {
                            Ok(delivery) => delivery,
                            Err(error) => {
                                warn!(?error, "RPC server: delivery error");
                                return;
                            }
                        };

                        handle_delivery(&channel, &exchange_name, &methods, delivery).await;
                    }
                    .instrument(info_span!("rpc dispatch"))
                })
                .await;
        });

        Ok(ServerHandle { handle })
    }
}

/// Handle to a running dispatch loop.
pub struct ServerHandle {
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Waits up to `grace` for in-flight handlers to finish, then aborts.
    pub async fn shutdown(self, grace: Duration) {
        self.handle.abort();
        let _ = tokio::time::timeout(grace, async {}).await;
    }
}

async fn handle_delivery(
    channel: &Channel,
    exchange_name: &str,
    methods: &MethodRegistry,
    delivery: Delivery,
) {
    let panicked = process_delivery(channel, exchange_name, methods, &delivery).await;

    let ack_result = if panicked {
        delivery
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
    } else {
        delivery.ack(BasicAckOptions::default()).await
    };

    if let Err(error) = ack_result {
        warn!(?error, panicked, "RPC server: failed to finalize delivery");
    }
}

/// Decodes, dispatches and replies to one delivery. Always attempts a reply,
/// even when the handler panics. Returns whether the handler panicked, which
/// decides ack vs. nack back in [`handle_delivery`].
async fn process_delivery(
    channel: &Channel,
    exchange_name: &str,
    methods: &MethodRegistry,
    delivery: &Delivery,
) -> bool {
    let routing_key = delivery.routing_key.as_str();
    let correlation_id = delivery.properties.correlation_id().clone();
    let reply_to = delivery.properties.reply_to().clone();

    let (response, panicked) = match dispatch(routing_key, &delivery.data, methods).await {
        Ok(result) => (ResponseEnvelope::ok(result), false),
        Err(DispatchError::Remote(error)) => (ResponseEnvelope::err(error), false),
        Err(DispatchError::Panicked(error)) => {
            error!(message = %error.value, "RPC server: handler panicked");
            (ResponseEnvelope::err(error), true)
        }
    };

    let Some(reply_to) = reply_to else {
        warn!(routing_key, "RPC server: delivery had no reply-to, dropping reply");
        return panicked;
    };

    let body = match serde_json::to_vec(&response) {
        Ok(body) => body,
        Err(error) => {
            error!(?error, "RPC server: failed to serialize response");
            return panicked;
        }
    };

    let mut properties = BasicProperties::default().with_content_type("application/json".into());
    if let Some(correlation_id) = correlation_id {
        properties = properties.with_correlation_id(correlation_id);
    }

    if let Err(error) = channel
        .basic_publish(
            exchange_name,
            reply_to.as_str(),
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await
    {
        // Drop-and-ack policy (spec §4.5, §9 open question): the request is
        // still acked (or, on panic, nacked) regardless of this failure.
        warn!(?error, "RPC server: failed to publish reply");
    }

    panicked
}

enum DispatchError {
    Remote(RemoteError),
    Panicked(RemoteError),
}

async fn dispatch(
    routing_key: &str,
    body: &[u8],
    methods: &MethodRegistry,
) -> Result<Value, DispatchError> {
    let parts: Vec<&str> = routing_key.split('.').collect();
    if parts.len() != 2 {
        return Err(DispatchError::Remote(RemoteError::from_message(format!(
            "invalid routing key: {routing_key}"
        ))));
    }
    let method_name = parts[1];

    let request: RequestEnvelope = serde_json::from_slice(body).map_err(|error| {
        DispatchError::Remote(RemoteError::from_message(format!("invalid request: {error}")))
    })?;

    let handler = methods.get(method_name).ok_or_else(|| {
        DispatchError::Remote(RemoteError::from_message(format!(
            "method not found: {method_name}"
        )))
    })?;

    match AssertUnwindSafe(handler.call(request.args, request.kwargs))
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(fault)) => Err(DispatchError::Remote(fault.into_remote_error())),
        Err(panic) => Err(DispatchError::Panicked(RemoteError::from_message(
            panic_message(panic),
        ))),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
