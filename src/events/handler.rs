//! Event handler queue topology and dispatch (spec §4.7).
//!
//! Three delivery disciplines share one consumer shape; only the queue
//! name, its exclusivity and its auto-delete flag differ. `queue_topology`
//! is pure so the naming rules can be checked without a broker.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    ExchangeKind,
};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::broker::BrokerSession;
use crate::envelope::event_exchange;
use crate::error::TransportError;

/// The three delivery disciplines a consumer can bind under, matching
/// `namego/pkg/rpc/events.HandlerType` one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    ServicePool,
    Singleton,
    Broadcast,
}

/// Everything needed to derive queue topology and bind a consumer.
#[derive(Debug, Clone)]
pub struct EventConfig {
    pub source_service: String,
    pub event_type: String,
    pub kind: HandlerKind,
    /// When false, the queue is `auto_delete` (and, for `Broadcast`,
    /// also `exclusive`) so nothing survives this consumer going away.
    pub reliable_delivery: bool,
    /// Passed straight to `nack`'s `requeue` flag on handler failure.
    pub requeue_on_error: bool,
    /// Used only by `Broadcast`; generated if left `None`.
    pub broadcast_id: Option<String>,
    /// Distinguishes handlers bound to the same event within one
    /// consumer service (`ServicePool`/`Broadcast` queue names).
    pub handler_identity: String,
    pub consumer_service: String,
}

/// Derives `(queue_name, exclusive, auto_delete)` for `cfg`. Templates are
/// taken verbatim from `namego/pkg/rpc/configs.go`.
pub fn queue_topology(cfg: &EventConfig) -> (String, bool, bool) {
    let auto_delete = !cfg.reliable_delivery;

    match cfg.kind {
        HandlerKind::ServicePool => {
            let queue_name = format!(
                "evt-{}-{}--{}.{}",
                cfg.source_service, cfg.event_type, cfg.consumer_service, cfg.handler_identity
            );
            (queue_name, false, auto_delete)
        }
        HandlerKind::Singleton => {
            let queue_name = format!("evt-{}-{}", cfg.source_service, cfg.event_type);
            (queue_name, false, auto_delete)
        }
        HandlerKind::Broadcast => {
            let broadcast_id = cfg
                .broadcast_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let queue_name = format!(
                "evt-{}-{}--{}.{}-{}",
                cfg.source_service,
                cfg.event_type,
                cfg.consumer_service,
                cfg.handler_identity,
                broadcast_id
            );
            (queue_name, !cfg.reliable_delivery, auto_delete)
        }
    }
}

/// Invoked once per delivery on the handler's queue.
#[async_trait]
pub trait EventCallback: Send + Sync {
    async fn on_event(&self, body: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Adapts a plain async closure into an [`EventCallback`].
pub struct FnEventCallback<F>(pub F);

#[async_trait]
impl<F, Fut> EventCallback for FnEventCallback<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send,
{
    async fn on_event(&self, body: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (self.0)(body.to_vec()).await
    }
}

/// A subscription to one event, bound under one of the three disciplines.
pub struct EventHandler {
    config: EventConfig,
    queue_name: String,
    exclusive: bool,
    auto_delete: bool,
}

impl EventHandler {
    pub fn new(config: EventConfig) -> Self {
        let (queue_name, exclusive, auto_delete) = queue_topology(&config);
        Self {
            config,
            queue_name,
            exclusive,
            auto_delete,
        }
    }

    /// Declares the source exchange, declares and binds this handler's
    /// queue, and starts consuming, dispatching each delivery to
    /// `callback`. Acks on success; `nack`s with `requeue=requeue_on_error`
    /// on a callback error.
    pub async fn start(
        self,
        broker: &BrokerSession,
        callback: std::sync::Arc<dyn EventCallback>,
    ) -> Result<JoinHandle<()>, TransportError> {
        let channel = broker.open_channel().await?;
        let exchange_name = event_exchange(&self.config.source_service);

        channel
            .exchange_declare(
                &exchange_name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(TransportError::Topology)?;

        channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: self.exclusive,
                    auto_delete: self.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(TransportError::Topology)?;

        channel
            .queue_bind(
                &self.queue_name,
                &exchange_name,
                &self.config.event_type,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(TransportError::Topology)?;

        let consumer = channel
            .basic_consume(
                &self.queue_name,
                "",
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(TransportError::Consume)?;

        let requeue_on_error = self.config.requeue_on_error;
        let queue_name = self.queue_name.clone();

        let handle = tokio::spawn(async move {
            let mut consumer = consumer;
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(error) => {
                        warn!(?error, queue = %queue_name, "event consumer: delivery error");
                        continue;
                    }
                };

                match callback.on_event(&delivery.data).await {
                    Ok(()) => {
                        if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
                            warn!(?error, "event consumer: failed to ack delivery");
                        }
                    }
                    Err(error) => {
                        error!(?error, queue = %queue_name, "event handler callback failed");
                        if let Err(error) = delivery
                            .nack(BasicNackOptions {
                                multiple: false,
                                requeue: requeue_on_error,
                            })
                            .await
                        {
                            warn!(?error, "event consumer: failed to nack delivery");
                        }
                    }
                }
            }
        });

        Ok(handle)
    }
}
