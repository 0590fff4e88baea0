//! Reply multiplexer (spec §4.3).
//!
//! One instance per client process, regardless of how many target services
//! it addresses. Owns exactly one reply queue, demultiplexing inbound
//! replies by `correlation_id` to the waiter that issued each call.

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    Channel,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::envelope::{rpc_reply_queue, RPC_REPLY_QUEUE_TTL_MS};
use crate::error::TransportError;

type PendingMap = Arc<DashMap<String, oneshot::Sender<Vec<u8>>>>;

/// Demultiplexes replies on one client's reply queue by correlation id.
pub struct ReplyMultiplexer {
    reply_queue_id: String,
    pending: PendingMap,
    consumer_handle: JoinHandle<()>,
}

impl ReplyMultiplexer {
    /// Declares the reply queue, binds it to `exchange_name` with routing
    /// key equal to the generated reply id, and starts the long-lived
    /// consumer loop. Performed once per client process.
    pub async fn new(
        channel: Channel,
        service_name: &str,
        exchange_name: &str,
    ) -> Result<Self, TransportError> {
        let reply_queue_id = Uuid::new_v4().to_string();
        let reply_queue_name = rpc_reply_queue(service_name, &reply_queue_id);

        let mut queue_args = FieldTable::default();
        queue_args.insert(
            "x-expires".into(),
            AMQPValue::LongInt(RPC_REPLY_QUEUE_TTL_MS as i32),
        );

        channel
            .queue_declare(
                &reply_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                queue_args,
            )
            .await
            .map_err(TransportError::Topology)?;

        channel
            .queue_bind(
                &reply_queue_name,
                exchange_name,
                &reply_queue_id,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(TransportError::Topology)?;

        let consumer = channel
            .basic_consume(
                &reply_queue_name,
                "",
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(TransportError::Consume)?;

        let pending: PendingMap = Arc::new(DashMap::new());
        let consumer_handle = tokio::spawn(consume_loop(consumer, pending.clone()));

        Ok(Self {
            reply_queue_id,
            pending,
            consumer_handle,
        })
    }

    /// The id used as this client's reply routing key, needed by callers to
    /// set `reply_to` on outgoing requests.
    pub fn reply_queue_id(&self) -> &str {
        &self.reply_queue_id
    }

    /// Registers a waiter slot for `correlation_id`. At most one `PendingCall`
    /// exists per correlation id at any time in this process.
    pub fn register(&self, correlation_id: String) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);
        rx
    }

    /// Removes a waiter's registration. Safe to call after the slot has
    /// already fired or been removed by the consumer loop.
    pub fn unregister(&self, correlation_id: &str) {
        self.pending.remove(correlation_id);
    }
}

impl Drop for ReplyMultiplexer {
    fn drop(&mut self) {
        self.consumer_handle.abort();
    }
}

async fn consume_loop(mut consumer: lapin::Consumer, pending: PendingMap) {
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(error) => {
                warn!(?error, "reply consumer: delivery error");
                continue;
            }
        };

        let correlation_id = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.to_string());

        let matched = match correlation_id.as_deref() {
            Some(id) => pending.remove(id),
            None => None,
        };

        match matched {
            // Single writer (this loop) into a capacity-1 slot: never blocks.
            Some((_, waiter)) => {
                let _ = waiter.send(delivery.data.clone());
                if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(?error, "reply consumer: failed to ack delivery");
                }
            }
            None => {
                debug!(
                    correlation_id = ?correlation_id,
                    "reply consumer: no matching waiter, discarding"
                );
                if let Err(error) = delivery
                    .nack(BasicNackOptions {
                        multiple: false,
                        requeue: false,
                    })
                    .await
                {
                    warn!(?error, "reply consumer: failed to nack delivery");
                }
            }
        }
    }
}
