mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nameko_rs::{BrokerSession, EventCallback, EventConfig, EventHandler, HandlerKind};
use tokio::sync::mpsc;

use common::{amqp_url, init_test, unique_service_name};

struct ForwardToChannel(mpsc::UnboundedSender<Vec<u8>>);

#[async_trait]
impl EventCallback for ForwardToChannel {
    async fn on_event(&self, body: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let _ = self.0.send(body.to_vec());
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_e_broadcast_and_service_pool_both_receive() {
    init_test();
    let broker = BrokerSession::connect(&amqp_url()).await.unwrap();
    let source_service = unique_service_name("auth");
    let event_type = "EVENT_X";

    let (pool_tx, mut pool_rx) = mpsc::unbounded_channel();
    let (broadcast_tx, mut broadcast_rx) = mpsc::unbounded_channel();

    // Two replicas of the same SERVICE_POOL handler, sharing a queue: only
    // one of them should see any given delivery. A single shared sender
    // lets either replica prove the event was delivered exactly once.
    for _ in 0..2 {
        let cfg = EventConfig {
            source_service: source_service.clone(),
            event_type: event_type.to_string(),
            kind: HandlerKind::ServicePool,
            reliable_delivery: true,
            requeue_on_error: false,
            broadcast_id: None,
            handler_identity: "on_event".to_string(),
            consumer_service: "gw".to_string(),
        };
        EventHandler::new(cfg)
            .start(&broker, Arc::new(ForwardToChannel(pool_tx.clone())))
            .await
            .unwrap();
    }

    let broadcast_cfg = EventConfig {
        source_service: source_service.clone(),
        event_type: event_type.to_string(),
        kind: HandlerKind::Broadcast,
        reliable_delivery: false,
        requeue_on_error: false,
        broadcast_id: None,
        handler_identity: "on_event".to_string(),
        consumer_service: "audit".to_string(),
    };
    EventHandler::new(broadcast_cfg)
        .start(&broker, Arc::new(ForwardToChannel(broadcast_tx)))
        .await
        .unwrap();

    // Let both consumers finish declaring/binding before publishing.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let dispatch_channel = broker.open_channel().await.unwrap();
    nameko_rs::events::dispatch(&dispatch_channel, &source_service, event_type, b"\"hello\"")
        .await
        .unwrap();

    let pool_body = tokio::time::timeout(Duration::from_secs(5), pool_rx.recv())
        .await
        .expect("service pool handler should receive the event")
        .unwrap();
    assert_eq!(pool_body, b"\"hello\"");

    let broadcast_body = tokio::time::timeout(Duration::from_secs(5), broadcast_rx.recv())
        .await
        .expect("broadcast handler should receive the event")
        .unwrap();
    assert_eq!(broadcast_body, b"\"hello\"");

    // No second pool delivery: the shared queue hands the message to
    // exactly one replica.
    let second = tokio::time::timeout(Duration::from_millis(500), pool_rx.recv()).await;
    assert!(second.is_err(), "service pool should not double-deliver");
}

struct FailOnce {
    attempts: AtomicUsize,
    done_tx: mpsc::UnboundedSender<usize>,
}

#[async_trait]
impl EventCallback for FailOnce {
    async fn on_event(&self, _body: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == 1 {
            return Err("simulated handler failure".into());
        }
        let _ = self.done_tx.send(attempt);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_f_requeue_on_error_redelivers_until_success() {
    init_test();
    let broker = BrokerSession::connect(&amqp_url()).await.unwrap();
    let source_service = unique_service_name("auth");
    let event_type = "EVENT_Y";

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let callback = Arc::new(FailOnce {
        attempts: AtomicUsize::new(0),
        done_tx,
    });

    let cfg = EventConfig {
        source_service: source_service.clone(),
        event_type: event_type.to_string(),
        kind: HandlerKind::ServicePool,
        reliable_delivery: true,
        requeue_on_error: true,
        broadcast_id: None,
        handler_identity: "on_event_retry".to_string(),
        consumer_service: "gw".to_string(),
    };
    EventHandler::new(cfg)
        .start(&broker, callback)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let dispatch_channel = broker.open_channel().await.unwrap();
    nameko_rs::events::dispatch(&dispatch_channel, &source_service, event_type, b"\"retry\"")
        .await
        .unwrap();

    let attempt = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
        .await
        .expect("handler should eventually succeed after redelivery")
        .unwrap();
    assert_eq!(attempt, 2);
}
