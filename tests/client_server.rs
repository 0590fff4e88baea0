mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nameko_rs::envelope::RPC_EXCHANGE_DEFAULT;
use nameko_rs::error::HandlerFault;
use nameko_rs::{BrokerSession, Client, ClientError, Handler, Server};
use serde_json::{Map, Value};

use common::{amqp_url, init_test, unique_service_name};

struct Multiply;

#[async_trait]
impl Handler for Multiply {
    async fn call(&self, args: Value, _kwargs: Map<String, Value>) -> Result<Value, HandlerFault> {
        let numbers: Vec<f64> =
            serde_json::from_value(args).map_err(|e| HandlerFault::Failed(e.to_string()))?;
        Ok(Value::from(numbers.iter().product::<f64>()))
    }
}

struct SlowEcho;

#[async_trait]
impl Handler for SlowEcho {
    async fn call(&self, args: Value, _kwargs: Map<String, Value>) -> Result<Value, HandlerFault> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(args)
    }
}

async fn connected_client(
    broker: &BrokerSession,
    target_service: &str,
) -> Client {
    let multiplexer_channel = broker.open_channel().await.unwrap();
    let multiplexer = nameko_rs::client::multiplexer::ReplyMultiplexer::new(
        multiplexer_channel,
        target_service,
        RPC_EXCHANGE_DEFAULT,
    )
    .await
    .unwrap();

    let publish_channel = broker.open_channel().await.unwrap();
    Client::new(
        target_service.to_string(),
        publish_channel,
        RPC_EXCHANGE_DEFAULT.to_string(),
        Arc::new(multiplexer),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_a_successful_call_returns_result() {
    init_test();
    let broker = BrokerSession::connect(&amqp_url()).await.unwrap();
    let service_name = unique_service_name("math");

    let server = Server::new(service_name.clone()).register("multiply", Multiply);
    server
        .start(&broker, RPC_EXCHANGE_DEFAULT, 4)
        .await
        .unwrap();

    let client = connected_client(&broker, &service_name).await;
    let result = client
        .call("multiply", serde_json::json!([2.0, 3.0, 4.0]), None)
        .await
        .unwrap();

    assert_eq!(result, serde_json::json!(24.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_b_unknown_method_returns_remote_error() {
    init_test();
    let broker = BrokerSession::connect(&amqp_url()).await.unwrap();
    let service_name = unique_service_name("math");

    let server = Server::new(service_name.clone()).register("multiply", Multiply);
    server
        .start(&broker, RPC_EXCHANGE_DEFAULT, 4)
        .await
        .unwrap();

    let client = connected_client(&broker, &service_name).await;
    let error = client.call("divide", Value::Null, None).await.unwrap_err();

    match error {
        ClientError::Remote(remote) => {
            assert_eq!(remote.value, "method not found: divide");
            assert_eq!(
                remote.exc_args,
                vec![serde_json::json!("method not found: divide")]
            );
        }
        other => panic!("expected ClientError::Remote, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_d_deadline_elapses_before_slow_handler_replies() {
    init_test();
    let broker = BrokerSession::connect(&amqp_url()).await.unwrap();
    let service_name = unique_service_name("slow");

    let server = Server::new(service_name.clone()).register("echo", SlowEcho);
    server
        .start(&broker, RPC_EXCHANGE_DEFAULT, 4)
        .await
        .unwrap();

    let client = connected_client(&broker, &service_name).await;
    let started = std::time::Instant::now();
    let error = client
        .call_with_deadline("echo", Value::Null, None, Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(matches!(error, ClientError::Timeout));
    assert!(started.elapsed() < Duration::from_secs(1));

    // Let the slow handler's late reply land and be discarded; a second,
    // independent call still succeeds, proving the process wasn't wedged by
    // the orphaned correlation id.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let result = client
        .call("echo", serde_json::json!("after timeout"), None)
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!("after timeout"));
}
