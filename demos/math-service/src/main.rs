mod handlers;

use std::sync::Arc;

use nameko_rs::events::dispatch as dispatch_event;
use nameko_rs::telemetry::{get_tracing_subscriber, init_tracing_subscriber};
use nameko_rs::{BrokerSession, EventConfig, EventHandler, HandlerKind, Server};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = get_tracing_subscriber("math-service".into(), "info".into(), std::io::stdout);
    init_tracing_subscriber(subscriber);

    let settings = nameko_rs::config::load()?;
    let broker = BrokerSession::connect(&settings.amqp_url).await?;

    let server = Server::new(settings.service_name.clone()).register("multiply", handlers::Multiply);
    server
        .start(&broker, &settings.rpc_exchange_name, settings.max_workers)
        .await?;
    info!(service = %settings.service_name, "RPC server started");

    let event_cfg = EventConfig {
        source_service: "authnzng".to_string(),
        event_type: "EVENT_EXAMPLE".to_string(),
        kind: HandlerKind::ServicePool,
        reliable_delivery: true,
        requeue_on_error: false,
        broadcast_id: None,
        handler_identity: "log_event".to_string(),
        consumer_service: settings.service_name.clone(),
    };
    EventHandler::new(event_cfg)
        .start(&broker, Arc::new(handlers::LogEvent))
        .await?;

    let dispatch_channel = broker.open_channel().await?;
    if let Err(error) = dispatch_event(
        &dispatch_channel,
        "authnzng",
        "EVENT_EXAMPLE",
        br#"{"id":"12345","name":"example"}"#,
    )
    .await
    {
        error!(?error, "failed to dispatch example event");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    broker.close().await?;
    Ok(())
}
