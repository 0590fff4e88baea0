use async_trait::async_trait;
use nameko_rs::error::HandlerFault;
use nameko_rs::{EventCallback, Handler};
use serde_json::{Map, Value};
use tracing::info;

/// Multiplies every element of `args` together. `args` must be a JSON array
/// of numbers; `kwargs` is ignored, matching the Nameko convention of
/// positional-only math methods.
pub struct Multiply;

#[async_trait]
impl Handler for Multiply {
    async fn call(&self, args: Value, _kwargs: Map<String, Value>) -> Result<Value, HandlerFault> {
        let numbers: Vec<f64> = serde_json::from_value(args)
            .map_err(|error| HandlerFault::Failed(format!("invalid args: {error}")))?;
        let product = numbers.iter().product::<f64>();
        Ok(Value::from(product))
    }
}

/// Logs every event it receives. Registered under SERVICE_POOL so only one
/// replica of this service handles each delivery.
pub struct LogEvent;

#[async_trait]
impl EventCallback for LogEvent {
    async fn on_event(&self, body: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(event = %String::from_utf8_lossy(body), "received event");
        Ok(())
    }
}
