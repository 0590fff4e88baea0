//! Wire envelope & naming (spec §4.1).
//!
//! Constants and pure formatters for queue/exchange names and the JSON
//! request/response envelope. Field names are frozen for cross-language
//! (Nameko) compatibility — do not rename.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default RPC exchange name, matches `namego/pkg/rpc/rpc.go`'s `Cfg.ExchangeName` default.
pub const RPC_EXCHANGE_DEFAULT: &str = "nameko-rpc";

/// Reply queue TTL in milliseconds (`x-expires`), 5 minutes.
pub const RPC_REPLY_QUEUE_TTL_MS: i64 = 300_000;

/// `rpc-<service_name>`
pub fn rpc_request_queue(service_name: &str) -> String {
    format!("rpc-{service_name}")
}

/// `<service_name>.*`, the binding key for a service's request queue.
pub fn rpc_request_binding_key(service_name: &str) -> String {
    format!("{service_name}.*")
}

/// `<target_service>.<method_name>`, the routing key for an RPC request.
pub fn rpc_request_routing_key(target_service: &str, method_name: &str) -> String {
    format!("{target_service}.{method_name}")
}

/// `rpc.reply-<service_name>-<reply_id>`
pub fn rpc_reply_queue(service_name: &str, reply_id: &str) -> String {
    format!("rpc.reply-{service_name}-{reply_id}")
}

/// `<source_service>.events`
pub fn event_exchange(source_service: &str) -> String {
    format!("{source_service}.events")
}

/// Request envelope: `{"args": <any>, "kwargs": <object>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub args: Value,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl RequestEnvelope {
    pub fn new(args: Value, kwargs: Option<Map<String, Value>>) -> Self {
        Self {
            args,
            kwargs: kwargs.unwrap_or_default(),
        }
    }
}

/// Response envelope: exactly one of `{"result": ..., "error": null}` or
/// `{"result": null, "error": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub result: Option<Value>,
    pub error: Option<crate::error::RemoteError>,
}

impl ResponseEnvelope {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: crate::error::RemoteError) -> Self {
        Self {
            result: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Value, crate::error::RemoteError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_queue_naming() {
        assert_eq!(rpc_request_queue("math"), "rpc-math");
        assert_eq!(rpc_request_binding_key("math"), "math.*");
        assert_eq!(rpc_request_routing_key("math", "multiply"), "math.multiply");
    }

    #[test]
    fn reply_queue_naming() {
        assert_eq!(
            rpc_reply_queue("math", "abc-123"),
            "rpc.reply-math-abc-123"
        );
    }

    #[test]
    fn event_exchange_naming() {
        assert_eq!(event_exchange("auth"), "auth.events");
    }

    #[test]
    fn ok_response_round_trips_with_null_error() {
        let response = ResponseEnvelope::ok(json!(24.0));
        let body = serde_json::to_string(&response).unwrap();
        assert_eq!(body, r#"{"result":24.0,"error":null}"#);

        let parsed: ResponseEnvelope = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.into_result().unwrap(), json!(24.0));
    }

    #[test]
    fn error_response_carries_all_five_fields() {
        let error = crate::error::RemoteError::from_message("method not found: divide");
        let response = ResponseEnvelope::err(error.clone());
        let body = serde_json::to_string(&response).unwrap();
        let parsed: ResponseEnvelope = serde_json::from_str(&body).unwrap();

        assert!(parsed.result.is_none());
        let parsed_error = parsed.error.unwrap();
        assert_eq!(parsed_error, error);
        assert_eq!(parsed_error.value, "method not found: divide");
        assert_eq!(
            parsed_error.exc_args,
            vec![json!("method not found: divide")]
        );
    }

    #[test]
    fn request_envelope_defaults_empty_kwargs() {
        let body = r#"{"args": [2.0, 3.0, 4.0]}"#;
        let request: RequestEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(request.args, json!([2.0, 3.0, 4.0]));
        assert!(request.kwargs.is_empty());
    }
}
