//! Event dispatch (spec §4.6).

use lapin::{
    options::{ExchangeDeclareOptions, BasicPublishOptions},
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};

use crate::envelope::event_exchange;
use crate::error::TransportError;

/// Declares `<source_service>.events` as a durable topic exchange (if not
/// already present) and publishes `payload` under routing key `event_type`.
pub async fn dispatch(
    channel: &Channel,
    source_service: &str,
    event_type: &str,
    payload: &[u8],
) -> Result<(), TransportError> {
    let exchange_name = event_exchange(source_service);

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
        .basic_publish(
            &exchange_name,
            event_type,
            BasicPublishOptions::default(),
            payload,
            BasicProperties::default().with_content_type("application/json".into()),
        )
        .await
        .map_err(TransportError::Publish)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_name_matches_source_service() {
        assert_eq!(event_exchange("auth"), "auth.events");
    }
}
