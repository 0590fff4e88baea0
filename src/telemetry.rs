//! Structured logging setup.
//!
//! Composes a `tracing` subscriber that formats spans as bunyan-compatible
//! JSON, filtered via `RUST_LOG` (or a fallback level if unset), and
//! redirects the `log` facade into the same subscriber. The embedding
//! process is expected to call [`init_tracing_subscriber`] once at startup;
//! this crate never initializes logging on its own.

use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

/// Composes multiple layers into a `tracing` `Subscriber`.
///
/// # Arguments
/// - `name`: name of the embedding service, tagged onto every log line.
/// - `fallback_env_filter`: filter level used if `RUST_LOG` is unset.
/// - `sink`: where the formatted logs are written.
pub fn get_tracing_subscriber<Sink>(
    name: String,
    fallback_env_filter: String,
    sink: Sink,
) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_env_filter));
    let formatting_layer = BunyanFormattingLayer::new(name, sink);

    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

/// Registers a tracing `Subscriber` as the process-wide default. Call once.
pub fn init_tracing_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("Failed to set logger");
    set_global_default(subscriber).expect("Failed to set subscriber");
}
