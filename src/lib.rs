//! `nameko_rs` — a service-to-service messaging runtime on top of AMQP,
//! wire-compatible with the Python Nameko RPC/events convention.
//!
//! An embedding process links this crate to act as an RPC client, an RPC
//! server, and/or an event publisher/subscriber against a shared RabbitMQ
//! broker. See the module docs on [`client`], [`server`] and [`events`].

pub mod broker;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod helper;
pub mod server;
pub mod telemetry;

pub use broker::BrokerSession;
pub use client::Client;
pub use error::{ClientError, ConfigError, ProtocolError, RemoteError, TransportError};
pub use events::{EventCallback, EventConfig, EventHandler, HandlerKind};
pub use server::{Handler, Server, ServerHandle};
