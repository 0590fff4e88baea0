//! Event publish/subscribe (spec §4.6, §4.7).

pub mod dispatcher;
pub mod handler;

pub use dispatcher::dispatch;
pub use handler::{EventCallback, EventConfig, EventHandler, HandlerKind};
