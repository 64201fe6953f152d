#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod client;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
pub mod transport;

pub use client::PluginClient;
pub use handler::MessageHandler;
pub use message::PluginMessage;

/// Commonly used types.
pub mod prelude {
    pub use crate::client::{PluginClient, WeakPluginClient, MAX_SEND_AND_WAIT_TIMEOUT};
    pub use crate::dispatch::{Dispatcher, DispatcherConfig};
    pub use crate::error::{ExchangeError, LookupError};
    pub use crate::handler::{HandlerResult, MessageHandler};
    pub use crate::message::{ClientPermissions, Direction, Params, PluginMessage, Priority};
    pub use crate::registry::{ClientRegistry, CLIENT_REGISTRY};
    pub use crate::server::ServerRegistry;
    pub use crate::transport::{ChannelConnection, Connection, OutboundQueue};
}
