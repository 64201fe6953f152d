//! The contract implemented by server-side and client-side message handlers.
//!
//! Handlers are invoked by the [`Dispatcher`](crate::dispatch::Dispatcher) on a worker pool, never
//! on the thread which called [`PluginClient::send`](crate::client::PluginClient::send). A handler
//! may send further messages through the client it is given, but should not wait on
//! [`send_and_wait`](crate::client::PluginClient::send_and_wait) for long since it occupies a
//! worker slot while doing so.
//!
//! # Replies
//!
//! The value returned by [`MessageHandler::handle`] decides what is sent back:
//!
//! - `Ok(Some(reply))` sends `reply` back, unless the handled message was itself a reply, in which
//!   case it is discarded with a warning.
//! - `Ok(None)` sends an empty success reply back for non-reply messages.
//! - `Err(err)` or a panic is logged, and a failure reply with the error code
//!   [`INTERNAL_ERROR`](crate::dispatch::INTERNAL_ERROR) is sent back for non-reply messages.
//!
//! # Example
//!
//! ```
//! use futures::{future::BoxFuture, FutureExt};
//! use plugin_exchange::client::PluginClient;
//! use plugin_exchange::handler::{HandlerResult, MessageHandler};
//! use plugin_exchange::message::{Params, PluginMessage};
//!
//! struct Ping;
//!
//! impl MessageHandler for Ping {
//!     fn handle<'a>(
//!         &'a self,
//!         _client: &'a PluginClient,
//!         message: PluginMessage,
//!     ) -> BoxFuture<'a, HandlerResult> {
//!         async move {
//!             let mut params = Params::new();
//!             params.insert("op".to_string(), "pong".to_string());
//!             Ok(Some(message.reply(params, None)))
//!         }
//!         .boxed()
//!     }
//! }
//! ```

use std::any;

use futures::future::BoxFuture;

use crate::{
    client::PluginClient,
    error::BoxError,
    message::{PluginMessage, Priority},
};

/// The result of handling a message.
pub type HandlerResult = Result<Option<PluginMessage>, BoxError>;

/// A handler of plugin messages, on either the server or client side.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles a message received through `client`.
    fn handle<'a>(
        &'a self,
        client: &'a PluginClient,
        message: PluginMessage,
    ) -> BoxFuture<'a, HandlerResult>;

    /// Scheduling priority of this handler's invocations.
    ///
    /// `None` uses [`Priority::Normal`].
    fn priority(&self) -> Option<Priority> {
        None
    }

    /// Name used to identify this handler in logs.
    fn name(&self) -> &str {
        any::type_name::<Self>()
    }
}
