//! The plugin client, mediating messages between one server-side handler and one client side.
//!
//! A [`PluginClient`] connects a server-side [`MessageHandler`] running in this process to a
//! client side, which is either
//!
//! - another handler in the same process ([`PluginClient::for_in_process`]), or
//! - a network connection ([`PluginClient::for_networked`]), where messages to the client side
//!   are queued on the connection and messages from it are fed in with [`PluginClient::send`].
//!
//! Messages are sent with [`send`](PluginClient::send), which returns as soon as the message is
//! accepted for delivery, or with [`send_and_wait`](PluginClient::send_and_wait), which waits
//! for the reply carrying the same identifier.
//!
//! # Liveness
//!
//! A client never keeps its server-side handler alive. Once the handler is unregistered from its
//! [`ServerRegistry`], the client is dead: [`is_dead`](PluginClient::is_dead) returns `true` and
//! every send fails with [`ExchangeError::ServerUnloaded`]. A dead client must be discarded.
//!
//! # Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use futures::{future::BoxFuture, FutureExt};
//! use plugin_exchange::prelude::*;
//!
//! struct Echo;
//!
//! impl MessageHandler for Echo {
//!     fn handle<'a>(
//!         &'a self,
//!         _client: &'a PluginClient,
//!         message: PluginMessage,
//!     ) -> BoxFuture<'a, HandlerResult> {
//!         async move { Ok(Some(message.reply(message.params.clone(), None))) }.boxed()
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let servers = ServerRegistry::new();
//! servers.register("echo", Arc::new(Echo));
//!
//! let client = PluginClient::for_in_process(&servers, "echo", Arc::new(Echo), Dispatcher::new())?;
//! let reply = client
//!     .send_and_wait(
//!         Direction::ToServer,
//!         PluginMessage::with_identifier("A1", Params::new(), None),
//!         Duration::from_secs(2),
//!     )
//!     .await?;
//! assert!(reply.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

mod correlation;
mod id;
mod liveness;

use std::{
    fmt,
    future::{self, Future},
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::time::{timeout_at, Instant};
use tracing::debug;

pub use self::id::ClientId;
pub use self::liveness::{Liveness, Revoker};

use self::correlation::{CorrelationTable, PendingGuard};
use crate::{
    dispatch::Dispatcher,
    error::{ExchangeError, LookupError},
    handler::MessageHandler,
    message::{ClientPermissions, Direction, PluginMessage},
    server::ServerRegistry,
    transport::{Connection, OutboundMessage},
};

/// The longest timeout accepted by [`PluginClient::send_and_wait`].
pub const MAX_SEND_AND_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// How the client side of a [`PluginClient`] is reached. Fixed at construction.
enum Transport {
    InProcess(Arc<dyn MessageHandler>),
    Networked(Arc<dyn Connection>),
}

struct ClientInner {
    id: ClientId,
    server_name: String,
    server: Liveness,
    transport: Transport,
    sync_sends: CorrelationTable,
    dispatcher: Dispatcher,
}

/// A client connecting a server-side message handler with its client side.
///
/// Cloning is cheap, and all clones refer to the same client.
#[derive(Clone)]
pub struct PluginClient {
    inner: Arc<ClientInner>,
}

impl PluginClient {
    /// Creates a client whose client side is reached through a network connection.
    ///
    /// The caller must register the client in a [`ClientRegistry`](crate::registry::ClientRegistry)
    /// before exposing it, so that at most one client exists per connection and server name.
    pub fn for_networked(
        servers: &ServerRegistry,
        server_name: impl Into<String>,
        connection: Arc<dyn Connection>,
        dispatcher: Dispatcher,
    ) -> Result<Self, LookupError> {
        let server_name = server_name.into();
        let server = servers.lookup(&server_name)?;
        let client = PluginClient::new(
            server_name,
            server,
            Transport::Networked(connection),
            dispatcher,
        );
        debug!(client = %client, "constructed networked plugin client");
        Ok(client)
    }

    /// Creates a client whose client side is a handler in this process.
    ///
    /// The caller must register the client in a [`ClientRegistry`](crate::registry::ClientRegistry)
    /// before exposing it.
    pub fn for_in_process(
        servers: &ServerRegistry,
        server_name: impl Into<String>,
        client_handler: Arc<dyn MessageHandler>,
        dispatcher: Dispatcher,
    ) -> Result<Self, LookupError> {
        let server_name = server_name.into();
        let server = servers.lookup(&server_name)?;
        let client = PluginClient::new(
            server_name,
            server,
            Transport::InProcess(client_handler),
            dispatcher,
        );
        debug!(client = %client, "constructed in-process plugin client");
        Ok(client)
    }

    fn new(
        server_name: String,
        server: Liveness,
        transport: Transport,
        dispatcher: Dispatcher,
    ) -> Self {
        PluginClient {
            inner: Arc::new(ClientInner {
                id: ClientId::generate(),
                server_name,
                server,
                transport,
                sync_sends: CorrelationTable::new(),
                dispatcher,
            }),
        }
    }

    /// The process-unique identifier of this client.
    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    /// The name of the server-side handler.
    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    /// Returns `true` once the server-side handler is gone. A dead client never recovers.
    pub fn is_dead(&self) -> bool {
        !self.inner.server.is_alive()
    }

    /// Returns `true` if the client side is reached through a network connection.
    pub fn is_networked(&self) -> bool {
        matches!(self.inner.transport, Transport::Networked(_))
    }

    /// The network connection of the client side, if any.
    pub fn connection(&self) -> Option<&Arc<dyn Connection>> {
        match &self.inner.transport {
            Transport::Networked(connection) => Some(connection),
            Transport::InProcess(_) => None,
        }
    }

    /// The permissions of the client side.
    ///
    /// Computed on every call, since the access policy of a connection can change at runtime.
    pub fn permissions(&self) -> ClientPermissions {
        match &self.inner.transport {
            Transport::InProcess(_) => ClientPermissions::Direct,
            Transport::Networked(connection) if connection.has_full_access() => {
                ClientPermissions::FullNetwork
            }
            Transport::Networked(_) => ClientPermissions::RestrictedNetwork,
        }
    }

    /// A short description of this client, for logs.
    pub fn short_description(&self) -> String {
        format!("PluginClient for {}", self.inner.server_name)
    }

    /// Creates a weak reference which does not keep the client alive.
    pub fn downgrade(&self) -> WeakPluginClient {
        WeakPluginClient {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Sends a message without waiting for it to be delivered.
    ///
    /// Returning `Ok` means the message was accepted for delivery, not that it arrived. If an
    /// error is returned the message was not sent. A [dead](ExchangeError::is_dead) error means
    /// this client must be discarded, retrying on it is pointless.
    ///
    /// Replies whose identifier is awaited by a [`send_and_wait`](PluginClient::send_and_wait) on
    /// this client go to that waiter instead of the handler.
    pub fn send(&self, direction: Direction, mut message: PluginMessage) -> Result<(), ExchangeError> {
        if self.is_dead() {
            return Err(ExchangeError::ServerUnloaded);
        }

        let client_handler = match (direction, &self.inner.transport) {
            (Direction::ToClient, Transport::Networked(connection)) => {
                return self.queue_on_connection(connection, message);
            }
            (Direction::ToClient, Transport::InProcess(handler)) => Some(handler.clone()),
            (Direction::ToServer, _) => None,
        };

        if message.is_reply() {
            match self.inner.sync_sends.try_deliver(message) {
                Ok(()) => return Ok(()),
                Err(reply) => message = reply,
            }
        }

        let handler = match client_handler {
            Some(handler) => handler,
            None => {
                let handler = self
                    .inner
                    .server
                    .upgrade()
                    .ok_or(ExchangeError::ServerUnloaded)?;
                message.permissions = Some(self.permissions());
                handler
            }
        };

        self.inner
            .dispatcher
            .dispatch(handler, self.clone(), direction, message)
    }

    fn queue_on_connection(
        &self,
        connection: &Arc<dyn Connection>,
        message: PluginMessage,
    ) -> Result<(), ExchangeError> {
        if connection.is_closed() {
            return Err(ExchangeError::ConnectionClosed);
        }
        connection.queue(OutboundMessage {
            server_name: self.inner.server_name.clone(),
            message,
        })?;
        Ok(())
    }

    /// Sends a message and waits for its reply.
    ///
    /// The returned reply carries the same identifier as `message`. The identifier must not be
    /// awaited by another call on this client at the same time.
    ///
    /// Dropping the returned future cancels the wait. The identifier is unregistered on every
    /// exit path.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::ReplyNotAllowed`] if `message` is a reply, since no reply would come back.
    /// - [`ExchangeError::InvalidTimeout`] if `timeout` is zero or above
    ///   [`MAX_SEND_AND_WAIT_TIMEOUT`].
    /// - [`ExchangeError::DuplicateIdentifier`] if the identifier is already awaited.
    /// - [`ExchangeError::Timeout`] if no reply arrived in time.
    /// - Any error returned by [`send`](PluginClient::send).
    pub async fn send_and_wait(
        &self,
        direction: Direction,
        message: PluginMessage,
        timeout: Duration,
    ) -> Result<PluginMessage, ExchangeError> {
        self.send_and_wait_until(direction, message, timeout, future::pending())
            .await
    }

    /// Sends a message and waits for its reply, unless `cancel` completes first.
    ///
    /// Behaves like [`send_and_wait`](PluginClient::send_and_wait), but returns
    /// [`ExchangeError::Cancelled`] as soon as `cancel` completes.
    pub async fn send_and_wait_until<C>(
        &self,
        direction: Direction,
        message: PluginMessage,
        timeout: Duration,
        cancel: C,
    ) -> Result<PluginMessage, ExchangeError>
    where
        C: Future<Output = ()>,
    {
        if message.is_reply() {
            return Err(ExchangeError::ReplyNotAllowed);
        }
        if timeout.is_zero() || timeout > MAX_SEND_AND_WAIT_TIMEOUT {
            return Err(ExchangeError::InvalidTimeout(timeout));
        }

        let deadline = Instant::now() + timeout;
        let identifier = message.identifier.clone();
        let pending = self.inner.sync_sends.register(&identifier)?;
        let _guard = PendingGuard::new(&self.inner.sync_sends, &identifier);

        self.send(direction, message)?;

        let reply = async {
            loop {
                // Wakes can happen without a reply, so always check the slot.
                if let Some(reply) = pending.take_reply() {
                    return reply;
                }
                pending.signalled().await;
            }
        };

        tokio::select! {
            res = timeout_at(deadline, reply) => match res {
                Ok(reply) => Ok(reply),
                Err(_) => {
                    debug!(client = %self.short_description(), %identifier, ?timeout, "synchronous send timed out");
                    Err(ExchangeError::Timeout)
                }
            },
            () = cancel => {
                debug!(client = %self.short_description(), %identifier, "synchronous send cancelled");
                Err(ExchangeError::Cancelled)
            }
        }
    }

    /// Sends a message and blocks the current thread until its reply arrives.
    ///
    /// This is [`send_and_wait`](PluginClient::send_and_wait) for synchronous code, for example
    /// inside [`tokio::task::spawn_blocking`].
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime, or from within an asynchronous execution
    /// context.
    pub fn blocking_send_and_wait(
        &self,
        direction: Direction,
        message: PluginMessage,
        timeout: Duration,
    ) -> Result<PluginMessage, ExchangeError> {
        tokio::runtime::Handle::current().block_on(self.send_and_wait(direction, message, timeout))
    }

    #[cfg(test)]
    pub(crate) fn is_awaiting(&self, identifier: &str) -> bool {
        self.inner.sync_sends.contains(identifier)
    }
}

impl PartialEq for PluginClient {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for PluginClient {}

impl fmt::Display for PluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PluginClient (ID: {}; server plugin: {}; ",
            self.inner.id.sequence_id(),
            self.inner.server_name
        )?;
        match &self.inner.transport {
            Transport::InProcess(handler) => write!(f, "client: {})", handler.name()),
            Transport::Networked(connection) => {
                write!(f, "client connection: {})", connection.id())
            }
        }
    }
}

impl fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClient")
            .field("id", &self.inner.id)
            .field("server_name", &self.inner.server_name)
            .field("networked", &self.is_networked())
            .field("dead", &self.is_dead())
            .field("sync_sends", &self.inner.sync_sends)
            .finish()
    }
}

/// A weak reference to a [`PluginClient`].
#[derive(Clone)]
pub struct WeakPluginClient {
    id: ClientId,
    inner: Weak<ClientInner>,
}

impl WeakPluginClient {
    /// The identifier of the referenced client.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Returns the client if it still has strong references.
    pub fn upgrade(&self) -> Option<PluginClient> {
        self.inner.upgrade().map(|inner| PluginClient { inner })
    }
}

impl fmt::Debug for WeakPluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPluginClient")
            .field("id", &self.id)
            .finish()
    }
}
