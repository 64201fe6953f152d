//! Defines error handling constructs for plugin exchange.
//!
//! Errors are split by how far they reach. [`ExchangeError`] is returned to callers of
//! [`PluginClient::send`](crate::client::PluginClient::send) and
//! [`PluginClient::send_and_wait`](crate::client::PluginClient::send_and_wait), and some of its
//! variants mean the client instance is unusable. [`HandlerFault`] never reaches a caller: the
//! dispatcher logs it and turns it into a failure reply.

use std::{any::Any, error, fmt, time::Duration};

/// A dyn boxed error.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Error that can occur when sending a message through a plugin client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeError {
    /// The network connection to the client side is closed.
    ConnectionClosed,
    /// The server-side handler has been unloaded.
    ServerUnloaded,
    /// No reply arrived before the timeout elapsed.
    Timeout,
    /// The wait for a reply was cancelled by the caller.
    Cancelled,
    /// A reply message was passed where a reply is required in return.
    ReplyNotAllowed,
    /// The timeout is zero or longer than [`MAX_SEND_AND_WAIT_TIMEOUT`](crate::client::MAX_SEND_AND_WAIT_TIMEOUT).
    InvalidTimeout(Duration),
    /// Another synchronous send with the same identifier is still waiting on this client.
    DuplicateIdentifier(String),
    /// The dispatcher's worker pool has shut down.
    DispatcherClosed,
}

impl ExchangeError {
    /// Returns `true` if the client instance which returned this error must be discarded.
    ///
    /// Messages which failed with a dead error were guaranteed not to be sent.
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            ExchangeError::ConnectionClosed
                | ExchangeError::ServerUnloaded
                | ExchangeError::DispatcherClosed
        )
    }
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::ConnectionClosed => write!(f, "connection to client closed"),
            ExchangeError::ServerUnloaded => write!(f, "the server plugin has been unloaded"),
            ExchangeError::Timeout => write!(f, "timed out waiting for a reply"),
            ExchangeError::Cancelled => write!(f, "wait for reply cancelled"),
            ExchangeError::ReplyNotAllowed => {
                write!(f, "reply messages cannot be sent synchronously")
            }
            ExchangeError::InvalidTimeout(timeout) => write!(f, "invalid timeout {timeout:?}"),
            ExchangeError::DuplicateIdentifier(identifier) => {
                write!(f, "identifier '{identifier}' is already awaiting a reply")
            }
            ExchangeError::DispatcherClosed => write!(f, "dispatcher closed"),
        }
    }
}

impl error::Error for ExchangeError {}

/// An error that can occur when looking up a server handler by name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupError {
    /// No server handler is registered under the name.
    ServerNotFound(String),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::ServerNotFound(name) => write!(f, "server plugin '{name}' not found"),
        }
    }
}

impl error::Error for LookupError {}

/// Returned by [`Connection::queue`](crate::transport::Connection::queue) when the connection
/// no longer accepts messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionClosedError;

impl fmt::Display for ConnectionClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection closed")
    }
}

impl error::Error for ConnectionClosedError {}

impl From<ConnectionClosedError> for ExchangeError {
    fn from(_: ConnectionClosedError) -> Self {
        ExchangeError::ConnectionClosed
    }
}

/// A fault raised by a message handler while processing a message.
pub enum HandlerFault {
    /// The handler returned an error.
    Error(BoxError),
    /// The handler panicked.
    Panicked(Box<dyn Any + Send>),
}

impl fmt::Debug for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerFault::Error(err) => f.debug_tuple("Error").field(err).finish(),
            HandlerFault::Panicked(_) => write!(f, "Panicked"),
        }
    }
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerFault::Error(err) => fmt::Display::fmt(err, f),
            HandlerFault::Panicked(any) => {
                // Types are strings if panicked with the `std::panic!` macro
                let s = any
                    .downcast_ref::<&'static str>()
                    .copied()
                    .or_else(|| any.downcast_ref::<String>().map(String::as_str));
                match s {
                    Some(s) => write!(f, "panicked: {s}"),
                    None => write!(f, "panicked"),
                }
            }
        }
    }
}

impl error::Error for HandlerFault {}
