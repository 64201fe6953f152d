//! The boundary to the network layer carrying messages to remote client sides.
//!
//! This crate never performs socket I/O. A networked [`PluginClient`](crate::client::PluginClient)
//! hands messages for its client side to a [`Connection`], whose owner writes them to the wire.
//! Messages arriving from the wire are fed back with
//! [`PluginClient::send`](crate::client::PluginClient::send) in [`Direction::ToServer`](crate::message::Direction::ToServer).
//!
//! [`ChannelConnection`] is an in-memory connection backed by a tokio channel, whose
//! [`OutboundQueue`] is drained by the network writer.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{error::ConnectionClosedError, message::PluginMessage};

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A process-unique identifier of a network connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new `ConnectionId` with an automatically incremented sequence.
    pub fn generate() -> Self {
        ConnectionId(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// A message queued for a remote client side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Name of the server-side handler the message comes from.
    pub server_name: String,
    /// The message.
    pub message: PluginMessage,
}

/// A network connection to a remote client side.
pub trait Connection: Send + Sync + 'static {
    /// The identifier of this connection.
    fn id(&self) -> ConnectionId;

    /// Returns `true` once the connection is closed.
    fn is_closed(&self) -> bool;

    /// Returns `true` if the remote side has full access.
    ///
    /// May change over the lifetime of the connection.
    fn has_full_access(&self) -> bool;

    /// Queues a message to be written to the remote side. Delivery is not confirmed.
    fn queue(&self, message: OutboundMessage) -> Result<(), ConnectionClosedError>;
}

/// A [`Connection`] queueing messages on an unbounded tokio channel.
#[derive(Debug)]
pub struct ChannelConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    closed: AtomicBool,
    full_access: AtomicBool,
}

impl ChannelConnection {
    /// Creates a new open connection and the queue its outbound messages arrive on.
    pub fn new(full_access: bool) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ChannelConnection {
            id: ConnectionId::generate(),
            outbound: tx,
            closed: AtomicBool::new(false),
            full_access: AtomicBool::new(full_access),
        };
        (Arc::new(connection), OutboundQueue { rx })
    }

    /// Closes the connection. Messages queued afterwards are rejected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Changes the access level of the remote side.
    pub fn set_full_access(&self, full_access: bool) {
        self.full_access.store(full_access, Ordering::Release);
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.outbound.is_closed()
    }

    fn has_full_access(&self) -> bool {
        self.full_access.load(Ordering::Acquire)
    }

    fn queue(&self, message: OutboundMessage) -> Result<(), ConnectionClosedError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionClosedError);
        }
        self.outbound.send(message).map_err(|_| ConnectionClosedError)
    }
}

/// Receiving half of a [`ChannelConnection`].
///
/// Dropping the queue closes the connection.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl OutboundQueue {
    /// Receives the next outbound message.
    ///
    /// Returns `None` once the connection has been dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.rx.recv().await
    }

    /// Receives an outbound message if one is queued.
    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.rx.try_recv().ok()
    }

    /// Converts the queue into a stream of outbound messages.
    pub fn into_stream(self) -> UnboundedReceiverStream<OutboundMessage> {
        UnboundedReceiverStream::new(self.rx)
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;

    fn outbound(identifier: &str) -> OutboundMessage {
        OutboundMessage {
            server_name: "server".to_string(),
            message: PluginMessage::success_reply(identifier),
        }
    }

    #[tokio::test]
    async fn queued_messages_reach_the_stream() {
        let (connection, queue) = ChannelConnection::new(true);
        connection.queue(outbound("a")).unwrap();
        connection.queue(outbound("b")).unwrap();
        drop(connection);

        let identifiers: Vec<_> = queue
            .into_stream()
            .map(|outbound| outbound.message.identifier)
            .collect()
            .await;
        assert_eq!(identifiers, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn closed_connection_rejects_messages() {
        let (connection, mut queue) = ChannelConnection::new(true);
        connection.close();
        assert!(connection.is_closed());
        assert_eq!(connection.queue(outbound("a")), Err(ConnectionClosedError));
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn dropped_queue_closes_connection() {
        let (connection, queue) = ChannelConnection::new(false);
        assert!(!connection.is_closed());
        drop(queue);
        assert!(connection.is_closed());
        assert_eq!(connection.queue(outbound("a")), Err(ConnectionClosedError));
    }

    #[test]
    fn access_can_change() {
        let (connection, _queue) = ChannelConnection::new(false);
        assert!(!connection.has_full_access());
        connection.set_full_access(true);
        assert!(connection.has_full_access());
        assert_ne!(connection.id(), ChannelConnection::new(false).0.id());
    }
}
