//! Runs handler invocations off the caller's thread and turns their results into replies.
//!
//! The [`Dispatcher`] owns a bounded worker pool. Every message accepted for local delivery by a
//! [`PluginClient`] becomes one job on that pool, which:
//!
//! 1. invokes the handler, capturing errors and panics alike,
//! 2. converts a fault into a failure reply with the [`INTERNAL_ERROR`] code, unless the handled
//!    message was a reply,
//! 3. discards any reply produced in answer to a reply,
//! 4. synthesizes an empty success reply when the handler returned none for a non-reply message,
//! 5. sends the reply back in the inverted direction through [`PluginClient::send`].
//!
//! Steps 2 and 4 make sure a peer blocked in
//! [`send_and_wait`](PluginClient::send_and_wait) is released promptly instead of timing out.

mod pool;

use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tracing::{error, warn};

use crate::{
    client::PluginClient,
    error::{ExchangeError, HandlerFault},
    handler::MessageHandler,
    message::{Direction, PluginMessage, Priority},
};

use self::pool::WorkerPool;

/// Error code of the failure reply sent when a handler faults.
pub const INTERNAL_ERROR: &str = "InternalError";

/// Configuration for a [`Dispatcher`].
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    workers: usize,
}

impl DispatcherConfig {
    /// Creates a config with one worker per CPU.
    pub fn new() -> Self {
        DispatcherConfig {
            workers: num_cpus::get().max(1),
        }
    }

    /// Sets the maximum number of handler invocations running at once.
    ///
    /// A value of 0 is treated as 1.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// The maximum number of handler invocations running at once.
    pub fn worker_count(&self) -> usize {
        self.workers
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig::new()
    }
}

/// Handle to a bounded, priority-aware pool invoking message handlers.
///
/// Cloning is cheap, and all clones share one pool. The pool shuts down once every handle,
/// including those held by plugin clients, has been dropped.
#[derive(Clone)]
pub struct Dispatcher {
    pool: WorkerPool,
    workers: usize,
}

impl Dispatcher {
    /// Creates a dispatcher with the default config.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new() -> Self {
        Dispatcher::with_config(DispatcherConfig::default())
    }

    /// Creates a dispatcher with the given config.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn with_config(config: DispatcherConfig) -> Self {
        Dispatcher {
            pool: WorkerPool::spawn(config.workers),
            workers: config.workers,
        }
    }

    /// The maximum number of handler invocations running at once.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns `true` if the worker pool is no longer accepting jobs.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Queues an invocation of `handler` for `message`, which was sent in `direction`.
    pub(crate) fn dispatch(
        &self,
        handler: Arc<dyn MessageHandler>,
        client: PluginClient,
        direction: Direction,
        message: PluginMessage,
    ) -> Result<(), ExchangeError> {
        let priority = handler.priority().unwrap_or(Priority::Normal);
        self.pool
            .submit(
                priority,
                invoke(handler, client, direction, message).boxed(),
            )
            .map_err(|_| ExchangeError::DispatcherClosed)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn invoke(
    handler: Arc<dyn MessageHandler>,
    client: PluginClient,
    direction: Direction,
    message: PluginMessage,
) {
    let identifier = message.identifier.clone();
    let is_reply = message.is_reply();

    let res = AssertUnwindSafe(async { handler.handle(&client, message).await })
        .catch_unwind()
        .await;
    let outcome = match res {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(err)) => Err(HandlerFault::Error(err)),
        Err(panic) => Err(HandlerFault::Panicked(panic)),
    };

    let Some(reply) = reply_for(&*handler, &client, direction, &identifier, is_reply, outcome)
    else {
        return;
    };

    if let Err(err) = client.send(direction.invert(), reply) {
        warn!(
            handler = handler.name(),
            client = %client.short_description(),
            %direction,
            %identifier,
            "sending reply from message handler failed: {err}"
        );
    }
}

/// Normalizes a handler outcome into the reply to send back, if any.
fn reply_for(
    handler: &dyn MessageHandler,
    client: &PluginClient,
    direction: Direction,
    identifier: &str,
    is_reply: bool,
    outcome: Result<Option<PluginMessage>, HandlerFault>,
) -> Option<PluginMessage> {
    match outcome {
        Err(fault) => {
            error!(
                handler = handler.name(),
                client = %client.short_description(),
                %direction,
                identifier,
                "message handler faulted: {fault}"
            );
            if is_reply {
                return None;
            }
            Some(PluginMessage::failure_reply(
                identifier,
                INTERNAL_ERROR,
                format!("message handler '{}' faulted: {fault}", handler.name()),
            ))
        }
        Ok(Some(reply)) if is_reply => {
            warn!(
                handler = handler.name(),
                client = %client.short_description(),
                %direction,
                identifier,
                reply = %reply,
                "message handler tried to reply to a reply, discarding it"
            );
            None
        }
        Ok(Some(reply)) => Some(reply),
        Ok(None) if is_reply => None,
        Ok(None) => Some(PluginMessage::success_reply(identifier)),
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        handler::HandlerResult,
        message::Params,
        server::ServerRegistry,
        transport::ChannelConnection,
    };

    struct Silent;

    impl MessageHandler for Silent {
        fn handle<'a>(
            &'a self,
            _client: &'a PluginClient,
            _message: PluginMessage,
        ) -> BoxFuture<'a, HandlerResult> {
            async { Ok(None) }.boxed()
        }

        fn name(&self) -> &str {
            "silent"
        }
    }

    fn client() -> PluginClient {
        let servers = ServerRegistry::new();
        servers.register("silent", Arc::new(Silent));
        let (connection, _outbound) = ChannelConnection::new(true);
        PluginClient::for_networked(&servers, "silent", connection, Dispatcher::new()).unwrap()
    }

    #[tokio::test]
    async fn empty_result_becomes_success_reply() {
        let client = client();
        let reply = reply_for(&Silent, &client, Direction::ToServer, "X1", false, Ok(None)).unwrap();
        assert_eq!(reply, PluginMessage::success_reply("X1"));
    }

    #[tokio::test]
    async fn empty_result_for_reply_sends_nothing() {
        let client = client();
        assert!(reply_for(&Silent, &client, Direction::ToServer, "X1", true, Ok(None)).is_none());
    }

    #[tokio::test]
    async fn fault_becomes_internal_error_reply() {
        let client = client();
        let fault = HandlerFault::Panicked(Box::new("boom"));
        let reply =
            reply_for(&Silent, &client, Direction::ToServer, "B1", false, Err(fault)).unwrap();
        assert_eq!(reply.identifier, "B1");
        assert!(reply.is_reply());
        assert!(!reply.is_success());
        assert_eq!(reply.error_code(), Some(INTERNAL_ERROR));
        assert!(reply.error_message().unwrap().contains("panicked: boom"));
        assert!(reply.error_message().unwrap().contains("silent"));
    }

    #[tokio::test]
    async fn fault_on_reply_sends_nothing() {
        let client = client();
        let fault = HandlerFault::Error("bad".into());
        assert!(reply_for(&Silent, &client, Direction::ToServer, "B1", true, Err(fault)).is_none());
    }

    #[tokio::test]
    async fn reply_to_reply_is_discarded() {
        let client = client();
        let reply = PluginMessage::with_identifier("C1", Params::new(), None).reply(Params::new(), None);
        assert!(
            reply_for(&Silent, &client, Direction::ToClient, "C1", true, Ok(Some(reply))).is_none()
        );
    }

    #[tokio::test]
    async fn handler_reply_is_passed_through() {
        let client = client();
        let request = PluginMessage::with_identifier("A1", Params::new(), None);
        let reply = request.reply(Params::new(), Some(vec![7]));
        assert_eq!(
            reply_for(&Silent, &client, Direction::ToServer, "A1", false, Ok(Some(reply.clone()))),
            Some(reply)
        );
    }

    #[test]
    fn config_never_allows_zero_workers() {
        assert_eq!(DispatcherConfig::new().workers(0).worker_count(), 1);
        assert!(DispatcherConfig::default().worker_count() >= 1);
    }
}
