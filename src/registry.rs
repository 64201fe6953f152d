//! Client registry for finding existing plugin clients instead of creating duplicates.
//!
//! Hosts look a client up here before constructing a new one, so that at most one client
//! exists per connection and server name. Networked clients are owned by the registry until
//! their connection is removed with [`ClientRegistry::remove_connection`]. In-process clients
//! are only referenced weakly: they live as long as the client plugin holds them, and are
//! purged lazily once dropped or once their server is gone.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use once_cell::sync::Lazy;
use tracing::trace;

use crate::{
    client::{ClientId, PluginClient, WeakPluginClient},
    transport::{Connection, ConnectionId},
};

/// Global client registry.
pub static CLIENT_REGISTRY: Lazy<Arc<Mutex<ClientRegistry>>> =
    Lazy::new(|| Arc::new(Mutex::new(ClientRegistry::new())));

#[derive(Debug)]
enum Registered {
    Networked {
        client: PluginClient,
        connection: ConnectionId,
    },
    InProcess(WeakPluginClient),
}

impl Registered {
    fn client(&self) -> Option<PluginClient> {
        let client = match self {
            Registered::Networked { client, .. } => client.clone(),
            Registered::InProcess(weak) => weak.upgrade()?,
        };
        (!client.is_dead()).then_some(client)
    }
}

/// A registry of plugin clients by id.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, Registered>,
    routes: HashMap<(ConnectionId, String), ClientId>,
}

impl ClientRegistry {
    /// Creates a new empty client registry.
    pub fn new() -> Self {
        ClientRegistry::default()
    }

    /// The number of registered clients, including ones not yet purged.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if the registry contains no clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Inserts a client.
    ///
    /// Returns `false` if the client is already registered, or if a live networked client for
    /// the same connection and server name exists.
    pub fn insert(&mut self, client: &PluginClient) -> bool {
        if self.clients.contains_key(&client.id()) {
            return false;
        }

        let registered = match client.connection() {
            Some(connection) => {
                let route = (connection.id(), client.server_name().to_string());
                if let Some(existing) = self.routes.get(&route).copied() {
                    if self.get(existing).is_some() {
                        return false;
                    }
                }
                self.routes.insert(route, client.id());
                Registered::Networked {
                    client: client.clone(),
                    connection: connection.id(),
                }
            }
            None => Registered::InProcess(client.downgrade()),
        };

        self.clients.insert(client.id(), registered);
        true
    }

    /// Gets a registered client, purging it if it is dead or no longer referenced.
    pub fn get(&mut self, id: ClientId) -> Option<PluginClient> {
        let client = self.clients.get(&id)?.client();
        if client.is_none() {
            self.remove(id);
        }
        client
    }

    /// Gets the networked client for a connection and server name.
    pub fn get_for_connection(
        &mut self,
        connection: ConnectionId,
        server_name: &str,
    ) -> Option<PluginClient> {
        let id = *self.routes.get(&(connection, server_name.to_string()))?;
        self.get(id)
    }

    /// Removes a client.
    pub fn remove(&mut self, id: ClientId) -> bool {
        match self.clients.remove(&id) {
            Some(Registered::Networked { client, connection }) => {
                let route = (connection, client.server_name().to_string());
                if self.routes.get(&route) == Some(&id) {
                    self.routes.remove(&route);
                }
                true
            }
            Some(Registered::InProcess(_)) => true,
            None => false,
        }
    }

    /// Removes every client of a closed connection, returning them.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<PluginClient> {
        let ids: Vec<ClientId> = self
            .clients
            .iter()
            .filter_map(|(id, registered)| match registered {
                Registered::Networked { connection: c, .. } if *c == connection => Some(*id),
                _ => None,
            })
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(Registered::Networked { client, .. }) = self.clients.remove(&id) {
                removed.push(client);
            }
        }
        self.routes.retain(|(c, _), _| *c != connection);
        trace!(%connection, removed = removed.len(), "removed connection clients");
        removed
    }

    /// Removes every dead or unreferenced client, returning how many were removed.
    pub fn purge(&mut self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, registered)| registered.client().is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            self.remove(*id);
        }
        if !dead.is_empty() {
            trace!(purged = dead.len(), "purged plugin clients");
        }
        dead.len()
    }
}

#[cfg(test)]
mod tests {
    use futures::{future::BoxFuture, FutureExt};

    use super::*;
    use crate::{
        dispatch::Dispatcher,
        handler::{HandlerResult, MessageHandler},
        message::PluginMessage,
        server::ServerRegistry,
        transport::ChannelConnection,
    };

    struct Nop;

    impl MessageHandler for Nop {
        fn handle<'a>(
            &'a self,
            _client: &'a PluginClient,
            _message: PluginMessage,
        ) -> BoxFuture<'a, HandlerResult> {
            async { Ok(None) }.boxed()
        }
    }

    fn servers() -> ServerRegistry {
        let servers = ServerRegistry::new();
        servers.register("a", Arc::new(Nop));
        servers.register("b", Arc::new(Nop));
        servers
    }

    #[tokio::test]
    async fn one_networked_client_per_route() {
        let servers = servers();
        let dispatcher = Dispatcher::new();
        let (connection, _queue) = ChannelConnection::new(true);
        let mut registry = ClientRegistry::new();

        let first =
            PluginClient::for_networked(&servers, "a", connection.clone(), dispatcher.clone())
                .unwrap();
        assert!(registry.insert(&first));
        assert!(!registry.insert(&first));

        let duplicate =
            PluginClient::for_networked(&servers, "a", connection.clone(), dispatcher.clone())
                .unwrap();
        assert!(!registry.insert(&duplicate));

        let other =
            PluginClient::for_networked(&servers, "b", connection.clone(), dispatcher).unwrap();
        assert!(registry.insert(&other));

        assert_eq!(registry.get_for_connection(connection.id(), "a"), Some(first.clone()));
        assert_eq!(registry.get(other.id()), Some(other));
        assert_eq!(registry.len(), 2);

        // Networked clients are owned by the registry.
        let first_id = first.id();
        drop(first);
        assert!(registry.get(first_id).is_some());
    }

    #[tokio::test]
    async fn remove_connection_destroys_its_clients() {
        let servers = servers();
        let dispatcher = Dispatcher::new();
        let (connection, _queue) = ChannelConnection::new(true);
        let (other_connection, _other_queue) = ChannelConnection::new(true);
        let mut registry = ClientRegistry::new();

        for name in ["a", "b"] {
            let client =
                PluginClient::for_networked(&servers, name, connection.clone(), dispatcher.clone())
                    .unwrap();
            assert!(registry.insert(&client));
        }
        let survivor =
            PluginClient::for_networked(&servers, "a", other_connection.clone(), dispatcher)
                .unwrap();
        assert!(registry.insert(&survivor));

        let removed = registry.remove_connection(connection.id());
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.get_for_connection(connection.id(), "a").is_none());
        assert_eq!(
            registry.get_for_connection(other_connection.id(), "a"),
            Some(survivor)
        );
    }

    #[tokio::test]
    async fn in_process_clients_are_weak() {
        let servers = servers();
        let mut registry = ClientRegistry::new();
        let client =
            PluginClient::for_in_process(&servers, "a", Arc::new(Nop), Dispatcher::new()).unwrap();
        let id = client.id();
        assert!(registry.insert(&client));
        assert_eq!(registry.get(id), Some(client.clone()));

        drop(client);
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dead_clients_are_purged() {
        let servers = servers();
        let (connection, _queue) = ChannelConnection::new(true);
        let mut registry = ClientRegistry::new();
        let client =
            PluginClient::for_networked(&servers, "a", connection.clone(), Dispatcher::new())
                .unwrap();
        assert!(registry.insert(&client));

        servers.unregister("a");
        assert_eq!(registry.purge(), 1);
        assert!(registry.is_empty());
        assert!(registry.get_for_connection(connection.id(), "a").is_none());

        // A fresh client for the route can be registered again.
        servers.register("a", Arc::new(Nop));
        let replacement =
            PluginClient::for_networked(&servers, "a", connection, Dispatcher::new()).unwrap();
        assert!(registry.insert(&replacement));
    }

    #[test]
    fn global_registry_starts_empty() {
        let registry = CLIENT_REGISTRY.lock().unwrap();
        assert_eq!(registry.len(), 0);
    }
}
