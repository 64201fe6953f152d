//! Registry of the server-side handlers loaded in this process, looked up by name.
//!
//! The registry holds the only long-lived strong reference to each server handler. Plugin
//! clients receive a [`Liveness`] handle instead, so unregistering a server kills every client
//! connected to it without any disconnect message.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::debug;

use crate::{
    client::{Liveness, Revoker},
    error::LookupError,
    handler::MessageHandler,
};

struct ServerEntry {
    liveness: Liveness,
    revoker: Revoker,
    // Keeps the handler alive while registered.
    _handler: Arc<dyn MessageHandler>,
}

/// A registry of server-side handlers by name.
#[derive(Default)]
pub struct ServerRegistry {
    servers: RwLock<HashMap<String, ServerEntry>>,
}

impl ServerRegistry {
    /// Creates a new empty server registry.
    pub fn new() -> Self {
        ServerRegistry::default()
    }

    /// Registers a server handler under a given name.
    ///
    /// Returns `false` and leaves the registry unchanged if the name is already taken.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn MessageHandler>) -> bool {
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        match servers.entry(name.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                let (liveness, revoker) = Liveness::new(&handler);
                entry.insert(ServerEntry {
                    liveness,
                    revoker,
                    _handler: handler,
                });
                true
            }
        }
    }

    /// Unregisters a server handler, killing every plugin client connected to it.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(entry) => {
                entry.revoker.revoke();
                debug!(server = name, "unregistered server plugin");
                true
            }
            None => false,
        }
    }

    /// Looks up the liveness handle of a server handler.
    pub fn lookup(&self, name: &str) -> Result<Liveness, LookupError> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| entry.liveness.clone())
            .ok_or_else(|| LookupError::ServerNotFound(name.to_string()))
    }

    /// Returns `true` if a server handler is registered under the name.
    pub fn contains(&self, name: &str) -> bool {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// The names of all registered server handlers, in arbitrary order.
    pub fn names(&self) -> Vec<String> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// The number of registered server handlers.
    pub fn len(&self) -> usize {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no server handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ServerRegistry {
    fn drop(&mut self) {
        let servers = self.servers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in servers.values() {
            entry.revoker.revoke();
        }
    }
}

impl fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::{future::BoxFuture, FutureExt};

    use super::*;
    use crate::{client::PluginClient, handler::HandlerResult, message::PluginMessage};

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

    #[test]
    fn register_and_lookup() {
        let servers = ServerRegistry::new();
        assert!(servers.is_empty());
        assert!(servers.register("a", Arc::new(Nop)));
        assert!(!servers.register("a", Arc::new(Nop)));
        assert!(servers.contains("a"));
        assert_eq!(servers.len(), 1);
        assert_eq!(servers.names(), vec!["a".to_string()]);

        assert!(servers.lookup("a").unwrap().is_alive());
        assert_eq!(
            servers.lookup("b").unwrap_err(),
            LookupError::ServerNotFound("b".to_string())
        );
    }

    #[test]
    fn unregister_revokes_outstanding_handles() {
        let servers = ServerRegistry::new();
        let handler: Arc<dyn MessageHandler> = Arc::new(Nop);
        servers.register("a", handler.clone());
        let liveness = servers.lookup("a").unwrap();

        assert!(servers.unregister("a"));
        assert!(!servers.unregister("a"));
        // Revoked even though `handler` is still referenced here.
        assert!(!liveness.is_alive());
        assert!(servers.lookup("a").is_err());
    }

    #[test]
    fn dropping_the_registry_revokes_handles() {
        let servers = ServerRegistry::new();
        servers.register("a", Arc::new(Nop));
        let liveness = servers.lookup("a").unwrap();
        drop(servers);
        assert!(!liveness.is_alive());
    }
}
