use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use crate::handler::MessageHandler;

/// A revocable reference to a server-side handler.
///
/// The handle never keeps the handler alive. It reports the handler as gone once the owner
/// revokes it (see [`ServerRegistry::unregister`](crate::server::ServerRegistry::unregister)) or
/// once the last strong reference to the handler has been dropped, whichever comes first.
/// Revocation is permanent.
#[derive(Clone)]
pub struct Liveness {
    handler: Weak<dyn MessageHandler>,
    alive: Arc<AtomicBool>,
}

impl Liveness {
    /// Creates a handle to `handler` together with the [`Revoker`] which kills it.
    pub fn new(handler: &Arc<dyn MessageHandler>) -> (Self, Revoker) {
        let alive = Arc::new(AtomicBool::new(true));
        let liveness = Liveness {
            handler: Arc::downgrade(handler),
            alive: alive.clone(),
        };
        (liveness, Revoker { alive })
    }

    /// Returns `true` if the handler is still usable.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.handler.strong_count() > 0
    }

    /// Returns the handler if it is still usable.
    pub fn upgrade(&self) -> Option<Arc<dyn MessageHandler>> {
        if !self.alive.load(Ordering::Acquire) {
            return None;
        }
        self.handler.upgrade()
    }
}

impl fmt::Debug for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Liveness")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Owner side of a [`Liveness`] handle.
#[derive(Debug)]
pub struct Revoker {
    alive: Arc<AtomicBool>,
}

impl Revoker {
    /// Marks the handler as gone for every [`Liveness`] handle created with it.
    pub fn revoke(&self) {
        self.alive.store(false, Ordering::Release);
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
    fn revoke_kills_handle() {
        let handler: Arc<dyn MessageHandler> = Arc::new(Nop);
        let (liveness, revoker) = Liveness::new(&handler);
        assert!(liveness.is_alive());
        assert!(liveness.upgrade().is_some());

        revoker.revoke();
        assert!(!liveness.is_alive());
        assert!(liveness.upgrade().is_none());
        assert!(!liveness.clone().is_alive());
    }

    #[test]
    fn handle_does_not_keep_handler_alive() {
        let handler: Arc<dyn MessageHandler> = Arc::new(Nop);
        let (liveness, _revoker) = Liveness::new(&handler);
        drop(handler);
        assert!(!liveness.is_alive());
        assert!(liveness.upgrade().is_none());
    }
}
