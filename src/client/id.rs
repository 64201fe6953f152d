use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

static CLIENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A process-unique identifier of a [`PluginClient`](super::PluginClient).
///
/// Identifiers are assigned sequentially when a client is constructed and are never reused
/// within a process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    /// Generates a new `ClientId` with an automatically incremented sequence.
    pub fn generate() -> Self {
        ClientId(CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the sequential value of this identifier.
    pub fn sequence_id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({:?})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
        assert!(b.sequence_id() > a.sequence_id());
    }
}
