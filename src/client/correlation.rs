//! Maps identifiers of outstanding synchronous sends to the entry their caller waits on.
//!
//! Many replies are checked against the table while only few synchronous sends register and
//! remove entries. Existence checks therefore take the read lock, and only a candidate match
//! escalates to the write lock, where the match is verified again since it may have been
//! removed in between.
//!
//! Entries are only ever removed by the waiting side, never by the delivering side.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt, mem,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use tokio::sync::Notify;

use crate::{error::ExchangeError, message::PluginMessage};

/// State of a pending entry's reply slot.
#[derive(Debug)]
enum Slot {
    Empty,
    Filled(PluginMessage),
    Taken,
}

/// A synchronous send waiting for its reply.
#[derive(Debug)]
pub(crate) struct PendingSend {
    reply: Mutex<Slot>,
    signal: Notify,
}

impl PendingSend {
    fn new() -> Self {
        PendingSend {
            reply: Mutex::new(Slot::Empty),
            signal: Notify::new(),
        }
    }

    /// Waits until the entry is signalled.
    ///
    /// A signal is remembered if it arrives before this is called. Wakes are not a guarantee
    /// that a reply is present, callers must check with [`PendingSend::take_reply`].
    pub(crate) async fn signalled(&self) {
        self.signal.notified().await;
    }

    /// Takes the reply if one has been delivered.
    pub(crate) fn take_reply(&self) -> Option<PluginMessage> {
        let mut slot = self.reply.lock().unwrap_or_else(PoisonError::into_inner);
        match mem::replace(&mut *slot, Slot::Taken) {
            Slot::Filled(reply) => Some(reply),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Fills the slot and signals the waiter. The slot can only be filled once.
    fn fill(&self, reply: PluginMessage) -> Result<(), PluginMessage> {
        let mut slot = self.reply.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*slot, Slot::Empty) {
            return Err(reply);
        }
        *slot = Slot::Filled(reply);
        // The slot is written before the signal, so a woken waiter always finds the reply.
        self.signal.notify_one();
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CorrelationTable {
    pending: RwLock<HashMap<String, Arc<PendingSend>>>,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        CorrelationTable::default()
    }

    /// Registers a synchronous send, returning the entry to wait on.
    ///
    /// An identifier which is already registered is rejected and the existing entry is kept.
    pub(crate) fn register(&self, identifier: &str) -> Result<Arc<PendingSend>, ExchangeError> {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        match pending.entry(identifier.to_string()) {
            Entry::Occupied(_) => Err(ExchangeError::DuplicateIdentifier(identifier.to_string())),
            Entry::Vacant(entry) => Ok(entry.insert(Arc::new(PendingSend::new())).clone()),
        }
    }

    /// Delivers `reply` to the synchronous send waiting on its identifier.
    ///
    /// Returns the reply back if nobody is waiting for it, or if the waiter already got one.
    pub(crate) fn try_deliver(&self, reply: PluginMessage) -> Result<(), PluginMessage> {
        let maybe_waiter = self
            .pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&reply.identifier);
        if !maybe_waiter {
            return Err(reply);
        }

        let pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        match pending.get(&reply.identifier) {
            Some(waiter) => waiter.fill(reply),
            None => Err(reply),
        }
    }

    /// Removes a registered identifier.
    pub(crate) fn remove(&self, identifier: &str) -> bool {
        self.pending
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier)
            .is_some()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, identifier: &str) -> bool {
        self.pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identifier)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.len())
            .finish()
    }
}

/// Removes an identifier from the table when dropped.
pub(crate) struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    identifier: &'a str,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(table: &'a CorrelationTable, identifier: &'a str) -> Self {
        PendingGuard { table, identifier }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.identifier);
    }
}
