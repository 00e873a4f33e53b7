//! Registry of running sessions keyed by channel.
//!
//! `SessionRegistry` stores the sender half of each session's inbound queue.
//! Entries whose session has stopped are pruned lazily at lookup time or
//! explicitly through [`SessionRegistry::prune`].

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::session::SessionEvent;

/// Concurrent map from channel number to a session's inbound queue.
#[derive(Debug, Default)]
pub struct SessionRegistry(DashMap<u16, UnboundedSender<SessionEvent>>);

impl SessionRegistry {
    /// Retrieve the queue of the session on `channel` if it is still running.
    #[must_use]
    pub fn get(&self, channel: u16) -> Option<UnboundedSender<SessionEvent>> {
        let guard = self.0.get(&channel);
        let tx = guard
            .as_ref()
            .map(|entry| entry.value().clone())
            .filter(|tx| !tx.is_closed());
        drop(guard);
        if tx.is_none() {
            self.0.remove_if(&channel, |_, tx| tx.is_closed());
        }
        tx
    }

    /// Register the queue of a newly begun session.
    pub fn insert(&self, channel: u16, tx: UnboundedSender<SessionEvent>) { self.0.insert(channel, tx); }

    /// Remove the entry for `channel` if it still refers to `tx`.
    ///
    /// A stopping session must not evict a successor that began on the same
    /// channel in the meantime.
    pub fn remove_if_same(&self, channel: u16, tx: &UnboundedSender<SessionEvent>) {
        self.0.remove_if(&channel, |_, existing| existing.same_channel(tx));
    }

    /// Remove all entries whose session has stopped.
    ///
    /// `DashMap::retain` acquires per-bucket write locks, so other operations
    /// may contend briefly while the registry is pruned.
    pub fn prune(&self) { self.0.retain(|_, tx| !tx.is_closed()); }

    /// Prune stopped sessions, then return the channels still running, sorted.
    #[must_use]
    pub fn active_channels(&self) -> Vec<u16> {
        self.prune();
        let mut channels: Vec<u16> = self.0.iter().map(|entry| *entry.key()).collect();
        channels.sort_unstable();
        channels
    }
}
