//! Handle-indexed registry of a session's links.
//!
//! Handles are chosen by the peer and scoped to the session. A handle names
//! at most one link at a time, in one direction; detaching frees it.
//! Each outgoing attach subscribes under a fresh consumer tag, so a handle
//! reused after detach never collides with its earlier subscription.

use std::collections::BTreeMap;

use super::{IncomingLink, OutgoingLink};
use crate::{backend::ConsumerTag, frame::Handle};

/// Incoming and outgoing links keyed by handle.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    incoming: BTreeMap<Handle, IncomingLink>,
    outgoing: BTreeMap<Handle, OutgoingLink>,
    subscriptions: u64,
}

impl LinkRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Returns `true` if `handle` names a link in either direction.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.incoming.contains_key(&handle) || self.outgoing.contains_key(&handle)
    }

    pub fn insert_incoming(&mut self, handle: Handle, link: IncomingLink) {
        self.incoming.insert(handle, link);
    }

    /// Allocate the consumer tag for a new subscription on `handle`.
    pub fn next_consumer_tag(&mut self, handle: Handle) -> ConsumerTag {
        self.subscriptions += 1;
        ConsumerTag::for_link(handle, self.subscriptions)
    }

    pub fn insert_outgoing(&mut self, link: OutgoingLink) { self.outgoing.insert(link.handle(), link); }

    #[must_use]
    pub fn incoming(&self, handle: Handle) -> Option<&IncomingLink> { self.incoming.get(&handle) }

    pub fn incoming_mut(&mut self, handle: Handle) -> Option<&mut IncomingLink> {
        self.incoming.get_mut(&handle)
    }

    #[must_use]
    pub fn outgoing(&self, handle: Handle) -> Option<&OutgoingLink> { self.outgoing.get(&handle) }

    pub fn outgoing_mut(&mut self, handle: Handle) -> Option<&mut OutgoingLink> {
        self.outgoing.get_mut(&handle)
    }

    /// Forget whatever link `handle` names.
    ///
    /// Returns `true` if a link was removed. Detaching an unknown handle is
    /// not an error.
    pub fn detach(&mut self, handle: Handle) -> bool {
        let incoming = self.incoming.remove(&handle).is_some();
        let outgoing = self.outgoing.remove(&handle).is_some();
        incoming || outgoing
    }

    /// Number of registered links in both directions.
    #[must_use]
    pub fn len(&self) -> usize { self.incoming.len() + self.outgoing.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Remove every link, returning the consumer tags of the outgoing ones.
    pub fn drain_consumer_tags(&mut self) -> Vec<ConsumerTag> {
        self.incoming.clear();
        std::mem::take(&mut self.outgoing)
            .into_values()
            .map(|link| link.consumer_tag().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{address::ResolvedTarget, settlement::Outcome};

    #[fixture]
    fn registry() -> LinkRegistry {
        let mut registry = LinkRegistry::new();
        registry.insert_incoming(
            Handle::new(0),
            IncomingLink::new(
                "in",
                ResolvedTarget {
                    exchange: String::new(),
                    routing_key: None,
                    address: "/queue".into(),
                },
                10,
            ),
        );
        for handle in [1, 2].map(Handle::new) {
            let tag = registry.next_consumer_tag(handle);
            registry.insert_outgoing(OutgoingLink::new(
                handle,
                tag,
                "q",
                None,
                Outcome::Released,
                Outcome::ALL.to_vec(),
                false,
            ));
        }
        registry
    }

    #[rstest]
    fn detach_is_idempotent(mut registry: LinkRegistry) {
        assert!(registry.detach(Handle::new(1)));
        assert!(!registry.detach(Handle::new(1)));
        assert!(!registry.detach(Handle::new(9)));
        assert_eq!(registry.len(), 2);
    }

    #[rstest]
    fn drain_returns_outgoing_tags(mut registry: LinkRegistry) {
        let tags: Vec<String> = registry
            .drain_consumer_tags()
            .iter()
            .map(|tag| tag.as_str().to_owned())
            .collect();
        assert_eq!(tags, vec!["ctag-1-1", "ctag-2-2"]);
        assert!(registry.is_empty());
    }

    #[rstest]
    fn reattached_handle_gets_fresh_consumer_tag(mut registry: LinkRegistry) {
        let first = registry
            .outgoing(Handle::new(1))
            .map(|link| link.consumer_tag().clone());
        registry.detach(Handle::new(1));
        let second = registry.next_consumer_tag(Handle::new(1));
        assert_ne!(first.as_ref(), Some(&second));
        assert_eq!(second.handle(), Some(Handle::new(1)));
    }

    #[rstest]
    fn lookups_respect_direction(registry: LinkRegistry) {
        assert!(registry.incoming(Handle::new(0)).is_some());
        assert!(registry.outgoing(Handle::new(0)).is_none());
        assert!(registry.contains(Handle::new(2)));
    }
}
