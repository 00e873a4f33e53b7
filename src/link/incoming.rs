//! Incoming links: the peer sends messages for publication.

use crate::address::ResolvedTarget;

/// State of a link on which the session is the receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingLink {
    name: String,
    exchange: String,
    routing_key: Option<String>,
    credit: u32,
    grant: u32,
}

impl IncomingLink {
    /// Describe a link publishing to `target`, granting `credit` transfers at a time.
    #[must_use]
    pub fn new(name: impl Into<String>, target: ResolvedTarget, credit: u32) -> Self {
        Self {
            name: name.into(),
            exchange: target.exchange,
            routing_key: target.routing_key,
            credit,
            grant: credit,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    #[must_use]
    pub fn exchange(&self) -> &str { &self.exchange }

    /// Fixed routing key, or `None` when messages route by subject.
    #[must_use]
    pub fn routing_key(&self) -> Option<&str> { self.routing_key.as_deref() }

    /// Pick the routing key for a message with `subject`.
    #[must_use]
    pub fn route<'a>(&'a self, subject: Option<&'a str>) -> Option<&'a str> {
        self.routing_key().or(subject)
    }

    /// Transfers the peer may still send before the next grant.
    #[must_use]
    pub fn credit(&self) -> u32 { self.credit }

    /// Account for one received transfer.
    ///
    /// Returns the credit to re-grant once the peer has used up the last
    /// grant, or `None` while credit remains. A zero grant is never renewed.
    pub fn spend(&mut self) -> Option<u32> {
        self.credit = self.credit.saturating_sub(1);
        if self.credit == 0 && self.grant > 0 {
            self.credit = self.grant;
            Some(self.grant)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(routing_key: Option<&str>) -> ResolvedTarget {
        ResolvedTarget {
            exchange: String::new(),
            routing_key: routing_key.map(str::to_owned),
            address: "/queue".into(),
        }
    }

    #[test]
    fn fixed_routing_key_wins_over_subject() {
        let link = IncomingLink::new("l", target(Some("orders")), 10);
        assert_eq!(link.route(Some("other")), Some("orders"));
    }

    #[test]
    fn subject_routes_when_key_absent() {
        let link = IncomingLink::new("l", target(None), 10);
        assert_eq!(link.route(Some("other")), Some("other"));
        assert_eq!(link.route(None), None);
    }

    #[test]
    fn credit_is_regranted_when_exhausted() {
        let mut link = IncomingLink::new("l", target(None), 2);
        assert_eq!(link.spend(), None);
        assert_eq!(link.spend(), Some(2));
        assert_eq!(link.credit(), 2);
    }
}
