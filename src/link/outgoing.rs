//! Outgoing links: the session sends backend deliveries to the peer.

use std::num::NonZeroU32;

use crate::{backend::ConsumerTag, frame::Handle, settlement::Outcome};

/// State of a link on which the session is the sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingLink {
    handle: Handle,
    queue: String,
    consumer_tag: ConsumerTag,
    transfer_count: u64,
    transfer_unit: Option<NonZeroU32>,
    no_ack: bool,
    default_outcome: Outcome,
    supported_outcomes: Vec<Outcome>,
    link_credit: Option<u32>,
}

impl OutgoingLink {
    /// Describe a link consuming `queue` on `handle` under `consumer_tag`.
    #[must_use]
    pub fn new(
        handle: Handle,
        consumer_tag: ConsumerTag,
        queue: impl Into<String>,
        transfer_unit: Option<u32>,
        default_outcome: Outcome,
        supported_outcomes: Vec<Outcome>,
        no_ack: bool,
    ) -> Self {
        Self {
            handle,
            queue: queue.into(),
            consumer_tag,
            transfer_count: 0,
            transfer_unit: transfer_unit.and_then(NonZeroU32::new),
            no_ack,
            default_outcome,
            supported_outcomes,
            link_credit: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle { self.handle }

    /// Backend queue the link consumes.
    #[must_use]
    pub fn queue(&self) -> &str { &self.queue }

    #[must_use]
    pub fn consumer_tag(&self) -> &ConsumerTag { &self.consumer_tag }

    /// Cumulative transfer units sent on the link.
    #[must_use]
    pub fn transfer_count(&self) -> u64 { self.transfer_count }

    /// Returns `true` when deliveries are sent pre-settled.
    #[must_use]
    pub fn no_ack(&self) -> bool { self.no_ack }

    /// Outcome applied to transfers settled implicitly.
    #[must_use]
    pub fn default_outcome(&self) -> Outcome { self.default_outcome }

    /// Returns `true` if the peer may settle with `outcome`.
    #[must_use]
    pub fn supports(&self, outcome: Outcome) -> bool { self.supported_outcomes.contains(&outcome) }

    /// Link credit last granted by the peer.
    #[must_use]
    pub fn link_credit(&self) -> Option<u32> { self.link_credit }

    pub fn set_link_credit(&mut self, credit: u32) { self.link_credit = Some(credit); }

    /// Size of a message body in transfer units.
    ///
    /// Without a declared unit every message counts as one.
    #[must_use]
    pub fn transfer_size(&self, body_len: usize) -> u64 {
        let len = u64::try_from(body_len).unwrap_or(u64::MAX);
        self.transfer_unit
            .map_or(1, |unit| len.div_ceil(u64::from(unit.get())).max(1))
    }

    /// Account for a message of `body_len` bytes sent on the link.
    ///
    /// Returns the updated transfer count.
    pub fn record_transfer(&mut self, body_len: usize) -> u64 {
        self.transfer_count = self.transfer_count.saturating_add(self.transfer_size(body_len));
        if let Some(credit) = self.link_credit.as_mut() {
            *credit = credit.saturating_sub(1);
        }
        self.transfer_count
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn link(unit: Option<u32>) -> OutgoingLink {
        OutgoingLink::new(
            Handle::new(1),
            ConsumerTag::for_link(Handle::new(1), 3),
            "q",
            unit,
            Outcome::Released,
            Outcome::ALL.to_vec(),
            false,
        )
    }

    #[rstest]
    #[case(None, 0, 1)]
    #[case(None, 10_000, 1)]
    #[case(Some(0), 500, 1)]
    #[case(Some(100), 0, 1)]
    #[case(Some(100), 100, 1)]
    #[case(Some(100), 101, 2)]
    #[case(Some(100), 1_000, 10)]
    fn transfer_size_rounds_up(#[case] unit: Option<u32>, #[case] len: usize, #[case] expected: u64) {
        assert_eq!(link(unit).transfer_size(len), expected);
    }

    #[test]
    fn recording_transfers_accumulates_count_and_spends_credit() {
        let mut link = link(Some(4));
        link.set_link_credit(2);
        assert_eq!(link.record_transfer(5), 2);
        assert_eq!(link.record_transfer(1), 3);
        assert_eq!(link.record_transfer(1), 4);
        assert_eq!(link.link_credit(), Some(0));
    }

    #[test]
    fn consumer_tag_names_handle() {
        assert_eq!(link(None).consumer_tag().handle(), Some(Handle::new(1)));
    }
}
