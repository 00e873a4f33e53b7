//! Credit flow control between the peer's window and the backend.
//!
//! Two philosophies meet here. The peer grants a session-wide transfer
//! window (session credit) and per-link credit; the backend bounds
//! unacknowledged deliveries per channel (prefetch) and per subscription
//! (credit). [`SessionCredit`] tracks the former and derives the latter;
//! [`negotiate_outcomes`] decides which settlement outcomes a link may use.

use log::debug;

use crate::{
    backend::{Backend, BackendError},
    error::{Condition, ProtocolError},
    frame::{FlowState, Source},
    link::OutgoingLink,
    settlement::Outcome,
};

/// Outcome applied when the peer names none.
pub const DEFAULT_OUTCOME: Outcome = Outcome::Released;

/// Session credit for outgoing transfers.
///
/// The credit is established by the first outgoing attach and reused by
/// later ones. It drops by one for every unsettled transfer sent and rises
/// by one for every settlement processed, so `credit + pending` stays equal
/// to the backend prefetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionCredit {
    available: u32,
    established: bool,
}

impl SessionCredit {
    /// Credit that has not been negotiated yet.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Transfers that may still be sent.
    #[must_use]
    pub fn available(&self) -> u32 { self.available }

    /// Adopt `requested` as the operating credit.
    ///
    /// Returns `true` if this call established the credit and `false` if an
    /// earlier attach already had, in which case nothing changes.
    pub fn establish(&mut self, requested: u32) -> bool {
        if self.established {
            return false;
        }
        self.available = requested;
        self.established = true;
        true
    }

    /// Replace the operating credit on an explicit peer request.
    pub fn adjust(&mut self, requested: u32) {
        self.available = requested;
        self.established = true;
    }

    /// Account for one unsettled transfer sent.
    ///
    /// Returns `false` when no credit was left; the backend prefetch should
    /// prevent this, so the transfer is still sent.
    pub fn consume(&mut self) -> bool {
        if let Some(next) = self.available.checked_sub(1) {
            self.available = next;
            true
        } else {
            false
        }
    }

    /// Account for `count` settlements.
    pub fn restore(&mut self, count: usize) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.available = self.available.saturating_add(count);
    }

    /// Backend prefetch matching this credit with `pending` transfers in flight.
    ///
    /// The backend reads a prefetch of zero as "unlimited", so the result is
    /// never below one.
    #[must_use]
    pub fn prefetch(&self, pending: usize) -> u32 {
        self.available
            .saturating_add(u32::try_from(pending).unwrap_or(u32::MAX))
            .max(1)
    }
}

/// Settlement outcomes negotiated for an outgoing link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkOutcomes {
    pub default: Outcome,
    pub supported: Vec<Outcome>,
    /// Deliveries need no backend acknowledgement.
    pub no_ack: bool,
}

/// Validate the outcomes requested by a source.
///
/// An absent default outcome means [`DEFAULT_OUTCOME`]; an absent outcome
/// list means every supported outcome. A link needs no acknowledgement
/// exactly when its default outcome is accepted and accepted is its only
/// outcome.
///
/// # Examples
///
/// ```
/// use amqp_bridge::{credit::negotiate_outcomes, frame::Source, settlement::Outcome};
///
/// let source = Source {
///     default_outcome: Some(Outcome::Accepted.to_symbol()),
///     outcomes: Some(vec![Outcome::Accepted.to_symbol()]),
///     ..Source::default()
/// };
/// let negotiated = negotiate_outcomes(Some(&source)).expect("supported outcomes");
/// assert!(negotiated.no_ack);
/// ```
///
/// # Errors
///
/// Returns a [`Condition::NotImplemented`] violation naming the first
/// unsupported outcome.
pub fn negotiate_outcomes(source: Option<&Source>) -> Result<LinkOutcomes, ProtocolError> {
    let unsupported = |err: crate::settlement::UnsupportedOutcome| {
        ProtocolError::new(Condition::NotImplemented, format!("outcomes not supported: {}", err.0))
    };
    let default = match source.and_then(|s| s.default_outcome.as_ref()) {
        Some(symbol) => Outcome::try_from(symbol).map_err(unsupported)?,
        None => DEFAULT_OUTCOME,
    };
    let supported = match source.and_then(|s| s.outcomes.as_ref()) {
        Some(symbols) => symbols
            .iter()
            .map(Outcome::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(unsupported)?,
        None => Outcome::ALL.to_vec(),
    };
    let no_ack = default == Outcome::Accepted && supported == [Outcome::Accepted];
    Ok(LinkOutcomes {
        default,
        supported,
        no_ack,
    })
}

/// Forward the peer's link credit for `link` to the backend.
///
/// Returns the backend's availability count, or `None` when the request
/// carried no link credit or the backend does not know the subscription
/// yet; a flow may race with link creation, so neither case is an error.
///
/// # Errors
///
/// Propagates backend failures.
pub async fn forward_link_credit<B>(
    backend: &mut B,
    link: &mut OutgoingLink,
    flow_state: &FlowState,
) -> Result<Option<u32>, BackendError>
where
    B: Backend + ?Sized,
{
    let Some(credit) = flow_state.link_credit else {
        return Ok(None);
    };
    let available = backend
        .set_credit(link.consumer_tag(), credit, flow_state.drain)
        .await?;
    match available {
        Some(count) => {
            link.set_link_credit(if flow_state.drain { 0 } else { credit });
            Ok(Some(count))
        }
        None => {
            debug!(
                "credit ignored for unknown subscription: consumer_tag={}, credit={credit}",
                link.consumer_tag()
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::frame::Symbol;

    fn source(default: Option<&str>, outcomes: Option<&[&str]>) -> Source {
        Source {
            default_outcome: default.map(Symbol::from),
            outcomes: outcomes.map(|list| list.iter().copied().map(Symbol::from).collect()),
            ..Source::default()
        }
    }

    #[test]
    fn absent_outcomes_default_to_released_with_all_supported() {
        let negotiated = negotiate_outcomes(None).expect("defaults");
        assert_eq!(negotiated.default, Outcome::Released);
        assert_eq!(negotiated.supported, Outcome::ALL.to_vec());
        assert!(!negotiated.no_ack);
    }

    #[rstest]
    #[case(Some("amqp:accepted:list"), Some(&["amqp:accepted:list"][..]), true)]
    #[case(Some("amqp:accepted:list"), None, false)]
    #[case(None, Some(&["amqp:accepted:list"][..]), false)]
    #[case(Some("amqp:accepted:list"), Some(&["amqp:accepted:list", "amqp:released:list"][..]), false)]
    fn no_ack_requires_accepted_only(
        #[case] default: Option<&str>,
        #[case] outcomes: Option<&[&str]>,
        #[case] no_ack: bool,
    ) {
        let negotiated = negotiate_outcomes(Some(&source(default, outcomes))).expect("supported");
        assert_eq!(negotiated.no_ack, no_ack);
    }

    #[rstest]
    #[case(Some("amqp:modified:list"), None)]
    #[case(None, Some(&["amqp:accepted:list", "amqp:modified:list"][..]))]
    fn unsupported_outcomes_are_not_implemented(
        #[case] default: Option<&str>,
        #[case] outcomes: Option<&[&str]>,
    ) {
        let err = negotiate_outcomes(Some(&source(default, outcomes))).expect_err("unsupported");
        assert_eq!(err.condition, Condition::NotImplemented);
        assert!(err.description.contains("amqp:modified:list"));
    }

    #[test]
    fn credit_is_established_once() {
        let mut credit = SessionCredit::new();
        assert!(credit.establish(10));
        assert!(!credit.establish(50));
        assert_eq!(credit.available(), 10);
        credit.adjust(4);
        assert_eq!(credit.available(), 4);
    }

    #[test]
    fn consume_and_restore_keep_prefetch_constant() {
        let mut credit = SessionCredit::new();
        credit.establish(3);
        assert!(credit.consume());
        assert!(credit.consume());
        assert_eq!(credit.prefetch(2), 3);
        credit.restore(2);
        assert_eq!(credit.available(), 3);
    }

    #[test]
    fn exhausted_credit_does_not_underflow() {
        let mut credit = SessionCredit::new();
        credit.establish(0);
        assert!(!credit.consume());
        assert_eq!(credit.available(), 0);
        assert_eq!(credit.prefetch(0), 1);
    }
}
