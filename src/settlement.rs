//! Settlement window reconciling transfer-id ranges with per-message acks.
//!
//! The peer settles outgoing transfers either explicitly, by naming inclusive
//! `[first, last]` ranges in a disposition, or implicitly, by reporting a new
//! low-water-mark in a flow frame. The backend only understands one
//! acknowledgement per delivery tag. [`SettlementWindow`] keeps the unsettled
//! transfers in an ordered map so both styles reduce to range walks, and
//! returns the backend settlements to perform rather than performing them.
//!
//! Invariants maintained by the window:
//!
//! - transfer-ids are handed out as 0, 1, 2, … without gaps;
//! - the low-water-mark equals the smallest pending id, or the next
//!   transfer-id when nothing is pending;
//! - the low-water-mark never decreases.

use std::{collections::BTreeMap, fmt};

use thiserror::Error;

use crate::{
    backend::DeliveryTag,
    frame::{Handle, Symbol, TransferId},
};

/// Settlement outcomes the bridge can express on the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Processed; acknowledged on the backend.
    Accepted,
    /// Unprocessable; rejected without requeue.
    Rejected,
    /// Not processed; rejected with requeue.
    Released,
}

impl Outcome {
    /// Every outcome the bridge supports, in canonical order.
    pub const ALL: [Self; 3] = [Self::Accepted, Self::Rejected, Self::Released];

    /// The AMQP descriptor symbol of the outcome.
    #[must_use]
    pub fn as_symbol_str(self) -> &'static str {
        match self {
            Self::Accepted => "amqp:accepted:list",
            Self::Rejected => "amqp:rejected:list",
            Self::Released => "amqp:released:list",
        }
    }

    /// The descriptor as a frame [`Symbol`].
    #[must_use]
    pub fn to_symbol(self) -> Symbol { Symbol::from(self.as_symbol_str()) }

    /// Label used for metrics and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Released => "released",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

/// An outcome descriptor the bridge cannot act on.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unsupported outcome {0}")]
pub struct UnsupportedOutcome(pub Symbol);

impl TryFrom<&Symbol> for Outcome {
    type Error = UnsupportedOutcome;

    fn try_from(symbol: &Symbol) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|outcome| outcome.as_symbol_str() == symbol.as_str())
            .ok_or_else(|| UnsupportedOutcome(symbol.clone()))
    }
}

/// Bookkeeping for one unsettled outgoing transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingTransfer {
    /// Outgoing link the transfer was sent on.
    pub handle: Handle,
    pub delivery_tag: DeliveryTag,
    /// Outcome applied when the transfer is settled implicitly.
    pub expected: Outcome,
}

/// A transfer removed from the window, with the backend action it needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settled {
    pub transfer_id: TransferId,
    pub delivery_tag: DeliveryTag,
    pub outcome: Outcome,
}

/// Errors raised when the peer's view of the window is inconsistent.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    /// The peer reported a low-water-mark below the current one.
    #[error("attempt to roll back low-water-mark from {current} to {requested}")]
    Rollback {
        current: TransferId,
        requested: TransferId,
    },
    /// The peer reported a low-water-mark beyond any transfer sent.
    #[error("low-water-mark {requested} is beyond next transfer-id {next}")]
    BeyondNext {
        next: TransferId,
        requested: TransferId,
    },
}

/// Ordered window of unsettled outgoing transfers.
///
/// # Examples
///
/// ```
/// use amqp_bridge::{
///     backend::DeliveryTag,
///     frame::{Handle, TransferId},
///     settlement::{Outcome, PendingTransfer, SettlementWindow},
/// };
///
/// let mut window = SettlementWindow::new();
/// for tag in 1..=3 {
///     window.record(PendingTransfer {
///         handle: Handle::new(0),
///         delivery_tag: DeliveryTag::new(tag),
///         expected: Outcome::Released,
///     });
/// }
/// let settled = window.settle_range(TransferId::new(0), TransferId::new(1), Some(Outcome::Accepted));
/// assert_eq!(settled.len(), 2);
/// window.refresh_low_water_mark();
/// assert_eq!(window.low_water_mark(), TransferId::new(2));
/// ```
#[derive(Debug, Default)]
pub struct SettlementWindow {
    next_transfer_id: TransferId,
    low_water_mark: TransferId,
    pending: BTreeMap<TransferId, PendingTransfer>,
}

impl SettlementWindow {
    /// Create an empty window starting at transfer-id 0.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Id the next transfer will receive.
    #[must_use]
    pub fn next_transfer_id(&self) -> TransferId { self.next_transfer_id }

    /// Smallest transfer-id not yet known to be settled.
    #[must_use]
    pub fn low_water_mark(&self) -> TransferId { self.low_water_mark }

    /// Number of unsettled transfers.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.pending.len() }

    /// Look up an unsettled transfer.
    #[must_use]
    pub fn pending(&self, id: TransferId) -> Option<&PendingTransfer> { self.pending.get(&id) }

    /// Pending transfers in `[max(lwm, first), last]`, in ascending order.
    pub fn pending_range(
        &self,
        first: TransferId,
        last: TransferId,
    ) -> impl Iterator<Item = (TransferId, &PendingTransfer)> + '_ {
        let start = first.max(self.low_water_mark);
        (start <= last)
            .then(|| self.pending.range(start..=last))
            .into_iter()
            .flatten()
            .map(|(id, pending)| (*id, pending))
    }

    fn assign(&mut self) -> TransferId {
        let id = self.next_transfer_id;
        self.next_transfer_id = id.next();
        id
    }

    /// Assign the next transfer-id to an unsettled transfer.
    pub fn record(&mut self, pending: PendingTransfer) -> TransferId {
        let id = self.assign();
        self.pending.insert(id, pending);
        self.refresh_low_water_mark();
        id
    }

    /// Assign the next transfer-id to a transfer sent pre-settled.
    pub fn record_settled(&mut self) -> TransferId {
        let id = self.assign();
        self.refresh_low_water_mark();
        id
    }

    /// Remove every pending transfer in `[max(lwm, first), last]`.
    ///
    /// `outcome` overrides each entry's expected outcome when present. A
    /// range ending below the low-water-mark names transfers that are already
    /// forgotten and settles nothing. The low-water-mark is left untouched;
    /// call [`refresh_low_water_mark`](Self::refresh_low_water_mark) once all
    /// ranges of a disposition are processed.
    pub fn settle_range(
        &mut self,
        first: TransferId,
        last: TransferId,
        outcome: Option<Outcome>,
    ) -> Vec<Settled> {
        let ids: Vec<TransferId> = self.pending_range(first, last).map(|(id, _)| id).collect();
        ids.into_iter()
            .filter_map(|id| self.take(id, outcome))
            .collect()
    }

    /// Settle every pending transfer below `requested` with its expected
    /// outcome, in ascending transfer-id order.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::Rollback`] when `requested` is below the current
    /// low-water-mark and [`WindowError::BeyondNext`] when it exceeds the next
    /// transfer-id. The window is unchanged in both cases.
    pub fn advance_to(&mut self, requested: TransferId) -> Result<Vec<Settled>, WindowError> {
        if requested < self.low_water_mark {
            return Err(WindowError::Rollback {
                current: self.low_water_mark,
                requested,
            });
        }
        if requested > self.next_transfer_id {
            return Err(WindowError::BeyondNext {
                next: self.next_transfer_id,
                requested,
            });
        }
        let mut settled = Vec::new();
        while let Some((&id, _)) = self.pending.first_key_value() {
            if id >= requested {
                break;
            }
            if let Some(entry) = self.take(id, None) {
                settled.push(entry);
            }
            self.refresh_low_water_mark();
        }
        Ok(settled)
    }

    /// Recompute the low-water-mark from the pending map.
    pub fn refresh_low_water_mark(&mut self) {
        let candidate = self
            .pending
            .first_key_value()
            .map_or(self.next_transfer_id, |(id, _)| *id);
        debug_assert!(
            candidate >= self.low_water_mark,
            "low-water-mark regressed: current={}, candidate={candidate}",
            self.low_water_mark
        );
        self.low_water_mark = self.low_water_mark.max(candidate);
    }

    fn take(&mut self, id: TransferId, outcome: Option<Outcome>) -> Option<Settled> {
        self.pending.remove(&id).map(|pending| Settled {
            transfer_id: id,
            delivery_tag: pending.delivery_tag,
            outcome: outcome.unwrap_or(pending.expected),
        })
    }
}

#[cfg(test)]
mod tests;
