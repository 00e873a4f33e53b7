//! Field types shared by the session performatives.
//!
//! These mirror the decoded shape produced by the external frame codec:
//! numbers are already widened, optional fields are `Option`, and symbolic
//! descriptors are carried as [`Symbol`] so unsupported values can be
//! diagnosed rather than rejected by the decoder.

use bytes::Bytes;
use derive_more::{Display, From};

/// Session-scoped identifier naming a link.
///
/// # Examples
///
/// ```
/// use amqp_bridge::frame::Handle;
/// let handle = Handle::new(3);
/// assert_eq!(handle.get(), 3);
/// assert_eq!(handle.to_string(), "3");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
#[display("{_0}")]
pub struct Handle(u32);

impl Handle {
    /// Construct a handle from its numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Return the underlying numeric value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }
}

/// Session-scoped, monotonically assigned transfer number.
///
/// # Examples
///
/// ```
/// use amqp_bridge::frame::TransferId;
/// let id = TransferId::zero();
/// assert_eq!(id.next(), TransferId::new(1));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
#[display("{_0}")]
pub struct TransferId(u64);

impl TransferId {
    /// Construct a transfer-id from a `u64` value.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// The first transfer-id assigned by a session.
    #[must_use]
    pub const fn zero() -> Self { Self(0) }

    /// Return the underlying numeric value.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }

    /// Return the id following this one.
    ///
    /// Transfer-ids are 64-bit so a session cannot exhaust them in practice;
    /// the increment saturates rather than wrapping.
    #[must_use]
    pub const fn next(self) -> Self { Self(self.0.saturating_add(1)) }
}

/// Symbolic descriptor such as an outcome name or an error condition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{_0}")]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from any string-like value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Borrow the symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self { Self(value) }
}

/// Role of the endpoint that sent a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The endpoint sends transfers on the link.
    Sender,
    /// The endpoint receives transfers on the link.
    Receiver,
}

/// How messages are taken from a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DistributionMode {
    /// Messages are removed from the node once delivered.
    Move,
    /// Each link receives its own copy of the messages.
    Copy,
}

/// Source terminus of a link.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Source {
    /// Address of the node messages are taken from.
    pub address: Option<String>,
    /// Request a server-assigned address.
    pub dynamic: bool,
    /// Distribution mode reported by the source owner.
    pub distribution_mode: Option<DistributionMode>,
    /// Outcome applied to transfers the receiver never settles explicitly.
    pub default_outcome: Option<Symbol>,
    /// Outcomes the receiver may choose on this link.
    pub outcomes: Option<Vec<Symbol>>,
}

/// Target terminus of a link.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Target {
    /// Address of the node messages are delivered to.
    pub address: Option<String>,
    /// Request a server-assigned address.
    pub dynamic: bool,
}

/// Source and target describing both ends of a link.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Linkage {
    pub source: Option<Source>,
    pub target: Option<Target>,
}

/// Snapshot of the flow-control window carried by attach, transfer and flow.
///
/// Every field is optional on the wire; the session fills the ones it owns
/// when emitting frames and reads whichever the peer supplied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowState {
    /// Smallest transfer-id not yet known to be settled.
    pub unsettled_lwm: Option<TransferId>,
    /// Transfers the sender may still issue on the session.
    pub session_credit: Option<u32>,
    /// Cumulative transfer units sent on the link.
    pub transfer_count: Option<u64>,
    /// Transfers the receiver is willing to accept on the link.
    pub link_credit: Option<u32>,
    /// Messages available at the sender for the link.
    pub available: Option<u32>,
    /// Ask the sender to use all credit and then stop.
    pub drain: bool,
}

/// Inclusive range of transfer-ids settled by a disposition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extent {
    pub first: TransferId,
    pub last: TransferId,
    pub settled: bool,
    /// Outcome descriptor; absent means "the link's expected outcome".
    pub outcome: Option<Symbol>,
}

impl Extent {
    /// Build an extent covering a single transfer.
    #[must_use]
    pub fn single(id: TransferId, settled: bool, outcome: Option<Symbol>) -> Self {
        Self {
            first: id,
            last: id,
            settled,
            outcome,
        }
    }
}

/// Structured error carried by `end` and `detach`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCondition {
    pub condition: Symbol,
    pub description: Option<String>,
}

/// Kind of message section a fragment belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SectionCode {
    Header,
    Properties,
    ApplicationProperties,
    Data,
}

/// Slice of one encoded message section carried by a transfer.
///
/// A section may be split over several fragments; `first` and `last` delimit
/// it. Fragments of different sections never interleave.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub first: bool,
    pub last: bool,
    pub section: SectionCode,
    pub payload: Bytes,
}

impl Fragment {
    /// A fragment holding an entire section.
    #[must_use]
    pub fn whole(section: SectionCode, payload: impl Into<Bytes>) -> Self {
        Self {
            first: true,
            last: true,
            section,
            payload: payload.into(),
        }
    }
}
