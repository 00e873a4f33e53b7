//! Decoded session-level performatives.
//!
//! The byte-level codec lives outside this crate. It hands the session a
//! [`Frame`], a closed tagged union, so every handler is selected by an
//! exhaustive `match`. Descriptors the codec recognises but the session does
//! not implement arrive as [`Frame::Unsupported`] and are dropped by the
//! dispatcher.

mod types;

use bytes::Bytes;
use derive_more::From;
pub use types::{
    DistributionMode,
    ErrorCondition,
    Extent,
    FlowState,
    Fragment,
    Handle,
    Linkage,
    Role,
    SectionCode,
    Source,
    Symbol,
    Target,
    TransferId,
};

/// Open a session on a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Begin {
    /// Channel of the peer's session, present on replies.
    pub remote_channel: Option<u16>,
}

/// Attach a link to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attach {
    pub name: String,
    pub handle: Handle,
    /// Role of the endpoint sending this attach.
    pub role: Role,
    /// Absent on a reply that refuses the link.
    pub linkage: Option<Linkage>,
    pub flow_state: Option<FlowState>,
    /// Size in bytes of one transfer unit for transfer-count accounting.
    pub transfer_unit: Option<u32>,
}

/// Deliver a message on a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub handle: Handle,
    pub transfer_id: TransferId,
    pub delivery_tag: Bytes,
    pub settled: bool,
    pub flow_state: Option<FlowState>,
    pub fragments: Vec<Fragment>,
}

/// Update flow-control state for the session or one link.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Flow {
    /// Link the flow applies to; absent for session-only updates.
    pub handle: Option<Handle>,
    pub flow_state: FlowState,
}

/// Report settlement for ranges of transfers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disposition {
    /// Role of the endpoint sending the disposition.
    pub role: Role,
    pub extents: Vec<Extent>,
}

/// Detach a link from the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Detach {
    pub handle: Handle,
    pub error: Option<ErrorCondition>,
}

/// End the session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct End {
    pub error: Option<ErrorCondition>,
}

/// A performative this session layer does not handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unsupported {
    pub descriptor: Symbol,
}

/// Decoded control frame exchanged with the peer.
#[derive(Clone, Debug, PartialEq, Eq, From)]
pub enum Frame {
    Begin(Begin),
    Attach(Attach),
    Transfer(Transfer),
    Flow(Flow),
    Disposition(Disposition),
    Detach(Detach),
    End(End),
    Unsupported(Unsupported),
}

impl Frame {
    /// Short name of the performative, used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Begin(_) => "begin",
            Self::Attach(_) => "attach",
            Self::Transfer(_) => "transfer",
            Self::Flow(_) => "flow",
            Self::Disposition(_) => "disposition",
            Self::Detach(_) => "detach",
            Self::End(_) => "end",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// A frame addressed to a channel of the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundFrame {
    pub channel: u16,
    pub frame: Frame,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Frame::Begin(Begin::default()), "begin")]
    #[case(Frame::End(End::default()), "end")]
    #[case(Frame::Flow(Flow::default()), "flow")]
    #[case(Frame::Unsupported(Unsupported { descriptor: Symbol::from("amqp:open:list") }), "unsupported")]
    fn kind_names_performative(#[case] frame: Frame, #[case] expected: &str) {
        assert_eq!(frame.kind(), expected);
    }

    #[test]
    fn performatives_convert_into_frame() {
        let frame: Frame = Detach {
            handle: Handle::new(4),
            error: None,
        }
        .into();
        assert!(matches!(frame, Frame::Detach(Detach { handle, .. }) if handle == Handle::new(4)));
    }
}
