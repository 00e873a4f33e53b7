//! Inputs and outputs of the session state machine.

use crate::{backend::Delivery, error::ProtocolError, frame::Frame};

/// One entry of a session's inbound queue.
///
/// Peer frames and backend notifications share the queue so the session
/// sees them in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A decoded frame from the peer.
    Frame(Frame),
    /// A message delivered to one of the session's subscriptions.
    Delivery(Delivery),
    /// The backend channel failed.
    BackendFailed(String),
}

impl From<Frame> for SessionEvent {
    fn from(frame: Frame) -> Self { Self::Frame(frame) }
}

/// How a session terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionExit {
    /// The peer ended the session.
    Ended,
    /// The peer violated the protocol; `end` carried the error.
    Violated(ProtocolError),
    /// The backend failed; the session stopped without an `end`.
    Failed(String),
    /// The connection shut the session down.
    Cancelled,
    /// The outbound frame stream went away.
    Disconnected,
    /// The session task panicked.
    Panicked(String),
}

impl SessionExit {
    /// Returns `true` for terminations the connection must answer with an
    /// `internal-error` end on the session's channel.
    #[must_use]
    pub fn is_abnormal(&self) -> bool { matches!(self, Self::Failed(_) | Self::Panicked(_)) }
}

/// Result of handling one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Send `frames` and keep running.
    Continue(Vec<Frame>),
    /// Send `frames`, tear down and stop.
    Close(Vec<Frame>, SessionExit),
}

impl Step {
    /// Frames to send for this step.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        match self {
            Self::Continue(frames) | Self::Close(frames, _) => frames,
        }
    }

    /// The exit this step ends the session with, if any.
    #[must_use]
    pub fn exit(&self) -> Option<&SessionExit> {
        match self {
            Self::Continue(_) => None,
            Self::Close(_, exit) => Some(exit),
        }
    }
}
