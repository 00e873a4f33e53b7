//! Canonical error and result types for the crate.
//!
//! Frame handlers return [`SessionError`]. Its `Protocol` variant is the
//! single path by which a handler asks the dispatcher to end the session with
//! an error condition; its `Backend` variant is an abnormal termination that
//! is reported to the owning connection instead.

use std::fmt;

use thiserror::Error;

use crate::{
    backend::BackendError,
    frame::{ErrorCondition, Symbol},
};

/// Error conditions the session reports to the peer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    /// A referenced node does not exist.
    NotFound,
    /// The peer asked for a feature this bridge does not provide.
    NotImplemented,
    /// The frame is not valid in the current session state.
    IllegalState,
    /// A field carried a value outside its domain.
    InvalidField,
    /// A message could not be reassembled.
    DecodeError,
    /// A reassembled message exceeded the configured maximum size.
    MessageSizeExceeded,
    /// The bridge failed internally.
    InternalError,
}

impl Condition {
    /// The AMQP error symbol for this condition.
    #[must_use]
    pub fn as_symbol_str(self) -> &'static str {
        match self {
            Self::NotFound => "amqp:not-found",
            Self::NotImplemented => "amqp:not-implemented",
            Self::IllegalState => "amqp:illegal-state",
            Self::InvalidField => "amqp:invalid-field",
            Self::DecodeError => "amqp:decode-error",
            Self::MessageSizeExceeded => "amqp:link:message-size-exceeded",
            Self::InternalError => "amqp:internal-error",
        }
    }

    /// Build an [`ErrorCondition`] frame field for this condition.
    #[must_use]
    pub fn with_description(self, description: impl Into<String>) -> ErrorCondition {
        ErrorCondition {
            condition: Symbol::from(self.as_symbol_str()),
            description: Some(description.into()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_symbol_str()) }
}

/// A protocol violation that ends the session.
///
/// # Examples
///
/// ```
/// use amqp_bridge::error::{Condition, ProtocolError};
///
/// let err = ProtocolError::new(Condition::IllegalState, "unknown handle 7");
/// assert_eq!(err.to_string(), "amqp:illegal-state: unknown handle 7");
/// assert_eq!(err.to_error_condition().condition.as_str(), "amqp:illegal-state");
/// ```
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{condition}: {description}")]
pub struct ProtocolError {
    pub condition: Condition,
    pub description: String,
}

impl ProtocolError {
    /// Create a violation with the given condition and description.
    #[must_use]
    pub fn new(condition: Condition, description: impl Into<String>) -> Self {
        Self {
            condition,
            description: description.into(),
        }
    }

    /// Render the violation as the error carried by an `end` frame.
    #[must_use]
    pub fn to_error_condition(&self) -> ErrorCondition {
        self.condition.with_description(self.description.clone())
    }
}

/// Errors returned by session frame handlers.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer violated the protocol; the session ends with a condition.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    /// The backend channel failed; the session terminates abnormally.
    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),
}

impl SessionError {
    /// Shorthand for a protocol violation.
    #[must_use]
    pub fn protocol(condition: Condition, description: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::new(condition, description))
    }
}

/// Result alias used by frame handlers.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Condition::NotFound, "amqp:not-found")]
    #[case(Condition::NotImplemented, "amqp:not-implemented")]
    #[case(Condition::MessageSizeExceeded, "amqp:link:message-size-exceeded")]
    fn condition_symbols(#[case] condition: Condition, #[case] symbol: &str) {
        assert_eq!(condition.as_symbol_str(), symbol);
        assert_eq!(condition.to_string(), symbol);
    }

    #[test]
    fn backend_errors_are_not_protocol_violations() {
        let err = SessionError::from(BackendError::ChannelClosed("gone".into()));
        assert!(matches!(err, SessionError::Backend(_)));
        assert_eq!(err.to_string(), "backend failure: backend channel closed: gone");
    }
}
