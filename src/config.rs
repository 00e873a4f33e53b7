//! Session configuration.
//!
//! [`SessionConfig`] holds the limits a session applies where the peer
//! leaves a value open. Build one with [`SessionConfig::builder`]; the
//! builder validates the combination before any session starts.

use std::num::NonZeroUsize;

use thiserror::Error;

/// Session credit used when the first outgoing attach requests none.
pub const DEFAULT_SESSION_CREDIT: u32 = 100;
/// Credit granted to each incoming link.
pub const DEFAULT_INCOMING_LINK_CREDIT: u32 = 100;
/// Largest fragment payload emitted on outgoing transfers.
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 64 * 1024;
/// Largest message accepted on incoming transfers.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Errors returned when building a [`SessionConfig`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A size limit was zero.
    #[error("invalid {field}; must be >= 1")]
    ZeroSize { field: &'static str },
    /// Incoming links would never be allowed to send.
    #[error("invalid incoming link credit 0; must be >= 1")]
    ZeroIncomingCredit,
    /// Fragments could never be filled.
    #[error("max fragment size {fragment} exceeds max message size {message}")]
    FragmentExceedsMessage { fragment: usize, message: usize },
}

/// Limits applied by every session of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    default_session_credit: u32,
    incoming_link_credit: u32,
    max_fragment_size: NonZeroUsize,
    max_message_size: NonZeroUsize,
}

impl SessionConfig {
    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> SessionConfigBuilder { SessionConfigBuilder::default() }

    #[must_use]
    pub fn default_session_credit(&self) -> u32 { self.default_session_credit }

    #[must_use]
    pub fn incoming_link_credit(&self) -> u32 { self.incoming_link_credit }

    #[must_use]
    pub fn max_fragment_size(&self) -> NonZeroUsize { self.max_fragment_size }

    #[must_use]
    pub fn max_message_size(&self) -> NonZeroUsize { self.max_message_size }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_session_credit: DEFAULT_SESSION_CREDIT,
            incoming_link_credit: DEFAULT_INCOMING_LINK_CREDIT,
            max_fragment_size: NonZeroUsize::new(DEFAULT_MAX_FRAGMENT_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
            max_message_size: NonZeroUsize::new(DEFAULT_MAX_MESSAGE_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Builder for [`SessionConfig`].
///
/// # Examples
///
/// ```
/// use amqp_bridge::config::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .default_session_credit(10)
///     .max_fragment_size(512)
///     .build()
///     .expect("valid configuration");
/// assert_eq!(config.default_session_credit(), 10);
/// assert_eq!(config.max_fragment_size().get(), 512);
///
/// assert!(SessionConfig::builder().max_message_size(0).build().is_err());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct SessionConfigBuilder {
    default_session_credit: u32,
    incoming_link_credit: u32,
    max_fragment_size: usize,
    max_message_size: usize,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            default_session_credit: DEFAULT_SESSION_CREDIT,
            incoming_link_credit: DEFAULT_INCOMING_LINK_CREDIT,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl SessionConfigBuilder {
    /// Session credit adopted when the first outgoing attach carries none.
    #[must_use]
    pub fn default_session_credit(mut self, credit: u32) -> Self {
        self.default_session_credit = credit;
        self
    }

    /// Credit granted to each incoming link and re-granted when exhausted.
    #[must_use]
    pub fn incoming_link_credit(mut self, credit: u32) -> Self {
        self.incoming_link_credit = credit;
        self
    }

    /// Largest fragment payload, in bytes, on outgoing transfers.
    #[must_use]
    pub fn max_fragment_size(mut self, size: usize) -> Self {
        self.max_fragment_size = size;
        self
    }

    /// Largest reassembled message, in bytes, on incoming transfers.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroSize`] if either size limit is zero,
    /// [`ConfigError::ZeroIncomingCredit`] if incoming links would get no
    /// credit and [`ConfigError::FragmentExceedsMessage`] if a fragment may be
    /// larger than a message.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let max_fragment_size = NonZeroUsize::new(self.max_fragment_size).ok_or(
            ConfigError::ZeroSize {
                field: "max fragment size",
            },
        )?;
        let max_message_size = NonZeroUsize::new(self.max_message_size).ok_or(
            ConfigError::ZeroSize {
                field: "max message size",
            },
        )?;
        if self.incoming_link_credit == 0 {
            return Err(ConfigError::ZeroIncomingCredit);
        }
        if max_fragment_size > max_message_size {
            return Err(ConfigError::FragmentExceedsMessage {
                fragment: max_fragment_size.get(),
                message: max_message_size.get(),
            });
        }
        Ok(SessionConfig {
            default_session_credit: self.default_session_credit,
            incoming_link_credit: self.incoming_link_credit,
            max_fragment_size,
            max_message_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn builder_defaults_match_default_config() {
        assert_eq!(SessionConfig::builder().build(), Ok(SessionConfig::default()));
    }

    #[rstest]
    #[case(SessionConfig::builder().max_fragment_size(0), ConfigError::ZeroSize { field: "max fragment size" })]
    #[case(SessionConfig::builder().max_message_size(0), ConfigError::ZeroSize { field: "max message size" })]
    #[case(SessionConfig::builder().incoming_link_credit(0), ConfigError::ZeroIncomingCredit)]
    #[case(
        SessionConfig::builder().max_fragment_size(10).max_message_size(5),
        ConfigError::FragmentExceedsMessage { fragment: 10, message: 5 }
    )]
    fn invalid_values_are_rejected(#[case] builder: SessionConfigBuilder, #[case] expected: ConfigError) {
        assert_eq!(builder.build(), Err(expected));
    }

    #[test]
    fn zero_session_credit_is_allowed() {
        let config = SessionConfig::builder()
            .default_session_credit(0)
            .build()
            .expect("valid configuration");
        assert_eq!(config.default_session_credit(), 0);
    }
}
