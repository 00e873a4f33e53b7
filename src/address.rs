//! Address grammar and resolution against the backend.
//!
//! Addresses name backend nodes:
//!
//! - `/queue/<name>`: an existing queue (source or target);
//! - `/queue`: the default exchange, routed by message subject (target only);
//! - `/exchange/<name>`: an existing exchange, routed by subject (target only);
//! - `/exchange/<name>/<routing-key>`: a private queue bound to an existing
//!   exchange (source only).
//!
//! Existence is checked with passive declares so resolution never creates
//! user-named nodes; only dynamic termini and exchange-backed sources get
//! fresh, auto-deleting, server-named queues.

use std::{fmt, str::FromStr};

use log::debug;
use thiserror::Error;

use crate::{
    backend::{Backend, BackendError, DEFAULT_EXCHANGE, QueueDeclare},
    frame::{DistributionMode, Source, Target},
};

const QUEUE_PREFIX: &str = "/queue";
const EXCHANGE_PREFIX: &str = "/exchange/";

/// A parsed node address.
///
/// # Examples
///
/// ```
/// use amqp_bridge::address::Address;
///
/// let parsed: Address = "/exchange/logs/error".parse().expect("valid address");
/// assert_eq!(
///     parsed,
///     Address::ExchangeRoute {
///         exchange: "logs".into(),
///         routing_key: "error".into(),
///     }
/// );
/// assert_eq!(parsed.to_string(), "/exchange/logs/error");
/// assert!("/topic/x".parse::<Address>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    /// `/queue/<name>`.
    Queue(String),
    /// `/queue`: routing key taken from each message's subject.
    SubjectRouted,
    /// `/exchange/<name>`.
    Exchange(String),
    /// `/exchange/<name>/<routing-key>`.
    ExchangeRoute {
        exchange: String,
        routing_key: String,
    },
}

impl Address {
    /// Address of a queue.
    #[must_use]
    pub fn queue(name: impl Into<String>) -> Self { Self::Queue(name.into()) }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(name) => write!(f, "{QUEUE_PREFIX}/{name}"),
            Self::SubjectRouted => f.write_str(QUEUE_PREFIX),
            Self::Exchange(name) => write!(f, "{EXCHANGE_PREFIX}{name}"),
            Self::ExchangeRoute {
                exchange,
                routing_key,
            } => write!(f, "{EXCHANGE_PREFIX}{exchange}/{routing_key}"),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || AddressError::Malformed(raw.to_owned());
        if let Some(rest) = raw.strip_prefix(QUEUE_PREFIX) {
            return match rest {
                "" => Ok(Self::SubjectRouted),
                _ => match rest.strip_prefix('/') {
                    Some(name) if !name.is_empty() => Ok(Self::Queue(name.to_owned())),
                    _ => Err(malformed()),
                },
            };
        }
        let rest = raw.strip_prefix(EXCHANGE_PREFIX).ok_or_else(malformed)?;
        match rest.split_once('/') {
            None if !rest.is_empty() => Ok(Self::Exchange(rest.to_owned())),
            Some((exchange, routing_key)) if !exchange.is_empty() => Ok(Self::ExchangeRoute {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
            }),
            _ => Err(malformed()),
        }
    }
}

/// Errors raised while resolving a terminus.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The address does not follow the grammar, or names a node kind the
    /// terminus cannot use.
    #[error("malformed address '{0}'")]
    Malformed(String),
    /// The terminus is dynamic and also names an address.
    #[error("dynamic terminus must not carry an address, got '{0}'")]
    Ambiguous(String),
    /// The terminus has neither an address nor the dynamic flag.
    #[error("terminus has no address")]
    Missing,
    /// A passive declare found no such node.
    #[error("{0}")]
    NotFound(BackendError),
    /// Any other backend failure.
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for AddressError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound { .. } => Self::NotFound(err),
            other => Self::Backend(other),
        }
    }
}

/// Where an incoming link publishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub exchange: String,
    /// `None` routes each message by its subject.
    pub routing_key: Option<String>,
    /// Address reported back to the peer.
    pub address: String,
}

/// What an outgoing link consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSource {
    pub queue: String,
    pub distribution_mode: DistributionMode,
    /// Address reported back to the peer.
    pub address: String,
}

fn requested_address(address: Option<&String>, dynamic: bool) -> Result<Option<Address>, AddressError> {
    match (address, dynamic) {
        (Some(raw), true) => Err(AddressError::Ambiguous(raw.clone())),
        (None, true) => Ok(None),
        (None, false) => Err(AddressError::Missing),
        (Some(raw), false) => raw.parse().map(Some),
    }
}

async fn declare_private_queue<B>(backend: &mut B) -> Result<String, AddressError>
where
    B: Backend + ?Sized,
{
    let name = backend.declare_queue(QueueDeclare::server_named()).await?;
    debug!("private queue declared: queue={name}");
    Ok(name)
}

/// Resolve the target of a link on which the peer sends.
///
/// # Errors
///
/// Returns [`AddressError::NotFound`] when the named node does not exist,
/// [`AddressError::Backend`] on other backend failures, and a
/// protocol-violation variant for unusable addresses.
pub async fn resolve_target<B>(backend: &mut B, target: &Target) -> Result<ResolvedTarget, AddressError>
where
    B: Backend + ?Sized,
{
    let Some(address) = requested_address(target.address.as_ref(), target.dynamic)? else {
        let queue = declare_private_queue(backend).await?;
        return Ok(ResolvedTarget {
            exchange: DEFAULT_EXCHANGE.to_owned(),
            address: Address::queue(queue.clone()).to_string(),
            routing_key: Some(queue),
        });
    };
    let rendered = address.to_string();
    match address {
        Address::Queue(name) => {
            backend.declare_queue(QueueDeclare::passive(name.clone())).await?;
            Ok(ResolvedTarget {
                exchange: DEFAULT_EXCHANGE.to_owned(),
                routing_key: Some(name),
                address: rendered,
            })
        }
        Address::SubjectRouted => Ok(ResolvedTarget {
            exchange: DEFAULT_EXCHANGE.to_owned(),
            routing_key: None,
            address: rendered,
        }),
        Address::Exchange(name) => {
            backend.declare_exchange(&name, true).await?;
            Ok(ResolvedTarget {
                exchange: name,
                routing_key: None,
                address: rendered,
            })
        }
        Address::ExchangeRoute { .. } => Err(AddressError::Malformed(rendered)),
    }
}

/// Resolve the source of a link on which the peer receives.
///
/// # Errors
///
/// As for [`resolve_target`].
pub async fn resolve_source<B>(backend: &mut B, source: &Source) -> Result<ResolvedSource, AddressError>
where
    B: Backend + ?Sized,
{
    let Some(address) = requested_address(source.address.as_ref(), source.dynamic)? else {
        let queue = declare_private_queue(backend).await?;
        return Ok(ResolvedSource {
            address: Address::queue(queue.clone()).to_string(),
            queue,
            distribution_mode: DistributionMode::Move,
        });
    };
    let rendered = address.to_string();
    match address {
        Address::Queue(name) => {
            let queue = backend.declare_queue(QueueDeclare::passive(name)).await?;
            Ok(ResolvedSource {
                queue,
                distribution_mode: DistributionMode::Move,
                address: rendered,
            })
        }
        Address::ExchangeRoute {
            exchange,
            routing_key,
        } => {
            backend.declare_exchange(&exchange, true).await?;
            let queue = declare_private_queue(backend).await?;
            backend.bind_queue(&queue, &exchange, &routing_key).await?;
            Ok(ResolvedSource {
                queue,
                distribution_mode: DistributionMode::Copy,
                address: rendered,
            })
        }
        Address::SubjectRouted | Address::Exchange(_) => Err(AddressError::Malformed(rendered)),
    }
}
