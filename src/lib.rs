#![doc(html_root_url = "https://docs.rs/amqp_bridge/latest")]
//! Public API for the `amqp_bridge` library.
//!
//! This crate bridges AMQP 1.0 sessions onto an AMQP 0-9-1-style messaging
//! backend. A [`Connection`] demultiplexes decoded frames by channel and
//! supervises one [`session::Session`] per channel; each session resolves
//! link addresses to backend nodes, publishes incoming transfers, forwards
//! backend deliveries as outgoing transfers and reconciles the peer's
//! settlement window with per-delivery acknowledgements.

pub mod address;
pub mod backend;
pub mod config;
pub mod connection;
pub mod credit;
pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod session;
pub mod settlement;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use backend::{Backend, BackendError, Connector};
pub use config::{ConfigError, SessionConfig};
pub use connection::{Connection, ConnectionError, ConnectionOutput, SessionReport};
pub use error::{Condition, ProtocolError, Result, SessionError};
pub use frame::{Frame, OutboundFrame};
pub use metrics::{Direction, ERRORS_TOTAL, FRAMES_PROCESSED, SESSIONS_ACTIVE};
pub use session::{Session, SessionActor, SessionEvent, SessionExit, Step};
pub use settlement::{Outcome, SettlementWindow};
