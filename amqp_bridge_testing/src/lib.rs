//! Utilities for driving an `amqp_bridge` [`Connection`](amqp_bridge::Connection)
//! during tests.
//!
//! [`BridgeHarness`] wires a connection to an in-memory broker through a
//! recording connector, so tests can script peer frames, await the bridge's
//! replies and inspect every backend call. The [`frames`] builders produce
//! the peer frames those scripts need.

pub mod frames;
pub mod harness;
pub mod logging;

pub use frames::{
    attach_receiver,
    attach_sender,
    link_credit,
    low_water_mark,
    settle,
    transfer,
    with_outcomes,
    with_session_credit,
};
pub use harness::{BridgeHarness, WAIT};
pub use logging::{LoggerHandle, logger};
