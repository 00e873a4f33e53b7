//! Metric helpers for `amqp_bridge`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::settlement::Outcome;

/// Name of the gauge tracking active sessions.
pub const SESSIONS_ACTIVE: &str = "amqp_bridge_sessions_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "amqp_bridge_frames_processed_total";
/// Name of the counter tracking backend settlements by outcome.
pub const SETTLEMENTS_TOTAL: &str = "amqp_bridge_settlements_total";
/// Name of the counter tracking sessions ended by an error.
pub const ERRORS_TOTAL: &str = "amqp_bridge_errors_total";
/// Name of the counter tracking panicking session tasks.
pub const SESSION_PANICS_TOTAL: &str = "amqp_bridge_session_panics_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames received from the peer.
    Inbound,
    /// Frames sent to the peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "only read by metric labels"))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active sessions gauge.
pub fn inc_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

/// Decrement the active sessions gauge.
pub fn dec_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record `count` backend settlements with `outcome`.
pub fn add_settlements(outcome: Outcome, count: usize) {
    #[cfg(feature = "metrics")]
    counter!(SETTLEMENTS_TOTAL, "outcome" => outcome.label())
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
    #[cfg(not(feature = "metrics"))]
    let _ = (outcome, count);
}

/// Record a session ended by an error.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}

/// Record a panicking session task.
pub fn inc_session_panics() {
    #[cfg(feature = "metrics")]
    counter!(SESSION_PANICS_TOTAL).increment(1);
}
