//! Shared utilities for integration tests.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use amqp_bridge::{
    frame::{Attach, Disposition, End, Frame, OutboundFrame, Transfer},
    test_helpers::BackendCall,
};

/// Transfers among `frames`, in order.
pub fn transfers(frames: &[OutboundFrame]) -> Vec<Transfer> {
    frames
        .iter()
        .filter_map(|out| match &out.frame {
            Frame::Transfer(transfer) => Some(transfer.clone()),
            _ => None,
        })
        .collect()
}

/// The single attach reply among `frames`.
///
/// # Panics
///
/// Panics unless exactly one attach is present.
pub fn attach_reply(frames: &[OutboundFrame]) -> Attach {
    let attaches: Vec<Attach> = frames
        .iter()
        .filter_map(|out| match &out.frame {
            Frame::Attach(attach) => Some(attach.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(attaches.len(), 1, "expected one attach in {frames:?}");
    attaches.into_iter().next().expect("one attach")
}

/// Dispositions among `frames`, in order.
pub fn dispositions(frames: &[OutboundFrame]) -> Vec<Disposition> {
    frames
        .iter()
        .filter_map(|out| match &out.frame {
            Frame::Disposition(disposition) => Some(disposition.clone()),
            _ => None,
        })
        .collect()
}

/// The error condition symbol of an `end` frame, if `out` is one.
pub fn end_condition(out: &OutboundFrame) -> Option<String> {
    match &out.frame {
        Frame::End(End { error }) => error.as_ref().map(|e| e.condition.as_str().to_owned()),
        _ => None,
    }
}

/// Number of acknowledgements among `calls`.
pub fn ack_count(calls: &[BackendCall]) -> usize {
    calls
        .iter()
        .filter(|call| matches!(call, BackendCall::Ack(_)))
        .count()
}
