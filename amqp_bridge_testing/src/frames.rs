//! Builders for the peer frames used across tests.

use std::num::NonZeroUsize;

use amqp_bridge::{
    frame::{
        Attach,
        Disposition,
        Extent,
        Flow,
        FlowState,
        Handle,
        Linkage,
        Role,
        Source,
        Target,
        Transfer,
        TransferId,
    },
    message::Message,
    settlement::Outcome,
};
use bytes::Bytes;

/// Fragment size used when encoding messages for test transfers.
pub const TEST_FRAGMENT_SIZE: usize = 1024;

/// Attach on which the peer receives from `address`.
pub fn attach_receiver(handle: u32, address: &str) -> Attach {
    Attach {
        name: format!("receiver-{handle}"),
        handle: Handle::new(handle),
        role: Role::Receiver,
        linkage: Some(Linkage {
            source: Some(Source {
                address: Some(address.to_owned()),
                ..Source::default()
            }),
            target: None,
        }),
        flow_state: None,
        transfer_unit: None,
    }
}

/// Attach on which the peer sends to `address`.
pub fn attach_sender(handle: u32, address: &str) -> Attach {
    Attach {
        name: format!("sender-{handle}"),
        handle: Handle::new(handle),
        role: Role::Sender,
        linkage: Some(Linkage {
            source: None,
            target: Some(Target {
                address: Some(address.to_owned()),
                dynamic: false,
            }),
        }),
        flow_state: None,
        transfer_unit: None,
    }
}

/// Request `credit` as the session credit of a receiving attach.
#[must_use]
pub fn with_session_credit(mut attach: Attach, credit: u32) -> Attach {
    attach.flow_state.get_or_insert_with(FlowState::default).session_credit = Some(credit);
    attach
}

/// Request outcomes on a receiving attach.
#[must_use]
pub fn with_outcomes(mut attach: Attach, default: Outcome, outcomes: &[Outcome]) -> Attach {
    if let Some(source) = attach
        .linkage
        .as_mut()
        .and_then(|linkage| linkage.source.as_mut())
    {
        source.default_outcome = Some(default.to_symbol());
        source.outcomes = Some(outcomes.iter().map(|o| o.to_symbol()).collect());
    }
    attach
}

/// Transfer carrying `message` on an incoming link.
///
/// # Panics
///
/// Panics if the message cannot be encoded.
pub fn transfer(handle: u32, id: u64, settled: bool, message: &Message) -> Transfer {
    let limit = NonZeroUsize::new(TEST_FRAGMENT_SIZE).expect("non-zero fragment size");
    Transfer {
        handle: Handle::new(handle),
        transfer_id: TransferId::new(id),
        delivery_tag: Bytes::copy_from_slice(&id.to_be_bytes()),
        settled,
        flow_state: None,
        fragments: message.to_fragments(limit).expect("encodable test message"),
    }
}

/// Receiver disposition for the inclusive range `[first, last]`.
pub fn settle(first: u64, last: u64, settled: bool, outcome: Outcome) -> Disposition {
    Disposition {
        role: Role::Receiver,
        extents: vec![Extent {
            first: TransferId::new(first),
            last: TransferId::new(last),
            settled,
            outcome: Some(outcome.to_symbol()),
        }],
    }
}

/// Session flow reporting the peer's low-water-mark.
pub fn low_water_mark(lwm: u64) -> Flow {
    Flow {
        handle: None,
        flow_state: FlowState {
            unsettled_lwm: Some(TransferId::new(lwm)),
            ..FlowState::default()
        },
    }
}

/// Link flow granting `credit` on `handle`.
pub fn link_credit(handle: u32, credit: u32, drain: bool) -> Flow {
    Flow {
        handle: Some(Handle::new(handle)),
        flow_state: FlowState {
            link_credit: Some(credit),
            drain,
            ..FlowState::default()
        },
    }
}
