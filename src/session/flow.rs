//! Flow control and settlement of outgoing transfers.

use log::{debug, info};

use super::Session;
use crate::{
    backend::Backend,
    credit::forward_link_credit,
    error::{Condition, Result, SessionError},
    frame::{Disposition, Extent, Flow, FlowState, Frame, Role},
    metrics,
    settlement::{Outcome, Settled, WindowError},
};

impl<B: Backend> Session<B> {
    /// Apply a peer flow.
    ///
    /// A low-water-mark settles everything below it with the expected
    /// outcome; a session credit replaces the operating credit; a link
    /// credit for an outgoing link is forwarded to its subscription and
    /// answered with the link's state.
    pub(super) async fn on_flow(&mut self, flow: Flow) -> Result<Vec<Frame>> {
        let state = &flow.flow_state;
        if let Some(requested) = state.unsettled_lwm {
            let settled = self.window.advance_to(requested).map_err(window_violation)?;
            self.settle_on_backend(&settled).await?;
        }
        if let Some(requested) = state.session_credit
            && requested != self.credit.available()
        {
            self.credit.adjust(requested);
            let prefetch = self.credit.prefetch(self.window.pending_len());
            self.backend.set_prefetch(prefetch).await?;
            info!(
                "session credit adjusted: channel={}, credit={requested}, prefetch={prefetch}",
                self.channel
            );
        }

        let Some(handle) = flow.handle else {
            return Ok(Vec::new());
        };
        let Some(link) = self.links.outgoing_mut(handle) else {
            debug!(
                "flow for non-outgoing link ignored: channel={}, handle={handle}",
                self.channel
            );
            return Ok(Vec::new());
        };
        let Some(available) = forward_link_credit(&mut self.backend, link, state).await? else {
            return Ok(Vec::new());
        };
        Ok(vec![
            Flow {
                handle: Some(handle),
                flow_state: FlowState {
                    unsettled_lwm: Some(self.window.low_water_mark()),
                    session_credit: Some(self.credit.available()),
                    transfer_count: Some(link.transfer_count()),
                    link_credit: link.link_credit(),
                    available: Some(available),
                    drain: state.drain,
                },
            }
            .into(),
        ])
    }

    /// Settle outgoing transfers named by a peer disposition.
    ///
    /// Extents the peer has not settled yet are confirmed with a settled
    /// disposition once at least one transfer in them was found.
    pub(super) async fn on_disposition(&mut self, disposition: Disposition) -> Result<Vec<Frame>> {
        if disposition.role == Role::Sender {
            debug!(
                "disposition from sender ignored: channel={}, extents={}",
                self.channel,
                disposition.extents.len()
            );
            return Ok(Vec::new());
        }
        let mut confirmed = Vec::new();
        for extent in &disposition.extents {
            let outcome = extent
                .outcome
                .as_ref()
                .map(Outcome::try_from)
                .transpose()
                .map_err(|e| {
                    SessionError::protocol(
                        Condition::NotImplemented,
                        format!("outcome not supported: {}", e.0),
                    )
                })?;
            if let Some(outcome) = outcome {
                self.check_negotiated(extent, outcome)?;
            }
            let settled = self.window.settle_range(extent.first, extent.last, outcome);
            self.settle_on_backend(&settled).await?;
            if !settled.is_empty() && !extent.settled {
                confirmed.push(Extent {
                    first: extent.first,
                    last: extent.last,
                    settled: true,
                    outcome: extent.outcome.clone(),
                });
            }
        }
        self.window.refresh_low_water_mark();

        if confirmed.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![
            Disposition {
                role: Role::Sender,
                extents: confirmed,
            }
            .into(),
        ])
    }

    /// Reject an explicit outcome that an outgoing link in the extent did
    /// not negotiate at attach. Transfers of detached links are exempt.
    fn check_negotiated(&self, extent: &Extent, outcome: Outcome) -> Result<()> {
        let refused = self
            .window
            .pending_range(extent.first, extent.last)
            .map(|(_, pending)| pending.handle)
            .find(|handle| {
                self.links
                    .outgoing(*handle)
                    .is_some_and(|link| !link.supports(outcome))
            });
        match refused {
            Some(handle) => Err(SessionError::protocol(
                Condition::NotImplemented,
                format!("outcome {outcome} not negotiated on link {handle}"),
            )),
            None => Ok(()),
        }
    }

    /// Apply each settlement to the backend and return its credit.
    async fn settle_on_backend(&mut self, settled: &[Settled]) -> Result<()> {
        for entry in settled {
            self.backend
                .settle(entry.delivery_tag, entry.outcome)
                .await?;
            debug!(
                "transfer settled: channel={}, transfer_id={}, delivery_tag={}, outcome={}",
                self.channel, entry.transfer_id, entry.delivery_tag, entry.outcome
            );
            metrics::add_settlements(entry.outcome, 1);
        }
        self.credit.restore(settled.len());
        Ok(())
    }
}

fn window_violation(err: WindowError) -> SessionError {
    let condition = match err {
        WindowError::Rollback { .. } => Condition::IllegalState,
        WindowError::BeyondNext { .. } => Condition::InvalidField,
    };
    SessionError::protocol(condition, err.to_string())
}

