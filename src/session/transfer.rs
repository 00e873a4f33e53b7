//! Message transfer in both directions.

use log::{debug, warn};

use super::Session;
use crate::{
    backend::{Backend, Delivery},
    error::{Condition, Result, SessionError},
    frame::{Disposition, Extent, Flow, FlowState, Frame, Role, Transfer, TransferId},
    message::{AssemblyError, Message},
    settlement::{Outcome, PendingTransfer},
};

impl<B: Backend> Session<B> {
    /// Forward a backend delivery to the peer as a transfer.
    ///
    /// Deliveries for subscriptions the session no longer knows are dropped;
    /// the backend returns them to their queue when the channel closes.
    pub(super) async fn on_delivery(&mut self, delivery: Delivery) -> Result<Vec<Frame>> {
        let Some(handle) = delivery.consumer_tag.handle() else {
            warn!(
                "delivery for foreign subscription dropped: channel={}, consumer_tag={}",
                self.channel, delivery.consumer_tag
            );
            return Ok(Vec::new());
        };
        let fragments = Message::from_delivery(&delivery)
            .to_fragments(self.config.max_fragment_size())
            .map_err(|e| {
                SessionError::protocol(Condition::InternalError, format!("encode failed: {e}"))
            })?;
        let Some(link) = self.links.outgoing_mut(handle) else {
            warn!(
                "delivery for detached link dropped: channel={}, handle={handle}, \
                 delivery_tag={}",
                self.channel, delivery.delivery_tag
            );
            return Ok(Vec::new());
        };
        if *link.consumer_tag() != delivery.consumer_tag {
            warn!(
                "delivery for superseded subscription dropped: channel={}, handle={handle}, \
                 consumer_tag={}",
                self.channel, delivery.consumer_tag
            );
            return Ok(Vec::new());
        }

        let transfer_count = link.record_transfer(delivery.message.body.len());
        let settled = link.no_ack();
        let link_credit = link.link_credit();
        let transfer_id = if settled {
            self.window.record_settled()
        } else {
            if !self.credit.consume() {
                debug!(
                    "transfer sent without session credit: channel={}, handle={handle}",
                    self.channel
                );
            }
            self.window.record(PendingTransfer {
                handle,
                delivery_tag: delivery.delivery_tag,
                expected: link.default_outcome(),
            })
        };
        debug!(
            "transfer sent: channel={}, handle={handle}, transfer_id={transfer_id}, \
             delivery_tag={}, settled={settled}",
            self.channel, delivery.delivery_tag
        );
        Ok(vec![
            Transfer {
                handle,
                transfer_id,
                delivery_tag: delivery.delivery_tag.to_wire(),
                settled,
                flow_state: Some(FlowState {
                    unsettled_lwm: Some(self.window.low_water_mark()),
                    session_credit: Some(self.credit.available()),
                    transfer_count: Some(transfer_count),
                    link_credit,
                    available: None,
                    drain: false,
                }),
                fragments,
            }
            .into(),
        ])
    }

    /// Publish a message the peer sent on an incoming link.
    pub(super) async fn on_transfer(&mut self, transfer: Transfer) -> Result<Vec<Frame>> {
        let Some(link) = self.links.incoming_mut(transfer.handle) else {
            return Err(SessionError::protocol(
                Condition::IllegalState,
                format!("transfer on unattached handle {}", transfer.handle),
            ));
        };
        let message = self.assembler.assemble(&transfer.fragments).map_err(|e| {
            let condition = match e {
                AssemblyError::TooLarge { .. } => Condition::MessageSizeExceeded,
                _ => Condition::DecodeError,
            };
            SessionError::protocol(condition, e.to_string())
        })?;
        let regrant = link.spend();

        let mut frames = Vec::new();
        let routing_key = link.route(message.subject()).map(str::to_owned);
        let exchange = link.exchange().to_owned();
        let link_name = link.name().to_owned();
        let outcome = if let Some(routing_key) = routing_key {
            self.backend
                .publish(&exchange, &routing_key, message.into_backend())
                .await?;
            debug!(
                "message published: channel={}, handle={}, link={link_name}, \
                 exchange={exchange:?}, routing_key={routing_key}",
                self.channel, transfer.handle
            );
            Outcome::Accepted
        } else {
            warn!(
                "message without subject not routable: channel={}, handle={}, link={link_name}, \
                 transfer_id={}",
                self.channel, transfer.handle, transfer.transfer_id
            );
            Outcome::Rejected
        };
        if !transfer.settled {
            frames.push(settle_incoming(transfer.transfer_id, outcome));
        }
        if let Some(credit) = regrant {
            frames.push(
                Flow {
                    handle: Some(transfer.handle),
                    flow_state: FlowState {
                        link_credit: Some(credit),
                        ..FlowState::default()
                    },
                }
                .into(),
            );
        }
        Ok(frames)
    }
}

fn settle_incoming(transfer_id: TransferId, outcome: Outcome) -> Frame {
    Disposition {
        role: Role::Receiver,
        extents: vec![Extent::single(transfer_id, true, Some(outcome.to_symbol()))],
    }
    .into()
}
