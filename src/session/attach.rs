//! Link attachment in both directions.

use log::info;

use super::Session;
use crate::{
    address::{AddressError, resolve_source, resolve_target},
    backend::Backend,
    credit::{forward_link_credit, negotiate_outcomes},
    error::{Condition, Result, SessionError},
    frame::{Attach, FlowState, Frame, Linkage, Role, Source, Target},
    link::{IncomingLink, OutgoingLink},
};

impl<B: Backend> Session<B> {
    /// Attach a link on a peer-chosen handle.
    ///
    /// A sender attach on a handle that already names an incoming link
    /// replaces that link's target. Any other attach on a used handle ends
    /// the session.
    pub(super) async fn on_attach(&mut self, attach: Attach) -> Result<Vec<Frame>> {
        let in_use = match attach.role {
            Role::Sender => self.links.outgoing(attach.handle).is_some(),
            Role::Receiver => self.links.contains(attach.handle),
        };
        if in_use {
            return Err(SessionError::protocol(
                Condition::IllegalState,
                format!("handle {} is already attached", attach.handle),
            ));
        }
        match attach.role {
            Role::Sender => self.attach_incoming(attach).await,
            Role::Receiver => self.attach_outgoing(attach).await,
        }
    }

    /// The peer sends on this link; resolve where its messages go.
    async fn attach_incoming(&mut self, attach: Attach) -> Result<Vec<Frame>> {
        let linkage = attach.linkage.clone().unwrap_or_default();
        let target = linkage.target.clone().unwrap_or_default();
        let resolved = match resolve_target(&mut self.backend, &target).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.links.detach(attach.handle);
                return self.refuse_attach(&attach, Role::Receiver, e);
            }
        };
        let credit = self.config.incoming_link_credit();
        let action = if self.links.incoming(attach.handle).is_some() {
            "updated"
        } else {
            "attached"
        };
        info!(
            "incoming link {action}: channel={}, handle={}, name={}, exchange={:?}, \
             routing_key={:?}",
            self.channel, attach.handle, attach.name, resolved.exchange, resolved.routing_key
        );
        let reply_target = Target {
            address: Some(resolved.address.clone()),
            dynamic: target.dynamic,
        };
        self.links.insert_incoming(
            attach.handle,
            IncomingLink::new(attach.name.clone(), resolved, credit),
        );
        Ok(vec![
            Attach {
                name: attach.name,
                handle: attach.handle,
                role: Role::Receiver,
                linkage: Some(Linkage {
                    source: linkage.source,
                    target: Some(reply_target),
                }),
                flow_state: Some(FlowState {
                    link_credit: Some(credit),
                    ..FlowState::default()
                }),
                transfer_unit: None,
            }
            .into(),
        ])
    }

    /// The peer receives on this link; subscribe to the source.
    async fn attach_outgoing(&mut self, attach: Attach) -> Result<Vec<Frame>> {
        let linkage = attach.linkage.clone().unwrap_or_default();
        let source = linkage.source.clone().unwrap_or_default();
        let outcomes = negotiate_outcomes(Some(&source))?;
        let resolved = match resolve_source(&mut self.backend, &source).await {
            Ok(resolved) => resolved,
            Err(e) => return self.refuse_attach(&attach, Role::Sender, e),
        };

        let flow_state = attach.flow_state.clone().unwrap_or_default();
        let requested = flow_state
            .session_credit
            .unwrap_or(self.config.default_session_credit());
        if self.credit.establish(requested) {
            let prefetch = self.credit.prefetch(self.window.pending_len());
            self.backend.set_prefetch(prefetch).await?;
            info!(
                "session credit established: channel={}, credit={requested}, prefetch={prefetch}",
                self.channel
            );
        }

        let consumer_tag = self.links.next_consumer_tag(attach.handle);
        let mut link = OutgoingLink::new(
            attach.handle,
            consumer_tag,
            resolved.queue.clone(),
            attach.transfer_unit,
            outcomes.default,
            outcomes.supported.clone(),
            outcomes.no_ack,
        );
        if let Err(e) = self
            .backend
            .subscribe(&resolved.queue, link.consumer_tag(), outcomes.no_ack)
            .await
        {
            return self.refuse_attach(&attach, Role::Sender, AddressError::from(e));
        }
        forward_link_credit(&mut self.backend, &mut link, &flow_state).await?;
        info!(
            "outgoing link attached: channel={}, handle={}, name={}, queue={}, no_ack={}, \
             default_outcome={}",
            self.channel,
            attach.handle,
            attach.name,
            resolved.queue,
            outcomes.no_ack,
            outcomes.default
        );

        let reply_source = Source {
            address: Some(resolved.address),
            dynamic: source.dynamic,
            distribution_mode: Some(resolved.distribution_mode),
            default_outcome: Some(outcomes.default.to_symbol()),
            outcomes: Some(outcomes.supported.iter().map(|o| o.to_symbol()).collect()),
        };
        let reply_flow = FlowState {
            unsettled_lwm: Some(self.window.low_water_mark()),
            session_credit: Some(self.credit.available()),
            transfer_count: Some(link.transfer_count()),
            link_credit: link.link_credit(),
            available: None,
            drain: false,
        };
        self.links.insert_outgoing(link);
        Ok(vec![
            Attach {
                name: attach.name,
                handle: attach.handle,
                role: Role::Sender,
                linkage: Some(Linkage {
                    source: Some(reply_source),
                    target: linkage.target,
                }),
                flow_state: Some(reply_flow),
                transfer_unit: attach.transfer_unit,
            }
            .into(),
        ])
    }

    /// Answer a failed resolution.
    ///
    /// A missing node is recoverable: the reply carries no linkage and no
    /// link state is created. Everything else ends or fails the session.
    fn refuse_attach(&self, attach: &Attach, role: Role, err: AddressError) -> Result<Vec<Frame>> {
        match err {
            AddressError::NotFound(e) => {
                info!(
                    "attach refused: channel={}, handle={}, name={}, reason={e}",
                    self.channel, attach.handle, attach.name
                );
                Ok(vec![
                    Attach {
                        name: attach.name.clone(),
                        handle: attach.handle,
                        role,
                        linkage: None,
                        flow_state: None,
                        transfer_unit: None,
                    }
                    .into(),
                ])
            }
            AddressError::Backend(e) => Err(e.into()),
            AddressError::Malformed(_) | AddressError::Ambiguous(_) | AddressError::Missing => {
                Err(SessionError::protocol(Condition::InvalidField, err.to_string()))
            }
        }
    }
}
