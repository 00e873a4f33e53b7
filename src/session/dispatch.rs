//! Event dispatch and the session-level performatives.

use log::{debug, info, warn};

use super::{Session, SessionEvent, SessionExit, Step};
use crate::{
    backend::{Backend, BackendError},
    error::{Condition, Result, SessionError},
    frame::{Begin, Detach, End, Frame, Unsupported},
    metrics::{self, Direction},
};

impl<B: Backend> Session<B> {
    /// Handle one event from the inbound queue.
    ///
    /// Protocol violations become an `end` frame carrying the error; backend
    /// failures close the session without a frame so the connection can
    /// report them.
    pub async fn handle(&mut self, event: SessionEvent) -> Step {
        let result = match event {
            SessionEvent::Frame(frame) => {
                metrics::inc_frames(Direction::Inbound);
                debug!("frame received: channel={}, kind={}", self.channel, frame.kind());
                self.on_frame(frame).await
            }
            SessionEvent::Delivery(delivery) => self.on_delivery(delivery).await.map(Step::Continue),
            SessionEvent::BackendFailed(reason) => {
                Err(SessionError::Backend(BackendError::ChannelClosed(reason)))
            }
        };
        match result {
            Ok(step) => step,
            Err(SessionError::Protocol(violation)) => {
                warn!(
                    "protocol violation: channel={}, condition={}, description={}",
                    self.channel, violation.condition, violation.description
                );
                metrics::inc_errors();
                let end = End {
                    error: Some(violation.to_error_condition()),
                };
                Step::Close(vec![end.into()], SessionExit::Violated(violation))
            }
            Err(SessionError::Backend(e)) => {
                warn!("backend failure: channel={}, error={e}", self.channel);
                Step::Close(Vec::new(), SessionExit::Failed(e.to_string()))
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Step> {
        let frames = match frame {
            Frame::Begin(begin) => self.on_begin(&begin)?,
            Frame::Attach(attach) => self.on_attach(attach).await?,
            Frame::Transfer(transfer) => self.on_transfer(transfer).await?,
            Frame::Flow(flow) => self.on_flow(flow).await?,
            Frame::Disposition(disposition) => self.on_disposition(disposition).await?,
            Frame::Detach(detach) => self.on_detach(&detach),
            Frame::End(end) => return Ok(self.on_end(&end)),
            Frame::Unsupported(unsupported) => self.on_unsupported(&unsupported),
        };
        Ok(Step::Continue(frames))
    }

    fn on_begin(&mut self, _begin: &Begin) -> Result<Vec<Frame>> {
        if self.begun {
            return Err(SessionError::protocol(
                Condition::IllegalState,
                format!("session on channel {} already begun", self.channel),
            ));
        }
        self.begun = true;
        info!("session begun: channel={}", self.channel);
        Ok(vec![
            Begin {
                remote_channel: Some(self.channel),
            }
            .into(),
        ])
    }

    fn on_end(&self, end: &End) -> Step {
        info!(
            "session ended by peer: channel={}, error={:?}",
            self.channel, end.error
        );
        Step::Close(vec![End::default().into()], SessionExit::Ended)
    }

    fn on_detach(&mut self, detach: &Detach) -> Vec<Frame> {
        let removed = self.links.detach(detach.handle);
        debug!(
            "link detached: channel={}, handle={}, known={removed}",
            self.channel, detach.handle
        );
        vec![
            Detach {
                handle: detach.handle,
                error: None,
            }
            .into(),
        ]
    }

    fn on_unsupported(&self, unsupported: &Unsupported) -> Vec<Frame> {
        warn!(
            "unsupported frame ignored: channel={}, descriptor={}",
            self.channel, unsupported.descriptor
        );
        Vec::new()
    }
}
