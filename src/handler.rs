//! Per-session frame handler and its dispatch loop.
//!
//! A [`FrameHandler`] is built by the container for one upgrade and then
//! moved into the session's dispatch task. From there it is the only path
//! by which events reach the endpoint, which gives the ordering
//! guarantees: `on_open` first, `on_close` last and exactly once, nothing
//! concurrent in between.

use tokio::sync::{mpsc, oneshot};

use crate::domain::{CloseStatus, Payload, UpgradeRequest, UpgradeResponse};
use crate::endpoint::{EndpointAdapter, EndpointConfig};
use crate::error::WsError;
use crate::session::Session;

/// Work item for the dispatch task.
#[derive(Debug)]
pub(crate) enum DispatchEvent {
    /// A data or pong message for the endpoint.
    Message { payload: Payload, last: bool },
    /// An error to report through `on_error`.
    Error(WsError),
}

/// Bridge between one session's transport and its endpoint.
#[derive(Debug)]
pub struct FrameHandler {
    endpoint: EndpointAdapter,
    request: UpgradeRequest,
    response: UpgradeResponse,
    config: EndpointConfig,
}

impl FrameHandler {
    pub(crate) fn new(
        endpoint: EndpointAdapter,
        request: UpgradeRequest,
        response: UpgradeResponse,
        config: EndpointConfig,
    ) -> Self {
        Self {
            endpoint,
            request,
            response,
            config,
        }
    }

    /// The upgrade request this handler was created for.
    #[must_use]
    pub fn upgrade_request(&self) -> &UpgradeRequest {
        &self.request
    }

    /// The upgrade response, carrying the negotiated subprotocol.
    #[must_use]
    pub fn upgrade_response(&self) -> &UpgradeResponse {
        &self.response
    }

    /// The endpoint configuration snapshot.
    #[must_use]
    pub fn endpoint_config(&self) -> &EndpointConfig {
        &self.config
    }

    /// The negotiated subprotocol, if any.
    #[must_use]
    pub fn sub_protocol(&self) -> Option<&str> {
        self.response.accepted_sub_protocol()
    }

    async fn on_open(&mut self, session: &Session) -> Result<(), WsError> {
        tracing::debug!(
            session_id = %session.id(),
            endpoint = self.endpoint.style_str(),
            sub_protocol = self.sub_protocol().unwrap_or(""),
            "session opened"
        );
        self.endpoint.on_open(session).await
    }

    async fn on_message(
        &mut self,
        session: &Session,
        payload: Payload,
        last: bool,
    ) -> Result<(), WsError> {
        tracing::trace!(
            session_id = %session.id(),
            kind = payload.kind_str(),
            len = payload.len(),
            last,
            "dispatching message"
        );
        self.endpoint.on_message(session, payload, last).await
    }

    async fn on_error(&mut self, session: &Session, cause: &WsError) {
        tracing::debug!(session_id = %session.id(), %cause, "reporting session error");
        self.endpoint.on_error(session, cause).await;
    }

    async fn on_closed(&mut self, session: &Session, status: &CloseStatus) {
        tracing::debug!(session_id = %session.id(), %status, "session closed");
        self.endpoint.on_close(session, status).await;
    }

    /// Reports a failed callback, then closes with the error's code.
    async fn fail(&mut self, session: &Session, err: WsError) {
        tracing::warn!(session_id = %session.id(), %err, "endpoint callback failed");
        self.on_error(session, &err).await;
        session.terminate(err.to_close_status(), true).await;
    }

    async fn dispatch(&mut self, session: &Session, event: DispatchEvent) {
        match event {
            DispatchEvent::Message { payload, last } => {
                if let Err(err) = self.on_message(session, payload, last).await {
                    self.fail(session, err).await;
                }
            }
            DispatchEvent::Error(err) => self.on_error(session, &err).await,
        }
    }

    /// Dispatch task body.
    ///
    /// Events queued before the session finished are drained ahead of
    /// `on_close`; nothing is delivered after it.
    pub(crate) async fn run(
        mut self,
        session: Session,
        mut events: mpsc::Receiver<DispatchEvent>,
        mut finished: oneshot::Receiver<CloseStatus>,
    ) {
        if let Err(err) = self.on_open(&session).await {
            self.fail(&session, err).await;
        }

        let status = loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.dispatch(&session, event).await,
                    None => {
                        break (&mut finished)
                            .await
                            .unwrap_or_else(|_| CloseStatus::abnormal("session dropped"));
                    }
                },
                status = &mut finished => {
                    while let Ok(event) = events.try_recv() {
                        self.dispatch(&session, event).await;
                    }
                    break status.unwrap_or_else(|_| CloseStatus::abnormal("session dropped"));
                }
            }
        };

        self.on_closed(&session, &status).await;
        session.mark_closed();
    }
}
