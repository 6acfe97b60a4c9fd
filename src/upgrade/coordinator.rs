//! Client connect flow: prepare, exchange, validate, open.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::handshake;
use crate::container::Container;
use crate::domain::{CloseStatus, UpgradeRequest};
use crate::endpoint::{EndpointAdapter, EndpointConfig};
use crate::error::WsError;
use crate::session::Session;

/// Pending client connect started by [`Container::connect`].
///
/// Resolves to the open, managed session. Dropping the handle does not
/// cancel the connect; use [`ConnectHandle::abort`] for that.
#[derive(Debug)]
pub struct ConnectHandle {
    task: JoinHandle<Result<Session, WsError>>,
}

impl ConnectHandle {
    pub(crate) const fn new(task: JoinHandle<Result<Session, WsError>>) -> Self {
        Self { task }
    }

    /// Waits at most `timeout` for the connect, aborting it on expiry.
    ///
    /// # Errors
    ///
    /// Returns the connect's own error, or [`WsError::HandshakeFailure`]
    /// when `timeout` elapsed.
    pub async fn wait(self, timeout: Duration) -> Result<Session, WsError> {
        let abort = self.task.abort_handle();
        match tokio::time::timeout(timeout, self).await {
            Ok(result) => result,
            Err(_) => {
                abort.abort();
                Err(WsError::HandshakeFailure(format!(
                    "connect did not complete within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Cancels the connect. A session that already opened is unaffected.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// `true` once the connect has resolved.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for ConnectHandle {
    type Output = Result<Session, WsError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|err| Err(WsError::Internal(format!("connect task: {err}"))))
        })
    }
}

/// Runs one client connect to completion.
///
/// A response that fails validation closes the transport again and no
/// session is created or registered.
#[tracing::instrument(level = "debug", skip_all, fields(uri = request.uri()))]
pub(crate) async fn connect(
    container: Container,
    endpoint: EndpointAdapter,
    mut request: UpgradeRequest,
) -> Result<Session, WsError> {
    handshake::prepare_client_request(&mut request)?;

    let connect_timeout = container.config().connect_timeout;
    let exchange = tokio::time::timeout(connect_timeout, container.connector().connect(&request)).await;
    let (mut response, transport) = match exchange {
        Ok(result) => result?,
        Err(_) => {
            return Err(WsError::HandshakeFailure(format!(
                "no upgrade response within {}ms",
                connect_timeout.as_millis()
            )));
        }
    };

    if let Err(err) = handshake::validate_response(&request, &response) {
        tracing::warn!(%err, status = response.status(), "rejecting upgrade response");
        let _ = transport
            .channel()
            .close(&CloseStatus::new(CloseStatus::PROTOCOL_ERROR, "handshake rejected"))
            .await;
        return Err(err);
    }

    let config = EndpointConfig::new().with_sub_protocols(request.sub_protocols().iter().cloned());
    let session = container
        .open_managed(endpoint, config, request, &mut response, transport)
        .await?;
    tracing::info!(
        session_id = %session.id(),
        sub_protocol = session.sub_protocol().unwrap_or(""),
        "websocket session connected"
    );
    Ok(session)
}
