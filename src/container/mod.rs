//! The WebSocket container: lifecycle, session factory and registry.
//!
//! A [`Container`] is a cheap clonable handle. It must be started inside a
//! Tokio runtime; that runtime becomes the executor for every session's
//! reader and dispatcher tasks.

mod registry;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::task::JoinSet;

pub use registry::SessionRegistry;

use crate::channel::Transport;
use crate::channel::tungstenite::{self, TungsteniteConnector};
use crate::config::ContainerConfig;
use crate::domain::{CloseStatus, SessionId, SessionState, UpgradeRequest, UpgradeResponse};
use crate::endpoint::{EndpointAdapter, EndpointConfig};
use crate::error::WsError;
use crate::handler::FrameHandler;
use crate::session::{Session, SessionInfo};
use crate::upgrade::connector::Connector;
use crate::upgrade::coordinator::{self, ConnectHandle};
use crate::upgrade::handshake;

/// Container lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Built, not yet started.
    Created,
    /// Accepting and creating sessions.
    Started,
    /// Shut down; cannot be restarted.
    Stopped,
}

/// Owner of all sessions created through it.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

struct ContainerInner {
    config: ContainerConfig,
    connector: Arc<dyn Connector>,
    lifecycle: Mutex<(Lifecycle, Option<Handle>)>,
    sessions: SessionRegistry,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("lifecycle", &self.lifecycle())
            .field("sessions", &self.inner.sessions.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Creates a container that dials clients through tokio-tungstenite.
    #[must_use]
    pub fn new(config: ContainerConfig) -> Self {
        let connector = TungsteniteConnector::new(config.inbound_queue_capacity);
        Self::with_connector(config, connector)
    }

    /// Creates a container that dials clients through `connector`.
    #[must_use]
    pub fn with_connector(config: ContainerConfig, connector: impl Connector) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                config,
                connector: Arc::new(connector),
                lifecycle: Mutex::new((Lifecycle::Created, None)),
                sessions: SessionRegistry::new(),
            }),
        }
    }

    /// Container configuration.
    #[must_use]
    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle.lock().0
    }

    pub(crate) fn connector(&self) -> &Arc<dyn Connector> {
        &self.inner.connector
    }

    /// Starts the container on the current Tokio runtime. Idempotent while
    /// started.
    ///
    /// # Errors
    ///
    /// - [`WsError::ContainerStopped`] if the container was stopped.
    /// - [`WsError::Internal`] if called outside a Tokio runtime.
    pub fn start(&self) -> Result<(), WsError> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.0 {
            Lifecycle::Started => Ok(()),
            Lifecycle::Stopped => Err(WsError::ContainerStopped),
            Lifecycle::Created => {
                let runtime = Handle::try_current().map_err(|err| WsError::Internal(err.to_string()))?;
                *lifecycle = (Lifecycle::Started, Some(runtime));
                tracing::info!("websocket container started");
                Ok(())
            }
        }
    }

    /// The runtime sessions run on.
    pub(crate) fn runtime(&self) -> Result<Handle, WsError> {
        let lifecycle = self.inner.lifecycle.lock();
        match &*lifecycle {
            (Lifecycle::Started, Some(runtime)) => Ok(runtime.clone()),
            (Lifecycle::Stopped, _) => Err(WsError::ContainerStopped),
            _ => Err(WsError::ContainerNotStarted),
        }
    }

    fn ensure_started(&self) -> Result<(), WsError> {
        self.runtime().map(|_| ())
    }

    /// Stops the container.
    ///
    /// Every managed session is closed with 1001 (going away). Sessions
    /// that have not finished when the stop grace period elapses are
    /// force-closed locally and see 1006. Returns once every session has
    /// delivered its `on_close` or the close timeout elapsed on top of the
    /// grace period. Idempotent.
    pub async fn stop(&self) {
        let (previous, sessions) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let previous = lifecycle.0;
            *lifecycle = (Lifecycle::Stopped, None);
            (previous, self.inner.sessions.snapshot())
        };
        if previous != Lifecycle::Started {
            tracing::debug!(?previous, "container stop without running sessions");
            return;
        }

        tracing::info!(sessions = sessions.len(), "stopping websocket container");

        let mut closing = JoinSet::new();
        for session in sessions.iter().filter(|s| s.state().is_open()).cloned() {
            closing.spawn(async move {
                if let Err(err) = session
                    .close(CloseStatus::GOING_AWAY, "container stopping")
                    .await
                {
                    tracing::debug!(session_id = %session.id(), %err, "close during stop failed");
                }
            });
        }
        let drained = tokio::time::timeout(self.inner.config.stop_grace_timeout, async {
            while closing.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            tracing::warn!("stop grace period elapsed, forcing remaining sessions closed");
            closing.abort_all();
        }

        for session in &sessions {
            if session.state() != SessionState::Closed {
                session
                    .terminate(CloseStatus::abnormal("container stopped"), false)
                    .await;
            }
        }
        for session in &sessions {
            if !session.await_close(self.inner.config.close_timeout).await {
                tracing::warn!(session_id = %session.id(), "session did not deliver on_close");
            }
        }
        self.inner.sessions.clear();
        tracing::info!("websocket container stopped");
    }

    /// Builds the frame handler for an upgrade.
    ///
    /// The subprotocol the response selected (from its accepted value or
    /// its `Sec-WebSocket-Protocol` header) is checked against what the
    /// request offered and recorded into `response`.
    ///
    /// # Errors
    ///
    /// - [`WsError::ContainerNotStarted`] / [`WsError::ContainerStopped`].
    /// - [`WsError::HandshakeFailure`] if the response selected a
    ///   subprotocol the request did not offer.
    pub fn new_frame_handler(
        &self,
        endpoint: impl Into<EndpointAdapter>,
        request: UpgradeRequest,
        response: &mut UpgradeResponse,
        config: EndpointConfig,
    ) -> Result<FrameHandler, WsError> {
        self.ensure_started()?;
        let selected = match response.accepted_sub_protocol() {
            Some(protocol) => Some(protocol.to_string()),
            None => handshake::selected_protocol(response)?.map(str::to_string),
        };
        let chosen = handshake::negotiate_sub_protocol(request.sub_protocols(), selected.as_deref())?;
        response.set_accepted_sub_protocol(chosen)?;
        Ok(FrameHandler::new(
            endpoint.into(),
            request,
            response.clone(),
            config,
        ))
    }

    /// Registers `session` so that [`Container::stop`] closes it. The
    /// session is forgotten again once it reaches `Closed`.
    ///
    /// The lifecycle check and the insert happen under the lifecycle lock,
    /// so a session is either seen by a concurrent `stop()` or refused.
    ///
    /// # Errors
    ///
    /// - [`WsError::ContainerNotStarted`] before [`Container::start`].
    /// - [`WsError::ContainerStopped`] once the container was stopped.
    pub fn add_managed(&self, session: &Session) -> Result<(), WsError> {
        {
            let lifecycle = self.inner.lifecycle.lock();
            match lifecycle.0 {
                Lifecycle::Started => {}
                Lifecycle::Created => return Err(WsError::ContainerNotStarted),
                Lifecycle::Stopped => return Err(WsError::ContainerStopped),
            }
            if !self.inner.sessions.insert(session.clone()) {
                return Ok(());
            }
        }
        let registry: Weak<ContainerInner> = Arc::downgrade(&self.inner);
        let installed = session.install_removal_hook(move |id| {
            if let Some(inner) = registry.upgrade() {
                inner.sessions.remove(id);
            }
        });
        if installed {
            tracing::debug!(session_id = %session.id(), "session registered");
        } else {
            self.inner.sessions.remove(session.id());
        }
        Ok(())
    }

    /// Starts an asynchronous client connect to `request`'s URI.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::ContainerNotStarted`] or
    /// [`WsError::ContainerStopped`] immediately; every later failure is
    /// reported through the returned handle.
    pub fn connect(
        &self,
        endpoint: impl Into<EndpointAdapter>,
        request: UpgradeRequest,
    ) -> Result<ConnectHandle, WsError> {
        let runtime = self.runtime()?;
        let task = runtime.spawn(coordinator::connect(self.clone(), endpoint.into(), request));
        Ok(ConnectHandle::new(task))
    }

    /// Completes a server-side upgrade on a raw stream and opens a managed
    /// session on it.
    ///
    /// # Errors
    ///
    /// [`WsError::HandshakeFailure`] if the request is not a valid
    /// upgrade, plus the lifecycle errors of [`Container::connect`].
    pub async fn accept<S>(
        &self,
        endpoint: impl Into<EndpointAdapter>,
        config: EndpointConfig,
        stream: S,
    ) -> Result<Session, WsError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.ensure_started()?;
        let (request, mut response, transport) =
            tungstenite::accept(stream, config.sub_protocols(), self.inner.config.inbound_queue_capacity)
                .await?;
        self.open_managed(endpoint.into(), config, request, &mut response, transport)
            .await
    }

    /// Accepts an upgrade whose HTTP exchange is owned by another layer.
    ///
    /// The response is computed from `request` and the endpoint's
    /// subprotocols, and the session opens on `transport`. The caller reads
    /// the response back from [`Session::upgrade_response`] to answer the
    /// HTTP request.
    ///
    /// # Errors
    ///
    /// [`WsError::HandshakeFailure`] if `request` is not a valid upgrade,
    /// plus the lifecycle errors of [`Container::connect`].
    pub async fn accept_upgrade(
        &self,
        endpoint: impl Into<EndpointAdapter>,
        config: EndpointConfig,
        request: UpgradeRequest,
        transport: Transport,
    ) -> Result<Session, WsError> {
        self.ensure_started()?;
        let mut response = match handshake::accept_request(&request, config.sub_protocols()) {
            Ok(response) => response,
            Err(err) => {
                let _ = transport
                    .channel()
                    .close(&CloseStatus::new(CloseStatus::PROTOCOL_ERROR, "upgrade rejected"))
                    .await;
                return Err(err);
            }
        };
        self.open_managed(endpoint.into(), config, request, &mut response, transport)
            .await
    }

    pub(crate) async fn open_managed(
        &self,
        endpoint: EndpointAdapter,
        config: EndpointConfig,
        request: UpgradeRequest,
        response: &mut UpgradeResponse,
        transport: Transport,
    ) -> Result<Session, WsError> {
        let handler = match self.new_frame_handler(endpoint, request, response, config) {
            Ok(handler) => handler,
            Err(err) => {
                let _ = transport.channel().close(&err.to_close_status()).await;
                return Err(err);
            }
        };
        let session = Session::new(self, transport, handler, SessionId::new())?;
        if let Err(err) = self.add_managed(&session) {
            session
                .terminate(CloseStatus::new(CloseStatus::GOING_AWAY, "container stopped"), true)
                .await;
            return Err(err);
        }
        Ok(session)
    }

    /// Summaries of the managed sessions, oldest first.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.inner.sessions.list()
    }

    /// Looks a managed session up by id.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.inner.sessions.get(id)
    }

    /// Number of managed sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }
}
