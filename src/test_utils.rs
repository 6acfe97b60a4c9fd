//! Fixtures shared by the unit tests: a recording endpoint, scripted and
//! loopback connectors, raw peers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channel::memory::{self, MemoryChannel};
use crate::channel::{CoreSessionChannel, InboundEvent, Transport};
use crate::config::ContainerConfig;
use crate::container::Container;
use crate::domain::{CloseStatus, Frame, Payload, SessionId, UpgradeRequest, UpgradeResponse};
use crate::endpoint::{Endpoint, EndpointAdapter, EndpointConfig};
use crate::error::WsError;
use crate::session::Session;
use crate::upgrade::connector::Connector;

pub(crate) const WAIT: Duration = Duration::from_secs(2);

/// Config with short timeouts so failure paths finish quickly.
pub(crate) fn fast_config() -> ContainerConfig {
    ContainerConfig::default()
        .with_close_timeout(Duration::from_millis(200))
        .with_stop_grace_timeout(Duration::from_millis(200))
        .with_connect_timeout(Duration::from_millis(500))
}

/// One endpoint callback, as observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Open,
    Text(String, bool),
    Binary(Vec<u8>, bool),
    Pong(Vec<u8>),
    Error(WsError),
    Close(CloseStatus),
}

/// Shared log of endpoint callbacks.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub(crate) fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub(crate) fn closes(&self) -> Vec<CloseStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Close(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Text(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Polls until `done` holds for the log or `timeout` elapses.
    pub(crate) async fn wait_until(&self, timeout: Duration, done: impl Fn(&[Event]) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if done(&self.events.lock()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub(crate) async fn wait_for_close(&self) -> Option<CloseStatus> {
        self.wait_until(WAIT, |events| events.iter().any(|e| matches!(e, Event::Close(_))))
            .await;
        self.closes().into_iter().next()
    }
}

/// Endpoint that records every callback and can fail or close on demand.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingEndpoint {
    pub(crate) recorder: Recorder,
    fail_on: Option<String>,
    close_on: Option<String>,
}

impl RecordingEndpoint {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Closes the session with 1000 "bye" from inside `on_text`.
    pub(crate) fn closing_on(text: &str) -> Self {
        Self {
            close_on: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn failing_on(text: &str) -> Self {
        Self {
            fail_on: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn adapter(&self) -> EndpointAdapter {
        EndpointAdapter::programmatic(self.clone())
    }
}

#[async_trait]
impl Endpoint for RecordingEndpoint {
    async fn on_open(&self, _session: &Session) -> Result<(), WsError> {
        self.recorder.push(Event::Open);
        Ok(())
    }

    async fn on_text(&self, session: &Session, text: String, last: bool) -> Result<(), WsError> {
        self.recorder.push(Event::Text(text.clone(), last));
        if self.fail_on.as_deref() == Some(text.as_str()) {
            return Err(anyhow::anyhow!("refusing {text}").into());
        }
        if self.close_on.as_deref() == Some(text.as_str()) {
            session.close(CloseStatus::NORMAL, "bye").await?;
        }
        Ok(())
    }

    async fn on_binary(&self, _session: &Session, data: Vec<u8>, last: bool) -> Result<(), WsError> {
        self.recorder.push(Event::Binary(data, last));
        Ok(())
    }

    async fn on_pong(&self, _session: &Session, data: Vec<u8>) -> Result<(), WsError> {
        self.recorder.push(Event::Pong(data));
        Ok(())
    }

    async fn on_error(&self, _session: &Session, error: &WsError) {
        self.recorder.push(Event::Error(error.clone()));
    }

    async fn on_close(&self, _session: &Session, status: &CloseStatus) {
        self.recorder.push(Event::Close(status.clone()));
    }
}

/// The far end of a memory transport, driven by hand.
#[derive(Debug)]
pub(crate) struct RawPeer {
    pub(crate) channel: Arc<dyn CoreSessionChannel>,
    pub(crate) inbound: mpsc::Receiver<InboundEvent>,
}

impl RawPeer {
    pub(crate) async fn send(&self, frame: Frame) {
        let Ok(()) = self.channel.send_frame(frame).await else {
            panic!("raw peer write failed");
        };
    }

    pub(crate) async fn next(&mut self) -> Option<InboundEvent> {
        tokio::time::timeout(WAIT, self.inbound.recv()).await.ok().flatten()
    }

    /// Next frame that is not a pong.
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.next().await? {
                InboundEvent::Frame(Frame::Message {
                    payload: Payload::Pong(_),
                    ..
                }) => {}
                InboundEvent::Frame(frame) => return Some(frame),
                _ => return None,
            }
        }
    }
}

/// Memory transport for a session plus the raw peer on the other side.
pub(crate) fn raw_pair() -> (Transport, Arc<MemoryChannel>, RawPeer) {
    raw_pair_with_capacity(64)
}

/// [`raw_pair`] with `capacity` frames of buffering in each direction.
pub(crate) fn raw_pair_with_capacity(capacity: usize) -> (Transport, Arc<MemoryChannel>, RawPeer) {
    let ((local, local_handle), (remote, _)) = memory::pair(capacity);
    let (channel, inbound) = remote.into_parts();
    let Some(inbound) = inbound else {
        panic!("memory transport without inbound stream");
    };
    (local, local_handle, RawPeer { channel, inbound })
}

/// Started container that cannot dial out.
pub(crate) fn started_container(config: ContainerConfig) -> Container {
    let container = Container::with_connector(config, ScriptedConnector::accepting());
    let Ok(()) = container.start() else {
        panic!("container failed to start");
    };
    container
}

/// Opens a managed session for `endpoint` on `transport`.
pub(crate) fn open_session(
    container: &Container,
    endpoint: EndpointAdapter,
    transport: Transport,
) -> Session {
    let mut response = UpgradeResponse::new(101);
    let Ok(handler) = container.new_frame_handler(
        endpoint,
        UpgradeRequest::default(),
        &mut response,
        EndpointConfig::default(),
    ) else {
        panic!("frame handler rejected");
    };
    let Ok(session) = Session::new(container, transport, handler, SessionId::new()) else {
        panic!("session creation failed");
    };
    let Ok(()) = container.add_managed(&session) else {
        panic!("registration failed");
    };
    session
}

type Respond = Arc<dyn Fn(&UpgradeRequest) -> UpgradeResponse + Send + Sync>;

/// Connector answering with a canned response over a memory transport.
#[derive(Clone)]
pub(crate) struct ScriptedConnector {
    respond: Respond,
    pub(crate) channels: Arc<Mutex<Vec<Arc<MemoryChannel>>>>,
}

impl std::fmt::Debug for ScriptedConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedConnector").finish_non_exhaustive()
    }
}

impl ScriptedConnector {
    pub(crate) fn new(respond: impl Fn(&UpgradeRequest) -> UpgradeResponse + Send + Sync + 'static) -> Self {
        Self {
            respond: Arc::new(respond),
            channels: Arc::default(),
        }
    }

    /// Answers with a well-formed 101 and no subprotocol.
    pub(crate) fn accepting() -> Self {
        Self::new(|request| {
            let Ok(response) = crate::upgrade::handshake::accept_request(request, &[]) else {
                panic!("prepared request rejected");
            };
            response
        })
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, request: &UpgradeRequest) -> Result<(UpgradeResponse, Transport), WsError> {
        let ((local, handle), _remote) = memory::pair(8);
        self.channels.lock().push(handle);
        Ok(((self.respond)(request), local))
    }
}

/// Connector that never answers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HangingConnector;

#[async_trait]
impl Connector for HangingConnector {
    async fn connect(&self, _request: &UpgradeRequest) -> Result<(UpgradeResponse, Transport), WsError> {
        std::future::pending().await
    }
}

/// Connector that upgrades into another container over a memory pair.
#[derive(Clone)]
pub(crate) struct LoopbackConnector {
    server: Container,
    endpoint: Arc<dyn Fn() -> EndpointAdapter + Send + Sync>,
    config: EndpointConfig,
}

impl std::fmt::Debug for LoopbackConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackConnector")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl LoopbackConnector {
    pub(crate) fn new(
        server: Container,
        config: EndpointConfig,
        endpoint: impl Fn() -> EndpointAdapter + Send + Sync + 'static,
    ) -> Self {
        Self {
            server,
            endpoint: Arc::new(endpoint),
            config,
        }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, request: &UpgradeRequest) -> Result<(UpgradeResponse, Transport), WsError> {
        let ((client, _), (server, _)) = memory::pair(64);
        let session = self
            .server
            .accept_upgrade((self.endpoint)(), self.config.clone(), request.clone(), server)
            .await?;
        Ok((session.upgrade_response().clone(), client))
    }
}
