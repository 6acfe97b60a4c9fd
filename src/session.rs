//! The application-facing session handle and its lifecycle.
//!
//! A [`Session`] is a cheap clonable handle. Behind it run two tasks:
//!
//! - the reader, which consumes the transport's inbound events, answers
//!   pings, tracks the peer's side of the close handshake and queues
//!   messages for dispatch;
//! - the dispatcher, which owns the [`FrameHandler`] and delivers events to
//!   the endpoint in order.
//!
//! # State machine
//!
//! ```text
//! Connecting ──bind──▶ Open ──close()/peer Close/error──▶ Closing ──on_close delivered──▶ Closed
//! ```
//!
//! All writes go through one writer lock, so at most one frame is in
//! flight per session and a Close frame is never interleaved with a data
//! frame.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};

use crate::channel::{CoreSessionChannel, InboundEvent, Transport};
use crate::container::Container;
use crate::domain::{
    CloseStatus, Frame, Payload, SessionId, SessionState, UpgradeRequest, UpgradeResponse,
};
use crate::endpoint::EndpointConfig;
use crate::error::WsError;
use crate::handler::{DispatchEvent, FrameHandler};

type RemovalFn = Box<dyn FnOnce(SessionId) + Send>;

/// Container hook run once the session has closed.
enum RemovalHook {
    Unset,
    Installed(RemovalFn),
    Fired,
}

/// A live WebSocket session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    request: UpgradeRequest,
    response: UpgradeResponse,
    config: EndpointConfig,
    channel: Arc<dyn CoreSessionChannel>,
    has_inbound: bool,
    close_timeout: Duration,
    opened_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    writer: tokio::sync::Mutex<()>,
    close_frame_sent: AtomicBool,
    peer_close: watch::Sender<Option<CloseStatus>>,
    finisher: parking_lot::Mutex<Option<oneshot::Sender<CloseStatus>>>,
    removal: parking_lot::Mutex<RemovalHook>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("sub_protocol", &self.sub_protocol())
            .field("channel", &self.inner.channel)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session around `transport`, binds `frame_handler` to it
    /// and starts its reader and dispatcher on the container's runtime.
    ///
    /// The session is `Open` when this returns; the endpoint's `on_open`
    /// runs on the dispatcher before any other callback. The session is
    /// not registered with the container: see [`Container::add_managed`].
    ///
    /// # Errors
    ///
    /// Returns [`WsError::ContainerNotStarted`] or
    /// [`WsError::ContainerStopped`] if `container` is not started.
    pub fn new(
        container: &Container,
        transport: Transport,
        frame_handler: FrameHandler,
        id: SessionId,
    ) -> Result<Self, WsError> {
        let runtime: Handle = container.runtime()?;
        let config = container.config();
        let (channel, inbound) = transport.into_parts();
        let (finished_tx, finished_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(config.dispatch_queue_capacity.max(1));

        let session = Self {
            inner: Arc::new(SessionInner {
                id,
                request: frame_handler.upgrade_request().clone(),
                response: frame_handler.upgrade_response().clone(),
                config: frame_handler.endpoint_config().clone(),
                channel: Arc::clone(&channel),
                has_inbound: inbound.is_some(),
                close_timeout: config.close_timeout,
                opened_at: Utc::now(),
                state: watch::channel(SessionState::Connecting).0,
                writer: tokio::sync::Mutex::new(()),
                close_frame_sent: AtomicBool::new(false),
                peer_close: watch::channel(None).0,
                finisher: parking_lot::Mutex::new(Some(finished_tx)),
                removal: parking_lot::Mutex::new(RemovalHook::Unset),
            }),
        };

        session.inner.state.send_replace(SessionState::Open);
        runtime.spawn(frame_handler.run(session.clone(), events_rx, finished_rx));
        match inbound {
            Some(inbound) => {
                runtime.spawn(session.clone().read_loop(inbound, events_tx));
            }
            None => drop(events_tx),
        }
        tracing::debug!(session_id = %id, "session bound");
        Ok(session)
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Shorthand for `state() == SessionState::Open`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// The upgrade request the session was created from.
    #[must_use]
    pub fn upgrade_request(&self) -> &UpgradeRequest {
        &self.inner.request
    }

    /// The upgrade response, carrying the negotiated subprotocol.
    #[must_use]
    pub fn upgrade_response(&self) -> &UpgradeResponse {
        &self.inner.response
    }

    /// The negotiated subprotocol, if any.
    #[must_use]
    pub fn sub_protocol(&self) -> Option<&str> {
        self.inner.response.accepted_sub_protocol()
    }

    /// The endpoint configuration snapshot.
    #[must_use]
    pub fn endpoint_config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    /// The channel the session writes through.
    #[must_use]
    pub fn channel(&self) -> &Arc<dyn CoreSessionChannel> {
        &self.inner.channel
    }

    /// When the session was bound.
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.inner.opened_at
    }

    /// Serializable snapshot of this session.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo::from(self)
    }

    /// Sends a data message (or fragment, when `last` is `false`).
    ///
    /// Resolves once the channel accepted the frame. Concurrent sends are
    /// serialized.
    ///
    /// # Errors
    ///
    /// - [`WsError::SessionClosed`] if the session is closing or closed;
    ///   nothing is written.
    /// - [`WsError::SessionNotOpen`] before the session opened.
    /// - [`WsError::Write`] if the channel refused the frame.
    pub async fn send(&self, payload: Payload, last: bool) -> Result<(), WsError> {
        self.write(Frame::Message { payload, fin: last }).await
    }

    /// Sends a complete text message.
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), WsError> {
        self.send(Payload::Text(text.into()), true).await
    }

    /// Sends a complete binary message.
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), WsError> {
        self.send(Payload::Binary(data.into()), true).await
    }

    /// Sends a ping.
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub async fn send_ping(&self, data: impl Into<Vec<u8>>) -> Result<(), WsError> {
        self.write(Frame::Ping(data.into())).await
    }

    /// Sends an unsolicited pong.
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub async fn send_pong(&self, data: impl Into<Vec<u8>>) -> Result<(), WsError> {
        self.write(Frame::pong(data.into())).await
    }

    async fn write(&self, frame: Frame) -> Result<(), WsError> {
        let _writer = self.inner.writer.lock().await;
        match self.state() {
            SessionState::Open => self.inner.channel.send_frame(frame).await,
            SessionState::Connecting => Err(WsError::SessionNotOpen),
            SessionState::Closing | SessionState::Closed => Err(WsError::SessionClosed),
        }
    }

    /// Starts the closing handshake with `code` and `reason`.
    ///
    /// # Errors
    ///
    /// See [`Session::close_with`].
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), WsError> {
        self.close_with(CloseStatus::new(code, reason)).await
    }

    /// Starts the closing handshake.
    ///
    /// Waits for an in-flight send, writes exactly one Close frame, then
    /// waits up to the configured close timeout for the peer's Close or
    /// the end of the transport. When the wait times out the channel is
    /// closed anyway and `on_close` sees 1006. A caller racing an ongoing
    /// close waits for that close to finish instead of writing again.
    ///
    /// # Errors
    ///
    /// - [`WsError::SessionClosed`] if the session is already `Closed`.
    /// - [`WsError::CloseHandshakeTimeout`] when racing an ongoing close
    ///   that does not finish in time.
    pub async fn close_with(&self, status: CloseStatus) -> Result<(), WsError> {
        if !self.begin_closing() {
            if self.state() == SessionState::Closed {
                return Err(WsError::SessionClosed);
            }
            return if self.await_close(self.inner.close_timeout * 2).await {
                Ok(())
            } else {
                Err(WsError::CloseHandshakeTimeout)
            };
        }

        tracing::debug!(session_id = %self.inner.id, %status, "closing session");
        if let Err(err) = self.send_close_frame(&status).await {
            tracing::warn!(session_id = %self.inner.id, %err, "failed to send close frame");
            self.shutdown(CloseStatus::abnormal(err.to_string())).await;
            return Ok(());
        }

        let status = if self.inner.has_inbound && !self.await_peer_close().await {
            tracing::warn!(
                session_id = %self.inner.id,
                timeout_ms = self.inner.close_timeout.as_millis(),
                "peer did not acknowledge close"
            );
            CloseStatus::abnormal(WsError::CloseHandshakeTimeout.to_string())
        } else {
            status
        };
        self.shutdown(status).await;
        Ok(())
    }

    /// Waits until the session is `Closed`, meaning `on_close` has been
    /// delivered. Returns `false` if `timeout` elapsed first.
    pub async fn await_close(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.subscribe();
        tokio::time::timeout(timeout, async move {
            state
                .wait_for(|state| *state == SessionState::Closed)
                .await
                .is_ok()
        })
        .await
        .unwrap_or(false)
    }

    /// Moves `Connecting`/`Open` to `Closing`. Returns `true` for the
    /// caller that made the move.
    fn begin_closing(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if matches!(*state, SessionState::Connecting | SessionState::Open) {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        })
    }

    /// Writes the session's single Close frame. Later calls are no-ops.
    async fn send_close_frame(&self, status: &CloseStatus) -> Result<(), WsError> {
        let _writer = self.inner.writer.lock().await;
        if self.inner.close_frame_sent.swap(true, Ordering::AcqRel) || !self.inner.channel.is_open()
        {
            return Ok(());
        }
        let wire = if status.is_local_only() {
            CloseStatus::new(CloseStatus::NO_STATUS, "")
        } else {
            status.clone()
        };
        self.inner.channel.send_frame(Frame::Close(wire)).await
    }

    async fn await_peer_close(&self) -> bool {
        let mut peer = self.inner.peer_close.subscribe();
        tokio::time::timeout(self.inner.close_timeout, async move {
            peer.wait_for(Option::is_some).await.is_ok()
        })
        .await
        .unwrap_or(false)
    }

    /// Closes the channel and hands the final status to the dispatcher.
    async fn shutdown(&self, status: CloseStatus) {
        if let Err(err) = self.inner.channel.close(&status).await {
            tracing::debug!(session_id = %self.inner.id, %err, "channel close failed");
        }
        self.finish(status);
    }

    /// Closes without waiting for the peer.
    ///
    /// With `send_close` a Close frame carrying `status` is written first
    /// (unless one went out already). Used for protocol violations,
    /// failed callbacks and container shutdown.
    pub(crate) async fn terminate(&self, status: CloseStatus, send_close: bool) {
        self.begin_closing();
        if send_close && let Err(err) = self.send_close_frame(&status).await {
            tracing::debug!(session_id = %self.inner.id, %err, "failed to send close frame");
        }
        self.shutdown(status).await;
    }

    fn finish(&self, status: CloseStatus) {
        let finisher = self.inner.finisher.lock().take();
        if let Some(finisher) = finisher
            && finisher.send(status).is_err()
        {
            self.mark_closed();
        }
    }

    /// Runs the removal hook and enters `Closed`. Called by the dispatcher
    /// after `on_close` returned.
    pub(crate) fn mark_closed(&self) {
        let hook = std::mem::replace(&mut *self.inner.removal.lock(), RemovalHook::Fired);
        if let RemovalHook::Installed(remove) = hook {
            remove(self.inner.id);
        }
        self.inner.state.send_replace(SessionState::Closed);
    }

    /// Installs the hook the container uses to forget this session.
    /// Returns `false` if the session already closed.
    pub(crate) fn install_removal_hook(&self, hook: impl FnOnce(SessionId) + Send + 'static) -> bool {
        let mut slot = self.inner.removal.lock();
        if matches!(*slot, RemovalHook::Fired) {
            return false;
        }
        *slot = RemovalHook::Installed(Box::new(hook));
        true
    }

    /// Queues `event` for the dispatcher while the session is `Open`.
    ///
    /// Once the session leaves `Open`, also while blocked on a full queue,
    /// the event is dropped so the reader gets to the peer's Close. Returns
    /// `false` when the dispatcher is gone.
    async fn enqueue(&self, events: &mpsc::Sender<DispatchEvent>, event: DispatchEvent) -> bool {
        let left_open = wait_state(self.inner.state.subscribe(), |state| !state.is_open());
        tokio::select! {
            biased;
            () = left_open => {
                tracing::trace!(session_id = %self.inner.id, "session closing, inbound event dropped");
                true
            }
            sent = events.send(event) => sent.is_ok(),
        }
    }

    /// Reader task body.
    async fn read_loop(
        self,
        mut inbound: mpsc::Receiver<InboundEvent>,
        events: mpsc::Sender<DispatchEvent>,
    ) {
        let closed = wait_state(self.inner.state.subscribe(), |state| {
            *state == SessionState::Closed
        });
        tokio::pin!(closed);

        loop {
            let event = tokio::select! {
                event = inbound.recv() => event,
                () = &mut closed => break,
            };
            match event {
                Some(InboundEvent::Frame(Frame::Message { payload, fin })) => {
                    let event = DispatchEvent::Message { payload, last: fin };
                    if !self.enqueue(&events, event).await {
                        break;
                    }
                }
                Some(InboundEvent::Frame(Frame::Ping(data))) => {
                    if !self.inner.channel.answers_control_frames()
                        && let Err(err) = self.write(Frame::pong(data)).await
                    {
                        tracing::trace!(session_id = %self.inner.id, %err, "pong not sent");
                    }
                }
                Some(InboundEvent::Frame(Frame::Close(status))) => self.on_peer_close(status).await,
                Some(InboundEvent::ProtocolViolation(reason)) => {
                    let err = WsError::ProtocolViolation(reason);
                    tracing::warn!(session_id = %self.inner.id, %err, "closing on protocol violation");
                    let status = err.to_close_status();
                    self.enqueue(&events, DispatchEvent::Error(err)).await;
                    self.terminate(status, true).await;
                    break;
                }
                Some(InboundEvent::Closed) | None => {
                    self.on_transport_closed().await;
                    break;
                }
            }
        }
        tracing::trace!(session_id = %self.inner.id, "reader finished");
    }

    async fn on_peer_close(&self, status: CloseStatus) {
        self.inner.peer_close.send_replace(Some(status.clone()));
        if !self.begin_closing() {
            tracing::trace!(session_id = %self.inner.id, %status, "close acknowledged by peer");
            return;
        }
        tracing::debug!(session_id = %self.inner.id, %status, "peer initiated close");
        if self.inner.channel.answers_control_frames() {
            self.inner.close_frame_sent.store(true, Ordering::Release);
        } else if let Err(err) = self.send_close_frame(&status).await {
            tracing::debug!(session_id = %self.inner.id, %err, "failed to echo close frame");
        }
        self.shutdown(status).await;
    }

    async fn on_transport_closed(&self) {
        self.inner.peer_close.send_if_modified(|peer| {
            if peer.is_none() {
                *peer = Some(CloseStatus::abnormal("transport closed"));
                true
            } else {
                false
            }
        });
        if self.begin_closing() {
            tracing::warn!(session_id = %self.inner.id, "transport closed without close handshake");
            self.shutdown(CloseStatus::abnormal("transport closed")).await;
        }
    }
}

async fn wait_state(
    mut state: watch::Receiver<SessionState>,
    done: impl FnMut(&SessionState) -> bool,
) {
    let _ = state.wait_for(done).await.is_ok();
}

/// Serializable view of a session for listings and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Lifecycle state at snapshot time.
    pub state: SessionState,
    /// Request URI of the upgrade.
    pub uri: String,
    /// Negotiated subprotocol.
    pub sub_protocol: Option<String>,
    /// When the session was bound.
    pub opened_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id(),
            state: session.state(),
            uri: session.upgrade_request().uri().to_string(),
            sub_protocol: session.sub_protocol().map(str::to_string),
            opened_at: session.opened_at(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Instant;

    use test_log::test;

    use super::*;
    use crate::channel::empty::EmptyChannel;
    use crate::channel::memory::MemoryChannel;
    use crate::endpoint::{EndpointAdapter, Handlers};
    use crate::test_utils::{
        Event, RecordingEndpoint, WAIT, fast_config, open_session, raw_pair,
        raw_pair_with_capacity, started_container,
    };

    #[test(tokio::test)]
    async fn empty_transport_session_opens_and_closes() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let session = open_session(&container, endpoint.adapter(), Transport::empty());

        assert_eq!(session.state(), SessionState::Open);
        assert!(session.channel().is_open());
        assert_eq!(container.session_count(), 1);

        let Ok(()) = session.close(CloseStatus::NORMAL, "bye").await else {
            panic!("close failed");
        };
        assert!(session.await_close(WAIT).await);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.channel().is_open());
        assert_eq!(
            endpoint.recorder.events(),
            vec![Event::Open, Event::Close(CloseStatus::new(1000, "bye"))]
        );
        assert_eq!(container.session_count(), 0);
    }

    #[test(tokio::test)]
    async fn close_on_closed_session_is_rejected() {
        let container = started_container(fast_config());
        let session = open_session(&container, RecordingEndpoint::new().adapter(), Transport::empty());

        let Ok(()) = session.close(CloseStatus::NORMAL, "").await else {
            panic!("first close failed");
        };
        assert!(session.await_close(WAIT).await);
        assert_eq!(
            session.close(CloseStatus::NORMAL, "").await,
            Err(WsError::SessionClosed)
        );
    }

    #[test(tokio::test)]
    async fn local_close_waits_for_peer_acknowledgement() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let (transport, _, mut peer) = raw_pair();
        let session = open_session(&container, endpoint.adapter(), transport);

        let closer = session.clone();
        let close = tokio::spawn(async move { closer.close(CloseStatus::NORMAL, "done").await });

        let Some(Frame::Close(status)) = peer.next_frame().await else {
            panic!("expected a close frame");
        };
        assert_eq!(status, CloseStatus::new(1000, "done"));
        assert_eq!(session.state(), SessionState::Closing);

        peer.send(Frame::Close(CloseStatus::new(1000, ""))).await;
        let Ok(Ok(())) = close.await else {
            panic!("close did not complete");
        };
        assert!(session.await_close(WAIT).await);
        assert_eq!(endpoint.recorder.closes(), vec![CloseStatus::new(1000, "done")]);
    }

    #[test(tokio::test)]
    async fn close_from_callback_still_reads_peer_acknowledgement() {
        let container = started_container(fast_config().with_dispatch_queue_capacity(2));
        let endpoint = RecordingEndpoint::closing_on("quit");
        let (transport, handle, mut peer) = raw_pair();
        let session = open_session(&container, endpoint.adapter(), transport);

        peer.send(Frame::text("quit")).await;
        for i in 0..4 {
            peer.send(Frame::text(format!("after {i}"))).await;
        }
        let Some(Frame::Close(status)) = peer.next_frame().await else {
            panic!("expected a close frame");
        };
        assert_eq!(status, CloseStatus::new(1000, "bye"));
        peer.send(Frame::Close(CloseStatus::normal(""))).await;

        assert_eq!(
            endpoint.recorder.wait_for_close().await,
            Some(CloseStatus::new(1000, "bye"))
        );
        assert!(session.await_close(WAIT).await);
        assert_eq!(handle.close_frames_sent(), 1);
        assert_eq!(endpoint.recorder.texts().first().map(String::as_str), Some("quit"));
    }

    #[test(tokio::test)]
    async fn await_close_returns_false_while_open() {
        let container = started_container(fast_config());
        let (transport, _, _peer) = raw_pair();
        let session = open_session(&container, RecordingEndpoint::new().adapter(), transport);

        assert!(!session.await_close(Duration::from_millis(50)).await);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test(tokio::test)]
    async fn send_while_closing_is_rejected() {
        let container = started_container(fast_config());
        let (transport, handle, mut peer) = raw_pair();
        let session = open_session(&container, RecordingEndpoint::new().adapter(), transport);

        let closer = session.clone();
        let close = tokio::spawn(async move { closer.close(CloseStatus::NORMAL, "done").await });
        let Some(Frame::Close(_)) = peer.next_frame().await else {
            panic!("expected a close frame");
        };
        assert_eq!(session.state(), SessionState::Closing);

        let written = handle.frames_sent();
        assert_eq!(session.send_text("late").await, Err(WsError::SessionClosed));
        assert_eq!(session.send_ping(vec![1]).await, Err(WsError::SessionClosed));
        assert_eq!(handle.frames_sent(), written);

        peer.send(Frame::Close(CloseStatus::normal(""))).await;
        let Ok(Ok(())) = close.await else {
            panic!("close did not complete");
        };
    }

    #[test(tokio::test)]
    async fn close_racing_a_blocked_send_keeps_frame_order() {
        let container = started_container(fast_config());
        let (transport, handle, mut peer) = raw_pair_with_capacity(1);
        let session = open_session(&container, RecordingEndpoint::new().adapter(), transport);

        let Ok(()) = session.send_text("one").await else {
            panic!("first send failed");
        };
        let sender = session.clone();
        let send = tokio::spawn(async move { sender.send_text("two").await });
        tokio::task::yield_now().await;
        let closer = session.clone();
        let close = tokio::spawn(async move { closer.close(CloseStatus::NORMAL, "done").await });
        tokio::task::yield_now().await;

        let mut frames = Vec::new();
        loop {
            let Some(frame) = peer.next_frame().await else {
                panic!("peer stream ended before the close frame");
            };
            let done = frame.is_close();
            frames.push(frame);
            if done {
                break;
            }
        }
        peer.send(Frame::Close(CloseStatus::normal(""))).await;

        let (Ok(sent), Ok(Ok(()))) = (send.await, close.await) else {
            panic!("send or close task failed");
        };
        let mut expected = vec![Frame::text("one")];
        match sent {
            Ok(()) => expected.push(Frame::text("two")),
            Err(err) => assert_eq!(err, WsError::SessionClosed),
        }
        expected.push(Frame::Close(CloseStatus::new(1000, "done")));
        assert_eq!(frames, expected);
        assert_eq!(handle.close_frames_sent(), 1);
        assert!(session.await_close(WAIT).await);
    }

    #[test(tokio::test)]
    async fn send_after_close_fails_without_writing() {
        let container = started_container(fast_config());
        let (transport, handle, mut peer) = raw_pair();
        let session = open_session(&container, RecordingEndpoint::new().adapter(), transport);

        let Ok(()) = session.send_text("hello").await else {
            panic!("send failed while open");
        };
        let Some(Frame::Message {
            payload: Payload::Text(text),
            fin: true,
        }) = peer.next_frame().await
        else {
            panic!("expected the text frame");
        };
        assert_eq!(text, "hello");

        peer.send(Frame::Close(CloseStatus::normal(""))).await;
        assert!(session.await_close(WAIT).await);

        let written = handle.frames_sent();
        assert_eq!(session.send_text("late").await, Err(WsError::SessionClosed));
        assert_eq!(session.send_binary(vec![1, 2]).await, Err(WsError::SessionClosed));
        assert_eq!(handle.frames_sent(), written);
    }

    #[test(tokio::test)]
    async fn concurrent_closes_send_one_close_frame() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let (transport, handle, mut peer) = raw_pair();
        let session = open_session(&container, endpoint.adapter(), transport);

        let (a, b) = (session.clone(), session.clone());
        let first = tokio::spawn(async move { a.close(CloseStatus::NORMAL, "a").await });
        let second = tokio::spawn(async move { b.close(CloseStatus::NORMAL, "b").await });

        let Some(Frame::Close(_)) = peer.next_frame().await else {
            panic!("expected a close frame");
        };
        peer.send(Frame::Close(CloseStatus::normal(""))).await;

        let (Ok(Ok(())), Ok(Ok(()))) = (first.await, second.await) else {
            panic!("both closes should succeed");
        };
        assert!(session.await_close(WAIT).await);
        assert_eq!(handle.close_frames_sent(), 1);
        assert_eq!(endpoint.recorder.closes().len(), 1);
    }

    #[test(tokio::test)]
    async fn silent_peer_times_out_to_abnormal_closure() {
        let config = fast_config();
        let close_timeout = config.close_timeout;
        let container = started_container(config);
        let endpoint = RecordingEndpoint::new();
        let (transport, _, _peer) = raw_pair();
        let session = open_session(&container, endpoint.adapter(), transport);

        let started = Instant::now();
        let Ok(()) = session.close(CloseStatus::NORMAL, "").await else {
            panic!("close failed");
        };
        assert!(started.elapsed() >= close_timeout);
        assert!(session.await_close(WAIT).await);
        let Some(status) = endpoint.recorder.closes().pop() else {
            panic!("on_close not delivered");
        };
        assert_eq!(status.code(), CloseStatus::ABNORMAL);
    }

    #[test(tokio::test)]
    async fn peer_close_is_echoed_and_reported() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let (transport, handle, mut peer) = raw_pair();
        let session = open_session(&container, endpoint.adapter(), transport);

        peer.send(Frame::Close(CloseStatus::new(1001, "leaving"))).await;

        let Some(Frame::Close(echo)) = peer.next_frame().await else {
            panic!("expected the close echo");
        };
        assert_eq!(echo.code(), 1001);
        assert!(session.await_close(WAIT).await);
        assert_eq!(handle.close_frames_sent(), 1);
        assert_eq!(endpoint.recorder.closes(), vec![CloseStatus::new(1001, "leaving")]);
    }

    #[test(tokio::test)]
    async fn ping_is_answered_with_pong() {
        let container = started_container(fast_config());
        let (transport, _, mut peer) = raw_pair();
        let _session = open_session(&container, RecordingEndpoint::new().adapter(), transport);

        peer.send(Frame::Ping(vec![7, 7])).await;
        let Some(InboundEvent::Frame(frame)) = peer.next().await else {
            panic!("expected a pong");
        };
        assert_eq!(frame, Frame::pong(vec![7, 7]));
    }

    /// Memory channel standing in for a transport that answers Ping and
    /// Close by itself.
    #[derive(Debug)]
    struct SelfAnswering(Arc<MemoryChannel>);

    #[async_trait::async_trait]
    impl CoreSessionChannel for SelfAnswering {
        async fn send_frame(&self, frame: Frame) -> Result<(), WsError> {
            self.0.send_frame(frame).await
        }

        async fn close(&self, status: &CloseStatus) -> Result<(), WsError> {
            self.0.close(status).await
        }

        fn is_open(&self) -> bool {
            self.0.is_open()
        }

        fn answers_control_frames(&self) -> bool {
            true
        }
    }

    #[test(tokio::test)]
    async fn self_answering_transport_gets_no_duplicate_replies() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let (transport, handle, peer) = raw_pair();
        let (_, inbound) = transport.into_parts();
        let transport = Transport::new(Arc::new(SelfAnswering(Arc::clone(&handle))), inbound);
        let session = open_session(&container, endpoint.adapter(), transport);

        peer.send(Frame::Ping(vec![1])).await;
        peer.send(Frame::Close(CloseStatus::new(1001, "leaving"))).await;
        assert!(session.await_close(WAIT).await);
        assert_eq!(handle.frames_sent(), 0);
        assert_eq!(endpoint.recorder.closes(), vec![CloseStatus::new(1001, "leaving")]);
    }

    #[test(tokio::test)]
    async fn pongs_reach_the_endpoint() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let (transport, _, peer) = raw_pair();
        let _session = open_session(&container, endpoint.adapter(), transport);

        peer.send(Frame::pong(b"beat".to_vec())).await;
        assert!(
            endpoint
                .recorder
                .wait_until(WAIT, |events| events.contains(&Event::Pong(b"beat".to_vec())))
                .await
        );
    }

    #[test(tokio::test)]
    async fn messages_are_dispatched_in_arrival_order() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let (transport, _, peer) = raw_pair();
        let _session = open_session(&container, endpoint.adapter(), transport);

        let expected: Vec<String> = (0..50).map(|i| format!("m{i}")).collect();
        for text in &expected {
            peer.send(Frame::text(text.as_str())).await;
        }
        assert!(
            endpoint
                .recorder
                .wait_until(WAIT, |events| events.len() > expected.len())
                .await
        );
        assert_eq!(endpoint.recorder.events().first(), Some(&Event::Open));
        assert_eq!(endpoint.recorder.texts(), expected);
    }

    #[test(tokio::test)]
    async fn fragments_keep_their_last_flag() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let (transport, _, peer) = raw_pair();
        let _session = open_session(&container, endpoint.adapter(), transport);

        peer.send(Frame::Message {
            payload: Payload::Binary(vec![1]),
            fin: false,
        })
        .await;
        peer.send(Frame::binary(vec![2])).await;
        assert!(
            endpoint
                .recorder
                .wait_until(WAIT, |events| events.len() == 3)
                .await
        );
        assert_eq!(
            endpoint.recorder.events(),
            vec![
                Event::Open,
                Event::Binary(vec![1], false),
                Event::Binary(vec![2], true)
            ]
        );
    }

    #[test(tokio::test)]
    async fn protocol_violation_reports_then_closes_with_1002() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let (tx, rx) = mpsc::channel(4);
        let transport = Transport::new(Arc::new(EmptyChannel::new()), Some(rx));
        let session = open_session(&container, endpoint.adapter(), transport);

        let Ok(()) = tx
            .send(InboundEvent::ProtocolViolation("reserved bits set".to_string()))
            .await
        else {
            panic!("reader is gone");
        };
        assert!(session.await_close(WAIT).await);
        assert_eq!(
            endpoint.recorder.events(),
            vec![
                Event::Open,
                Event::Error(WsError::ProtocolViolation("reserved bits set".to_string())),
                Event::Close(CloseStatus::new(
                    1002,
                    "protocol violation: reserved bits set"
                )),
            ]
        );
    }

    #[test(tokio::test)]
    async fn failing_callback_closes_with_1011() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::failing_on("boom");
        let (transport, _, mut peer) = raw_pair();
        let session = open_session(&container, endpoint.adapter(), transport);

        peer.send(Frame::text("boom")).await;
        let Some(Frame::Close(status)) = peer.next_frame().await else {
            panic!("expected a close frame");
        };
        assert_eq!(status.code(), CloseStatus::SERVER_ERROR);
        assert!(session.await_close(WAIT).await);

        let events = endpoint.recorder.events();
        assert!(matches!(events.get(2), Some(Event::Error(WsError::Application(_)))));
        let Some(Event::Close(status)) = events.last() else {
            panic!("on_close not delivered last");
        };
        assert_eq!(status.code(), CloseStatus::SERVER_ERROR);
    }

    #[test(tokio::test)]
    async fn missing_handler_closes_with_1003() {
        let container = started_container(fast_config());
        let (transport, _, mut peer) = raw_pair();
        let endpoint = EndpointAdapter::from(Handlers::new());
        let session = open_session(&container, endpoint, transport);

        peer.send(Frame::text("anyone?")).await;
        let Some(Frame::Close(status)) = peer.next_frame().await else {
            panic!("expected a close frame");
        };
        assert_eq!(status.code(), CloseStatus::UNSUPPORTED_DATA);
        assert!(session.await_close(WAIT).await);
    }

    #[test(tokio::test)]
    async fn transport_loss_closes_abnormally() {
        let container = started_container(fast_config());
        let endpoint = RecordingEndpoint::new();
        let (transport, _, peer) = raw_pair();
        let session = open_session(&container, endpoint.adapter(), transport);

        let Ok(()) = peer.channel.close(&CloseStatus::abnormal("")).await else {
            panic!("peer close failed");
        };
        assert!(session.await_close(WAIT).await);
        let Some(status) = endpoint.recorder.closes().pop() else {
            panic!("on_close not delivered");
        };
        assert_eq!(status.code(), CloseStatus::ABNORMAL);
    }

    #[test(tokio::test)]
    async fn info_serializes_state_and_protocol() {
        let container = started_container(fast_config());
        let session = open_session(&container, RecordingEndpoint::new().adapter(), Transport::empty());

        let Ok(json) = serde_json::to_value(session.info()) else {
            panic!("info did not serialize");
        };
        assert_eq!(json["state"], "open");
        assert_eq!(json["sub_protocol"], serde_json::Value::Null);
        assert_eq!(json["id"], session.id().to_string());
    }
}
