//! Transport adapter over `tokio-tungstenite`.
//!
//! [`transport`] splits a [`WebSocketStream`] into a
//! [`TungsteniteChannel`] (write half) and a pump task that turns incoming
//! messages into [`InboundEvent`]s. [`TungsteniteConnector`] performs the
//! client upgrade and [`accept`] consumes a server-side one.
//!
//! The client exchange is written and parsed here rather than through
//! `connect_async`, which would apply tungstenite's own response checks.
//! Judging the response is left to [`handshake::validate_response`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::HOST;
use tokio_tungstenite::tungstenite::http::uri::PathAndQuery;
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use tokio_tungstenite::tungstenite::protocol::frame::Frame as WireFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::{self, Message};

use super::{CoreSessionChannel, InboundEvent, Transport};
use crate::domain::{CloseStatus, Frame, Payload, UpgradeRequest, UpgradeResponse};
use crate::error::WsError;
use crate::upgrade::connector::Connector;
use crate::upgrade::handshake::{self, SEC_WEBSOCKET_PROTOCOL};

/// Upper bound on the size of an upgrade response head.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;
/// Upper bound on the number of upgrade response headers.
const MAX_RESPONSE_HEADERS: usize = 64;

struct Writer<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    /// Opcode of the message currently being sent in fragments.
    fragmenting: Option<Data>,
}

/// Write half of a `tokio-tungstenite` connection.
pub struct TungsteniteChannel<S> {
    writer: Mutex<Writer<S>>,
    open: Arc<AtomicBool>,
}

impl<S> fmt::Debug for TungsteniteChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TungsteniteChannel")
            .field("open", &self.open.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<S> Writer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn to_message(&mut self, frame: Frame) -> Message {
        match frame {
            Frame::Ping(data) => Message::Ping(Bytes::from(data)),
            Frame::Close(status) => Message::Close(close_frame(&status)),
            Frame::Message {
                payload: Payload::Pong(data),
                ..
            } => Message::Pong(Bytes::from(data)),
            Frame::Message { payload, fin } if fin && self.fragmenting.is_none() => match payload {
                Payload::Text(text) => Message::text(text),
                Payload::Binary(data) | Payload::Pong(data) => Message::binary(data),
            },
            Frame::Message { payload, fin } => {
                let (kind, data) = match payload {
                    Payload::Text(text) => (Data::Text, Bytes::from(text.into_bytes())),
                    Payload::Binary(data) | Payload::Pong(data) => (Data::Binary, Bytes::from(data)),
                };
                let opcode = match self.fragmenting {
                    Some(_) => Data::Continue,
                    None => kind,
                };
                self.fragmenting = if fin { None } else { Some(kind) };
                Message::Frame(WireFrame::message(data, OpCode::Data(opcode), fin))
            }
        }
    }
}

fn close_frame(status: &CloseStatus) -> Option<CloseFrame> {
    if status.code() == CloseStatus::NO_STATUS {
        return None;
    }
    Some(CloseFrame {
        code: CloseCode::from(status.code()),
        reason: status.wire_reason().to_owned().into(),
    })
}

#[async_trait]
impl<S> CoreSessionChannel for TungsteniteChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_frame(&self, frame: Frame) -> Result<(), WsError> {
        let mut writer = self.writer.lock().await;
        let message = writer.to_message(frame);
        writer.sink.send(message).await.map_err(|err| {
            tracing::debug!(?err, "failed to write websocket frame");
            WsError::Write(err.to_string())
        })
    }

    async fn close(&self, status: &CloseStatus) -> Result<(), WsError> {
        self.open.store(false, Ordering::Release);
        let mut writer = self.writer.lock().await;
        match writer.sink.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                tracing::trace!(%status, "websocket transport closed");
                Ok(())
            }
            Err(err) => Err(WsError::Transport(err.to_string())),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// tungstenite queues the Pong for every Ping and the reply to a
    /// peer's Close on its own.
    fn answers_control_frames(&self) -> bool {
        true
    }
}

/// Maps one item of the websocket stream to an inbound event.
fn inbound_event(item: Result<Message, tungstenite::Error>) -> Option<InboundEvent> {
    let frame = match item {
        Ok(Message::Text(text)) => Frame::text(text.as_str()),
        Ok(Message::Binary(data)) => Frame::binary(data.to_vec()),
        Ok(Message::Ping(data)) => Frame::Ping(data.to_vec()),
        Ok(Message::Pong(data)) => Frame::pong(data.to_vec()),
        Ok(Message::Close(Some(close))) => {
            Frame::Close(CloseStatus::new(u16::from(close.code), close.reason.as_str()))
        }
        Ok(Message::Close(None)) => Frame::Close(CloseStatus::new(CloseStatus::NO_STATUS, "")),
        Ok(Message::Frame(_)) => return None,
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
            return Some(InboundEvent::Closed);
        }
        Err(tungstenite::Error::Io(err)) => {
            tracing::debug!(?err, "websocket read failed");
            return Some(InboundEvent::Closed);
        }
        Err(err) => return Some(InboundEvent::ProtocolViolation(err.to_string())),
    };
    Some(InboundEvent::Frame(frame))
}

/// Splits `stream` into a session transport and spawns its inbound pump.
///
/// The pump ends after the stream ends, after the first protocol
/// violation, or once the session stops listening. It always finishes with
/// [`InboundEvent::Closed`] when the receiver is still there.
pub fn transport<S>(stream: WebSocketStream<S>, capacity: usize) -> Transport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut source) = stream.split();
    let open = Arc::new(AtomicBool::new(true));
    let channel = Arc::new(TungsteniteChannel {
        writer: Mutex::new(Writer {
            sink,
            fragmenting: None,
        }),
        open: Arc::clone(&open),
    });
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        let mut ended = false;
        while let Some(item) = source.next().await {
            let Some(event) = inbound_event(item) else {
                continue;
            };
            let last = !matches!(event, InboundEvent::Frame(_));
            ended = matches!(event, InboundEvent::Closed);
            if tx.send(event).await.is_err() {
                return;
            }
            if last {
                break;
            }
        }
        open.store(false, Ordering::Release);
        if !ended {
            let _ = tx.send(InboundEvent::Closed).await;
        }
    });

    Transport::new(channel, Some(rx))
}

/// Client [`Connector`] dialling plain `ws://` URIs over TCP.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    inbound_capacity: usize,
}

impl TungsteniteConnector {
    /// Creates a connector whose transports buffer `inbound_capacity`
    /// events.
    #[must_use]
    pub const fn new(inbound_capacity: usize) -> Self {
        Self { inbound_capacity }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    #[tracing::instrument(level = "info", skip(self, request), fields(uri = request.uri()), err)]
    async fn connect(
        &self,
        request: &UpgradeRequest,
    ) -> Result<(UpgradeResponse, Transport), WsError> {
        let target = Target::parse(request.uri())?;
        let mut stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|err| WsError::Transport(err.to_string()))?;
        stream
            .write_all(&encode_request(request, &target))
            .await
            .map_err(|err| WsError::Transport(err.to_string()))?;

        let (response, rest) = read_response(&mut stream).await?;
        tracing::debug!(status = response.status(), "websocket handshake response");
        let stream = WebSocketStream::from_partially_read(stream, rest, Role::Client, None).await;
        Ok((response, transport(stream, self.inbound_capacity)))
    }
}

/// Where a `ws://` URI points.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    authority: String,
    path: String,
}

impl Target {
    fn parse(uri: &str) -> Result<Self, WsError> {
        let parsed: Uri = uri
            .parse()
            .map_err(|err| WsError::HandshakeFailure(format!("invalid uri {uri:?}: {err}")))?;
        match parsed.scheme_str() {
            Some("ws") => {}
            Some(other) => {
                return Err(WsError::HandshakeFailure(format!(
                    "unsupported scheme {other:?}"
                )));
            }
            None => {
                return Err(WsError::HandshakeFailure(format!("uri {uri:?} has no scheme")));
            }
        }
        let authority = parsed
            .authority()
            .ok_or_else(|| WsError::HandshakeFailure(format!("uri {uri:?} has no host")))?;
        let path = match parsed.path_and_query().map(PathAndQuery::as_str) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => "/".to_string(),
        };
        Ok(Self {
            host: authority
                .host()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string(),
            port: authority.port_u16().unwrap_or(80),
            authority: authority.as_str().to_string(),
            path,
        })
    }
}

/// Serializes the upgrade request head. `Host` is derived from the URI
/// unless the request carries one.
fn encode_request(request: &UpgradeRequest, target: &Target) -> BytesMut {
    let mut head = BytesMut::with_capacity(256);
    head.put_slice(format!("GET {} HTTP/1.1\r\n", target.path).as_bytes());
    if !request.headers().contains_key(HOST) {
        head.put_slice(format!("Host: {}\r\n", target.authority).as_bytes());
    }
    for (name, value) in request.headers() {
        head.put_slice(name.as_str().as_bytes());
        head.put_slice(b": ");
        head.put_slice(value.as_bytes());
        head.put_slice(b"\r\n");
    }
    head.put_slice(b"\r\n");
    head
}

/// Reads the upgrade response head. Returns it with whatever bytes
/// followed it, which already belong to the websocket stream.
async fn read_response<S>(stream: &mut S) -> Result<(UpgradeResponse, Vec<u8>), WsError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let read = stream
            .read_buf(&mut buf)
            .await
            .map_err(|err| WsError::Transport(err.to_string()))?;
        if read == 0 {
            return Err(WsError::HandshakeFailure(
                "connection closed before the upgrade response".to_string(),
            ));
        }
        if let Some((len, response)) = parse_response(&buf)? {
            let rest = buf.split_off(len);
            return Ok((response, rest.to_vec()));
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(WsError::HandshakeFailure(
                "upgrade response head is too large".to_string(),
            ));
        }
    }
}

/// Parses a complete response head, or returns `None` if more bytes are
/// needed.
fn parse_response(buf: &[u8]) -> Result<Option<(usize, UpgradeResponse)>, WsError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut parsed = httparse::Response::new(&mut slots);
    let len = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => {
            return Err(WsError::HandshakeFailure(format!(
                "malformed upgrade response: {err}"
            )));
        }
    };
    let mut headers = HeaderMap::new();
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|err| WsError::HandshakeFailure(err.to_string()))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|err| WsError::HandshakeFailure(err.to_string()))?;
        headers.append(name, value);
    }
    let status = parsed.code.unwrap_or_default();
    Ok(Some((len, UpgradeResponse::new(status).with_headers(headers))))
}

/// Accepts a server-side upgrade on `stream`.
///
/// Negotiation follows [`handshake::accept_request`]: the first protocol in
/// the client's order that `supported` contains is selected.
///
/// # Errors
///
/// Returns [`WsError::HandshakeFailure`] if the request is not a valid
/// upgrade and [`WsError::Transport`] on I/O failure.
#[tracing::instrument(level = "info", skip_all, err)]
pub async fn accept<S>(
    stream: S,
    supported: &[String],
    inbound_capacity: usize,
) -> Result<(UpgradeRequest, UpgradeResponse, Transport), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut negotiated: Option<(UpgradeRequest, UpgradeResponse)> = None;
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let upgrade_request = UpgradeRequest::new(request.uri().to_string())
            .with_sub_protocols(handshake::offered_protocols(request.headers()))
            .with_headers(request.headers().clone());
        match handshake::accept_request(&upgrade_request, supported) {
            Ok(upgrade_response) => {
                if let Some(value) = upgrade_response.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                    response
                        .headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, value.clone());
                }
                negotiated = Some((upgrade_request, upgrade_response));
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(%err, "rejecting websocket upgrade");
                let mut rejection = ErrorResponse::new(Some(err.to_string()));
                *rejection.status_mut() = StatusCode::BAD_REQUEST;
                Err(rejection)
            }
        }
    };

    let stream = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .map_err(map_handshake_error)?;
    let (request, response) = negotiated
        .ok_or_else(|| WsError::Internal("upgrade callback did not run".to_string()))?;
    Ok((request, response, transport(stream, inbound_capacity)))
}

fn map_handshake_error(err: tungstenite::Error) -> WsError {
    match err {
        tungstenite::Error::Io(err) => WsError::Transport(err.to_string()),
        other => WsError::HandshakeFailure(other.to_string()),
    }
}
