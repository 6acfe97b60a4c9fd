//! HTTP upgrade request/response metadata.
//!
//! Both types are built up while a handshake is in flight and become
//! read-only once a [`crate::Session`] owns them. Headers live in an
//! [`http::HeaderMap`], so names compare case-insensitively.

use tokio_tungstenite::tungstenite::http::header::{
    IntoHeaderName, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::tungstenite::http::{self, HeaderMap, HeaderValue};

use crate::error::WsError;

/// Client side of an upgrade: target and offered subprotocols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    uri: String,
    sub_protocols: Vec<String>,
    headers: HeaderMap,
}

impl UpgradeRequest {
    /// Creates a request for `uri` with no subprotocols.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Sets the offered subprotocols, in client preference order.
    #[must_use]
    pub fn with_sub_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_sub_protocols(protocols);
        self
    }

    /// Adds an extra header.
    #[must_use]
    pub fn with_header(mut self, name: impl IntoHeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the headers wholesale.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the offered subprotocols, in client preference order.
    pub fn set_sub_protocols<I, S>(&mut self, protocols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_protocols = protocols.into_iter().map(Into::into).collect();
    }

    /// Target URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Offered subprotocols, in client preference order.
    #[must_use]
    pub fn sub_protocols(&self) -> &[String] {
        &self.sub_protocols
    }

    /// Request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The `Sec-WebSocket-Key` header, if set.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        header_str(&self.headers, SEC_WEBSOCKET_KEY)
    }
}

/// Server side of an upgrade: status, headers and the negotiated
/// subprotocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeResponse {
    status: u16,
    headers: HeaderMap,
    accepted_sub_protocol: Option<String>,
}

impl UpgradeResponse {
    /// Creates a response with the given HTTP status.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl IntoHeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the headers wholesale.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The `Sec-WebSocket-Accept` header, if present.
    #[must_use]
    pub fn accept_key(&self) -> Option<&str> {
        header_str(&self.headers, SEC_WEBSOCKET_ACCEPT)
    }

    /// The subprotocol recorded by negotiation, if any.
    #[must_use]
    pub fn accepted_sub_protocol(&self) -> Option<&str> {
        self.accepted_sub_protocol.as_deref()
    }

    /// Records the negotiated subprotocol and mirrors it into the
    /// `Sec-WebSocket-Protocol` header.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::HandshakeFailure`] if `protocol` is not a valid
    /// header value.
    pub fn set_accepted_sub_protocol(&mut self, protocol: Option<String>) -> Result<(), WsError> {
        match &protocol {
            Some(p) => {
                let value = HeaderValue::from_str(p).map_err(|err| {
                    WsError::HandshakeFailure(format!("subprotocol {p:?}: {err}"))
                })?;
                self.headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
            }
            None => {
                self.headers.remove(SEC_WEBSOCKET_PROTOCOL);
            }
        }
        self.accepted_sub_protocol = protocol;
        Ok(())
    }
}

/// First value of `name` as text; non-ASCII values read as absent.
fn header_str(headers: &HeaderMap, name: http::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
