//! RFC 6455 upgrade rules: request preparation, response validation,
//! server-side acceptance and subprotocol negotiation.
//!
//! Accept values and fresh keys come from `tungstenite`'s handshake
//! helpers. Everything else here is pure and synchronous so both the
//! client (`connect`) and server (`accept`) paths share one policy.

use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue};

pub use tokio_tungstenite::tungstenite::http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};

use crate::domain::{UpgradeRequest, UpgradeResponse};
use crate::error::WsError;

/// Protocol version this core speaks.
pub const WEBSOCKET_VERSION: &str = "13";
/// HTTP 101 Switching Protocols.
pub const SWITCHING_PROTOCOLS: u16 = 101;

/// Computes the `Sec-WebSocket-Accept` value for a request key.
#[must_use]
pub fn accept_key_for(key: &str) -> String {
    derive_accept_key(key.as_bytes())
}

/// Fills in the upgrade headers of a client request: `Connection`,
/// `Upgrade`, version, a fresh key and the offered subprotocol list in the
/// caller's preference order.
///
/// # Errors
///
/// Returns [`WsError::HandshakeFailure`] if an offered subprotocol cannot
/// be carried in a header.
pub fn prepare_client_request(request: &mut UpgradeRequest) -> Result<(), WsError> {
    let protocols = request.sub_protocols().join(", ");
    let key = header_value(generate_key())?;
    let headers = request.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static(WEBSOCKET_VERSION));
    headers.insert(SEC_WEBSOCKET_KEY, key);
    if protocols.is_empty() {
        headers.remove(SEC_WEBSOCKET_PROTOCOL);
    } else {
        headers.insert(SEC_WEBSOCKET_PROTOCOL, header_value(protocols)?);
    }
    Ok(())
}

fn header_value(value: String) -> Result<HeaderValue, WsError> {
    HeaderValue::try_from(value).map_err(|err| WsError::HandshakeFailure(err.to_string()))
}

/// Splits a comma-separated `Sec-WebSocket-Protocol` value.
#[must_use]
pub fn parse_protocol_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Every protocol listed across all `Sec-WebSocket-Protocol` values.
#[must_use]
pub fn offered_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(parse_protocol_list)
        .collect()
}

/// `true` if some value of `name` lists `token` (case-insensitive).
fn has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

/// Validates the peer's subprotocol choice against what was offered.
///
/// The peer decides which protocol to pick; the local side only checks the
/// choice is empty or a member of `offered`.
///
/// # Errors
///
/// Returns [`WsError::HandshakeFailure`] if the peer chose more than one
/// protocol or one that was never offered.
pub fn negotiate_sub_protocol(
    offered: &[String],
    chosen: Option<&str>,
) -> Result<Option<String>, WsError> {
    let Some(chosen) = chosen.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    if chosen.contains(',') {
        return Err(WsError::HandshakeFailure(format!(
            "peer selected more than one subprotocol: {chosen}"
        )));
    }
    if offered.iter().any(|p| p == chosen) {
        Ok(Some(chosen.to_string()))
    } else {
        Err(WsError::HandshakeFailure(format!(
            "peer selected subprotocol {chosen:?} which was not offered"
        )))
    }
}

/// The subprotocol a response selected, as text.
///
/// # Errors
///
/// Returns [`WsError::HandshakeFailure`] for repeated or non-ASCII
/// `Sec-WebSocket-Protocol` headers.
pub fn selected_protocol(response: &UpgradeResponse) -> Result<Option<&str>, WsError> {
    let mut values = response.headers().get_all(SEC_WEBSOCKET_PROTOCOL).iter();
    let Some(value) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(WsError::HandshakeFailure(
            "response carries more than one Sec-WebSocket-Protocol header".to_string(),
        ));
    }
    value
        .to_str()
        .map(Some)
        .map_err(|err| WsError::HandshakeFailure(format!("Sec-WebSocket-Protocol: {err}")))
}

/// Checks a client-side handshake response.
///
/// Success is exactly HTTP 101 with the accept value computed from the
/// request key, and at most one subprotocol taken from the offered list.
/// A response that selects no subprotocol is valid whatever was offered.
///
/// # Errors
///
/// Returns [`WsError::HandshakeFailure`] for a non-101 status, a missing
/// or wrong accept value, or an unoffered subprotocol.
pub fn validate_response(
    request: &UpgradeRequest,
    response: &UpgradeResponse,
) -> Result<Option<String>, WsError> {
    if response.status() != SWITCHING_PROTOCOLS {
        return Err(WsError::HandshakeFailure(format!(
            "unexpected HTTP status {}",
            response.status()
        )));
    }
    let key = request.key().ok_or_else(|| {
        WsError::HandshakeFailure("request carries no Sec-WebSocket-Key".to_string())
    })?;
    let accept = response.accept_key().ok_or_else(|| {
        WsError::HandshakeFailure("response is missing Sec-WebSocket-Accept".to_string())
    })?;
    if accept.trim() != accept_key_for(key) {
        return Err(WsError::HandshakeFailure(
            "Sec-WebSocket-Accept does not match the request key".to_string(),
        ));
    }
    negotiate_sub_protocol(request.sub_protocols(), selected_protocol(response)?)
}

/// Consumes an inbound upgrade request and builds the 101 response.
///
/// The first protocol in the client's preference order that `supported`
/// contains is selected; no overlap means no subprotocol.
///
/// # Errors
///
/// Returns [`WsError::HandshakeFailure`] if the request is not a valid
/// version-13 WebSocket upgrade.
pub fn accept_request(
    request: &UpgradeRequest,
    supported: &[String],
) -> Result<UpgradeResponse, WsError> {
    let headers = request.headers();
    if !has_token(headers, UPGRADE, "websocket") {
        return Err(WsError::HandshakeFailure(
            "request is missing Upgrade: websocket".to_string(),
        ));
    }
    if !has_token(headers, CONNECTION, "upgrade") {
        return Err(WsError::HandshakeFailure(
            "request is missing Connection: Upgrade".to_string(),
        ));
    }
    let version = headers
        .get(SEC_WEBSOCKET_VERSION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim);
    if version != Some(WEBSOCKET_VERSION) {
        return Err(WsError::HandshakeFailure(
            "unsupported Sec-WebSocket-Version".to_string(),
        ));
    }
    let key = request.key().ok_or_else(|| {
        WsError::HandshakeFailure("request carries no Sec-WebSocket-Key".to_string())
    })?;

    let chosen = request
        .sub_protocols()
        .iter()
        .find(|offered| supported.contains(offered))
        .cloned();

    let mut response = UpgradeResponse::new(SWITCHING_PROTOCOLS)
        .with_header(UPGRADE, HeaderValue::from_static("websocket"))
        .with_header(CONNECTION, HeaderValue::from_static("Upgrade"))
        .with_header(SEC_WEBSOCKET_ACCEPT, header_value(accept_key_for(key))?);
    response.set_accepted_sub_protocol(chosen)?;
    Ok(response)
}
