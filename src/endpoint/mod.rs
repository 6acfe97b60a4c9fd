//! Endpoint contract: what applications implement to receive session
//! events.
//!
//! Two authoring styles are supported and unified by [`EndpointAdapter`]:
//! - programmatic: implement the [`Endpoint`] trait;
//! - convention-based: register only the callbacks you need on a
//!   [`Handlers`] value.

pub mod adapter;
pub mod handlers;

use std::collections::BTreeMap;

use async_trait::async_trait;

pub use adapter::EndpointAdapter;
pub use handlers::Handlers;

use crate::domain::CloseStatus;
use crate::error::WsError;
use crate::session::Session;

/// Per-endpoint configuration, snapshotted into each session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    sub_protocols: Vec<String>,
    user_properties: BTreeMap<String, String>,
}

impl EndpointConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the subprotocols this endpoint speaks, in preference order.
    #[must_use]
    pub fn with_sub_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches an application-defined property.
    #[must_use]
    pub fn with_user_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.insert(key.into(), value.into());
        self
    }

    /// Declared subprotocols, in preference order.
    #[must_use]
    pub fn sub_protocols(&self) -> &[String] {
        &self.sub_protocols
    }

    /// Looks up an application-defined property.
    #[must_use]
    pub fn user_property(&self, key: &str) -> Option<&str> {
        self.user_properties.get(key).map(String::as_str)
    }
}

/// Programmatic endpoint.
///
/// Every callback for one session runs on that session's dispatch task,
/// strictly in arrival order and never concurrently. Returning an error
/// from `on_open`, `on_text`, `on_binary` or `on_pong` reports it through
/// `on_error` and then closes the session with the error's close code
/// (1011 for application errors).
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// The session opened. Runs before any other callback.
    async fn on_open(&self, session: &Session) -> Result<(), WsError> {
        let _ = session;
        Ok(())
    }

    /// A text message (or fragment, when `last` is `false`) arrived.
    ///
    /// The default rejects text with [`WsError::UnsupportedData`].
    async fn on_text(&self, session: &Session, text: String, last: bool) -> Result<(), WsError> {
        let _ = (session, text, last);
        Err(WsError::UnsupportedData("endpoint does not accept text".to_string()))
    }

    /// A binary message (or fragment) arrived.
    ///
    /// The default rejects binary data with [`WsError::UnsupportedData`].
    async fn on_binary(&self, session: &Session, data: Vec<u8>, last: bool) -> Result<(), WsError> {
        let _ = (session, data, last);
        Err(WsError::UnsupportedData("endpoint does not accept binary".to_string()))
    }

    /// A pong arrived. Ignored by default.
    async fn on_pong(&self, session: &Session, data: Vec<u8>) -> Result<(), WsError> {
        let _ = (session, data);
        Ok(())
    }

    /// A protocol violation or dispatch failure occurred. Does not close
    /// the session by itself.
    async fn on_error(&self, session: &Session, error: &WsError) {
        let _ = (session, error);
    }

    /// The session reached its terminal state. Called exactly once.
    async fn on_close(&self, session: &Session, status: &CloseStatus) {
        let _ = (session, status);
    }
}
