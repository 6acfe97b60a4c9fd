//! Uniform view over both endpoint authoring styles.

use std::fmt;
use std::sync::Arc;

use super::{Endpoint, Handlers};
use crate::domain::{CloseStatus, Payload};
use crate::error::WsError;
use crate::session::Session;

/// An endpoint resolved once at bind time.
///
/// The frame handler talks to this type only; which authoring style sits
/// behind it is decided when the adapter is built, not per event.
pub enum EndpointAdapter {
    /// An [`Endpoint`] trait object.
    Programmatic(Arc<dyn Endpoint>),
    /// A [`Handlers`] value.
    Handlers(Handlers),
}

impl fmt::Debug for EndpointAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Programmatic(_) => f.write_str("EndpointAdapter::Programmatic(..)"),
            Self::Handlers(handlers) => f.debug_tuple("EndpointAdapter::Handlers").field(handlers).finish(),
        }
    }
}

impl EndpointAdapter {
    /// Wraps a programmatic endpoint.
    #[must_use]
    pub fn programmatic(endpoint: impl Endpoint) -> Self {
        Self::Programmatic(Arc::new(endpoint))
    }

    /// Returns the authoring style as a static string slice.
    #[must_use]
    pub const fn style_str(&self) -> &'static str {
        match self {
            Self::Programmatic(_) => "programmatic",
            Self::Handlers(_) => "handlers",
        }
    }

    pub(crate) async fn on_open(&self, session: &Session) -> Result<(), WsError> {
        match self {
            Self::Programmatic(endpoint) => endpoint.on_open(session).await,
            Self::Handlers(handlers) => handlers.open(session).await,
        }
    }

    pub(crate) async fn on_message(
        &self,
        session: &Session,
        payload: Payload,
        last: bool,
    ) -> Result<(), WsError> {
        match (self, payload) {
            (Self::Programmatic(endpoint), Payload::Text(text)) => {
                endpoint.on_text(session, text, last).await
            }
            (Self::Programmatic(endpoint), Payload::Binary(data)) => {
                endpoint.on_binary(session, data, last).await
            }
            (Self::Programmatic(endpoint), Payload::Pong(data)) => {
                endpoint.on_pong(session, data).await
            }
            (Self::Handlers(handlers), Payload::Text(text)) => {
                handlers.text(session, text, last).await
            }
            (Self::Handlers(handlers), Payload::Binary(data)) => {
                handlers.binary(session, data, last).await
            }
            (Self::Handlers(handlers), Payload::Pong(data)) => handlers.pong(session, data).await,
        }
    }

    pub(crate) async fn on_error(&self, session: &Session, error: &WsError) {
        match self {
            Self::Programmatic(endpoint) => endpoint.on_error(session, error).await,
            Self::Handlers(handlers) => handlers.error(session, error).await,
        }
    }

    pub(crate) async fn on_close(&self, session: &Session, status: &CloseStatus) {
        match self {
            Self::Programmatic(endpoint) => endpoint.on_close(session, status).await,
            Self::Handlers(handlers) => handlers.close(session, status).await,
        }
    }
}

impl From<Handlers> for EndpointAdapter {
    fn from(handlers: Handlers) -> Self {
        Self::Handlers(handlers)
    }
}

impl From<Arc<dyn Endpoint>> for EndpointAdapter {
    fn from(endpoint: Arc<dyn Endpoint>) -> Self {
        Self::Programmatic(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl Endpoint for Silent {}

    #[test]
    fn style_is_resolved_at_construction() {
        assert_eq!(EndpointAdapter::programmatic(Silent).style_str(), "programmatic");
        assert_eq!(EndpointAdapter::from(Handlers::new()).style_str(), "handlers");
    }
}
