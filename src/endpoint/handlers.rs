//! Convention-based endpoints built from optional async closures.

use std::fmt;
use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::domain::CloseStatus;
use crate::error::WsError;
use crate::session::Session;

type OpenFn = Box<dyn Fn(Session) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type TextFn =
    Box<dyn Fn(Session, String, bool) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type BinaryFn =
    Box<dyn Fn(Session, Vec<u8>, bool) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type PongFn = Box<dyn Fn(Session, Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type ErrorFn = Box<dyn Fn(Session, WsError) -> BoxFuture<'static, ()> + Send + Sync>;
type CloseFn = Box<dyn Fn(Session, CloseStatus) -> BoxFuture<'static, ()> + Send + Sync>;

/// Endpoint made of whichever callbacks were registered.
///
/// A text or binary message arriving with no matching handler closes the
/// session with 1003 (unsupported data). Pongs without a handler are
/// ignored.
///
/// ```rust,ignore
/// let echo = Handlers::new().on_text(|session, text, last| async move {
///     session.send(Payload::Text(text), last).await?;
///     Ok(())
/// });
/// ```
#[derive(Default)]
pub struct Handlers {
    open: Option<OpenFn>,
    text: Option<TextFn>,
    binary: Option<BinaryFn>,
    pong: Option<PongFn>,
    error: Option<ErrorFn>,
    close: Option<CloseFn>,
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("open", &self.open.is_some())
            .field("text", &self.text.is_some())
            .field("binary", &self.binary.is_some())
            .field("pong", &self.pong.is_some())
            .field("error", &self.error.is_some())
            .field("close", &self.close.is_some())
            .finish()
    }
}

impl Handlers {
    /// Creates an endpoint with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the open callback.
    #[must_use]
    pub fn on_open<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.open = Some(Box::new(move |session| f(session).boxed()));
        self
    }

    /// Registers the text message callback.
    #[must_use]
    pub fn on_text<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Session, String, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.text = Some(Box::new(move |session, text, last| f(session, text, last).boxed()));
        self
    }

    /// Registers the binary message callback.
    #[must_use]
    pub fn on_binary<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Session, Vec<u8>, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.binary = Some(Box::new(move |session, data, last| f(session, data, last).boxed()));
        self
    }

    /// Registers the pong callback.
    #[must_use]
    pub fn on_pong<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Session, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.pong = Some(Box::new(move |session, data| f(session, data).boxed()));
        self
    }

    /// Registers the error callback.
    #[must_use]
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Session, WsError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error = Some(Box::new(move |session, error| f(session, error).boxed()));
        self
    }

    /// Registers the close callback.
    #[must_use]
    pub fn on_close<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Session, CloseStatus) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.close = Some(Box::new(move |session, status| f(session, status).boxed()));
        self
    }

    pub(crate) async fn open(&self, session: &Session) -> Result<(), WsError> {
        match &self.open {
            Some(f) => f(session.clone()).await.map_err(WsError::from),
            None => Ok(()),
        }
    }

    pub(crate) async fn text(&self, session: &Session, text: String, last: bool) -> Result<(), WsError> {
        let Some(f) = &self.text else {
            return Err(WsError::UnsupportedData("no text handler registered".to_string()));
        };
        f(session.clone(), text, last).await.map_err(WsError::from)
    }

    pub(crate) async fn binary(
        &self,
        session: &Session,
        data: Vec<u8>,
        last: bool,
    ) -> Result<(), WsError> {
        let Some(f) = &self.binary else {
            return Err(WsError::UnsupportedData("no binary handler registered".to_string()));
        };
        f(session.clone(), data, last).await.map_err(WsError::from)
    }

    pub(crate) async fn pong(&self, session: &Session, data: Vec<u8>) -> Result<(), WsError> {
        match &self.pong {
            Some(f) => f(session.clone(), data).await.map_err(WsError::from),
            None => Ok(()),
        }
    }

    pub(crate) async fn error(&self, session: &Session, error: &WsError) {
        if let Some(f) = &self.error {
            f(session.clone(), error.clone()).await;
        }
    }

    pub(crate) async fn close(&self, session: &Session, status: &CloseStatus) {
        if let Some(f) = &self.close {
            f(session.clone(), status.clone()).await;
        }
    }
}
