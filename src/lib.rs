//! # ws-session-core
//!
//! WebSocket (RFC 6455) session and upgrade-lifecycle core.
//!
//! The crate sits between a frame engine (which turns bytes into frames)
//! and application endpoints (which react to messages). It owns the
//! opening handshake rules, the per-session state machine, ordered event
//! dispatch and the closing handshake.
//!
//! ## Architecture
//!
//! ```text
//! Application
//!     │
//!     ├── Endpoint / Handlers (endpoint/)
//!     │
//!     ├── Container ── SessionRegistry (container/)
//!     │       │
//!     │       ├── Upgrade coordinator + handshake rules (upgrade/)
//!     │       │
//!     │       └── Session ── FrameHandler (session.rs, handler.rs)
//!     │
//!     └── CoreSessionChannel: empty / memory / tungstenite (channel/)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let container = Container::new(ContainerConfig::from_env());
//! container.start()?;
//!
//! let echo = Handlers::new().on_text(|session, text, last| async move {
//!     session.send(Payload::Text(text), last).await?;
//!     Ok(())
//! });
//! let request = UpgradeRequest::new("ws://127.0.0.1:9001/echo").with_sub_protocols(["chat"]);
//! let session = container.connect(echo, request)?.await?;
//! session.send_text("ping").await?;
//! session.close(CloseStatus::NORMAL, "done").await?;
//! ```

pub mod channel;
pub mod config;
pub mod container;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod session;
pub mod upgrade;

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod test_utils;

pub use channel::{CoreSessionChannel, InboundEvent, Transport};
pub use config::ContainerConfig;
pub use container::{Container, Lifecycle};
pub use domain::{
    CloseStatus, Frame, Payload, SessionId, SessionState, UpgradeRequest, UpgradeResponse,
};
pub use endpoint::{Endpoint, EndpointAdapter, EndpointConfig, Handlers};
pub use error::WsError;
pub use handler::FrameHandler;
pub use session::{Session, SessionInfo};
pub use upgrade::{ConnectHandle, Connector};

/// HTTP types used by the upgrade metadata.
pub use tokio_tungstenite::tungstenite::http;
