//! Session-core error types with close code mapping.
//!
//! [`WsError`] is the central error type for the crate. Each variant that
//! can force a session to close maps to a specific RFC 6455 close code via
//! [`WsError::close_code`].

use crate::domain::CloseStatus;

/// Crate-wide error enum.
///
/// # Close Code Mapping
///
/// | Variant                          | Close code | Meaning            |
/// |----------------------------------|------------|--------------------|
/// | `ProtocolViolation`              | 1002       | Protocol error     |
/// | `UnsupportedData`                | 1003       | Unsupported data   |
/// | `CloseHandshakeTimeout`          | 1006       | Abnormal (local)   |
/// | `Write` / `Transport`            | 1006       | Abnormal (local)   |
/// | everything else                  | 1011       | Internal error     |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WsError {
    /// The HTTP upgrade exchange did not produce a valid WebSocket session.
    #[error("handshake failure: {0}")]
    HandshakeFailure(String),

    /// The frame engine reported a malformed or illegal frame.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An endpoint callback failed during dispatch.
    #[error("application error: {0}")]
    Application(String),

    /// A message kind arrived that the endpoint has no handler for.
    #[error("unsupported data: {0}")]
    UnsupportedData(String),

    /// The peer did not acknowledge a Close frame in time.
    #[error("close handshake timed out")]
    CloseHandshakeTimeout,

    /// The session is closing or closed.
    #[error("session closed")]
    SessionClosed,

    /// The session has not completed its opening yet.
    #[error("session not open")]
    SessionNotOpen,

    /// The container is not in the `Started` state.
    #[error("container not started")]
    ContainerNotStarted,

    /// The container has been stopped and cannot be restarted.
    #[error("container stopped")]
    ContainerStopped,

    /// The transport refused or failed a frame write.
    #[error("write failure: {0}")]
    Write(String),

    /// The transport itself failed (connect, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal invariant failure (task join, runtime).
    #[error("internal error: {0}")]
    Internal(String),
}

impl WsError {
    /// Returns the close code a session uses when this error forces closure.
    #[must_use]
    pub const fn close_code(&self) -> u16 {
        match self {
            Self::ProtocolViolation(_) => CloseStatus::PROTOCOL_ERROR,
            Self::UnsupportedData(_) => CloseStatus::UNSUPPORTED_DATA,
            Self::CloseHandshakeTimeout | Self::Write(_) | Self::Transport(_) => {
                CloseStatus::ABNORMAL
            }
            Self::HandshakeFailure(_)
            | Self::Application(_)
            | Self::SessionClosed
            | Self::SessionNotOpen
            | Self::ContainerNotStarted
            | Self::ContainerStopped
            | Self::Internal(_) => CloseStatus::SERVER_ERROR,
        }
    }

    /// Builds the close status used when this error terminates a session.
    #[must_use]
    pub fn to_close_status(&self) -> CloseStatus {
        CloseStatus::new(self.close_code(), self.to_string())
    }
}

impl From<anyhow::Error> for WsError {
    fn from(err: anyhow::Error) -> Self {
        Self::Application(format!("{err:#}"))
    }
}
