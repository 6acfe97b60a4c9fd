//! Session lifecycle state machine values.

use serde::Serialize;

/// Lifecycle state of a [`crate::Session`].
///
/// Transitions only move forward:
/// `Connecting -> Open -> Closing -> Closed`, with `Connecting -> Closing`
/// allowed when a session is torn down before it opened. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Handshake done, frame handler not yet bound.
    Connecting,
    /// Frames may flow in both directions.
    Open,
    /// A close was initiated by either side.
    Closing,
    /// Terminal. `on_close` has been delivered.
    Closed,
}

impl SessionState {
    /// Returns `true` if application frames may be sent.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}
