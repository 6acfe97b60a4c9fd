//! Frame and message payload types exchanged with the frame engine.
//!
//! Fragment reassembly, masking and byte-level parsing happen below this
//! layer. A [`Frame`] here is one unit the frame engine already validated,
//! and a [`Payload`] is what endpoints see.

use super::CloseStatus;

/// Message content delivered to (or sent by) an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text message or fragment.
    Text(String),
    /// Binary message or fragment.
    Binary(Vec<u8>),
    /// Pong control payload. Never fragmented.
    Pong(Vec<u8>),
}

impl Payload {
    /// Returns the payload kind as a static string slice.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Pong(_) => "pong",
        }
    }

    /// Returns the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) | Self::Pong(data) => data.len(),
        }
    }

    /// Returns `true` if the payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One wire-level unit as seen by the session core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Data (or pong) frame. `fin` is `false` for a non-final fragment.
    Message {
        /// Frame content.
        payload: Payload,
        /// Whether this is the final fragment of its message.
        fin: bool,
    },
    /// Ping control frame.
    Ping(Vec<u8>),
    /// Close control frame.
    Close(CloseStatus),
}

impl Frame {
    /// Builds a final text frame.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Message {
            payload: Payload::Text(text.into()),
            fin: true,
        }
    }

    /// Builds a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Message {
            payload: Payload::Binary(data.into()),
            fin: true,
        }
    }

    /// Builds a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::Message {
            payload: Payload::Pong(data.into()),
            fin: true,
        }
    }

    /// Returns `true` for a Close frame.
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }
}
