//! Transport binding: the [`CoreSessionChannel`] seam and its variants.
//!
//! A channel is the write half of a live connection plus its open/closed
//! state. The read half is a bounded queue of [`InboundEvent`]s produced
//! by the frame engine; a [`Transport`] bundles both for one session.
//!
//! Variants:
//! - [`empty::EmptyChannel`] for wiring a session with no connection.
//! - [`memory::pair`] for two in-process sessions talking to each other.
//! - [`tungstenite::TungsteniteChannel`] over a real WebSocket stream.

pub mod empty;
pub mod memory;
pub mod tungstenite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{CloseStatus, Frame};
use crate::error::WsError;

/// Write side and state of the live transport behind one session.
#[async_trait]
pub trait CoreSessionChannel: fmt::Debug + Send + Sync + 'static {
    /// Transmits one frame.
    ///
    /// Returns once the transport accepted the frame, not necessarily
    /// after it was flushed to the network.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Write`] if the transport refused the frame.
    async fn send_frame(&self, frame: Frame) -> Result<(), WsError>;

    /// Requests transport-level closure of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Transport`] if the transport failed while
    /// shutting down. The channel reports closed either way.
    async fn close(&self, status: &CloseStatus) -> Result<(), WsError>;

    /// Current transport state. Advisory: may race with closure.
    fn is_open(&self) -> bool;

    /// `true` if the transport itself answers Pings and echoes the peer's
    /// Close frame. The session then leaves both replies to it.
    fn answers_control_frames(&self) -> bool {
        false
    }
}

/// Event delivered by the frame engine for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A validated frame.
    Frame(Frame),
    /// Malformed frame, reserved bits, oversized payload.
    ProtocolViolation(String),
    /// The underlying connection ended.
    Closed,
}

/// Channel plus inbound event stream for one session.
#[derive(Debug)]
pub struct Transport {
    channel: Arc<dyn CoreSessionChannel>,
    inbound: Option<mpsc::Receiver<InboundEvent>>,
}

impl Transport {
    /// Bundles a channel with the receiver of its inbound events.
    #[must_use]
    pub fn new(
        channel: Arc<dyn CoreSessionChannel>,
        inbound: Option<mpsc::Receiver<InboundEvent>>,
    ) -> Self {
        Self { channel, inbound }
    }

    /// A transport with no live connection: an [`empty::EmptyChannel`]
    /// and no inbound stream.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Arc::new(empty::EmptyChannel::new()), None)
    }

    /// The channel half.
    #[must_use]
    pub fn channel(&self) -> &Arc<dyn CoreSessionChannel> {
        &self.channel
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Arc<dyn CoreSessionChannel>,
        Option<mpsc::Receiver<InboundEvent>>,
    ) {
        (self.channel, self.inbound)
    }
}
