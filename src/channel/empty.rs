//! Channel variant for sessions without a live connection.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::CoreSessionChannel;
use crate::domain::{CloseStatus, Frame};
use crate::error::WsError;

/// A channel that is not backed by any connection.
///
/// Contract:
/// - reports itself open until [`CoreSessionChannel::close`] is called;
/// - while open, every frame is accepted and discarded;
/// - once closed, `send_frame` fails with [`WsError::Write`];
/// - `close` is idempotent and never fails.
#[derive(Debug)]
pub struct EmptyChannel {
    open: AtomicBool,
}

impl EmptyChannel {
    /// Creates an open empty channel.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
        }
    }
}

impl Default for EmptyChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoreSessionChannel for EmptyChannel {
    async fn send_frame(&self, frame: Frame) -> Result<(), WsError> {
        if self.open.load(Ordering::Acquire) {
            tracing::trace!(?frame, "empty channel discarding frame");
            Ok(())
        } else {
            Err(WsError::Write("empty channel is closed".to_string()))
        }
    }

    async fn close(&self, status: &CloseStatus) -> Result<(), WsError> {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::trace!(%status, "empty channel closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
