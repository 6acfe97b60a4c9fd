//! In-process transport pair.
//!
//! Frames written on one side arrive as [`InboundEvent::Frame`] on the
//! other. Closing a side severs it: the peer receives
//! [`InboundEvent::Closed`] and later writes from either side fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{CoreSessionChannel, InboundEvent, Transport};
use crate::domain::{CloseStatus, Frame};
use crate::error::WsError;

/// One end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryChannel {
    peer: Mutex<Option<mpsc::Sender<InboundEvent>>>,
    open: AtomicBool,
    frames_sent: AtomicUsize,
    close_frames_sent: AtomicUsize,
}

impl MemoryChannel {
    fn new(peer: mpsc::Sender<InboundEvent>) -> Self {
        Self {
            peer: Mutex::new(Some(peer)),
            open: AtomicBool::new(true),
            frames_sent: AtomicUsize::new(0),
            close_frames_sent: AtomicUsize::new(0),
        }
    }

    /// Number of frames handed to the peer so far.
    #[must_use]
    pub fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::Acquire)
    }

    /// Number of Close frames handed to the peer so far.
    #[must_use]
    pub fn close_frames_sent(&self) -> usize {
        self.close_frames_sent.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CoreSessionChannel for MemoryChannel {
    async fn send_frame(&self, frame: Frame) -> Result<(), WsError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(WsError::Write("memory channel is closed".to_string()));
        }
        let Some(peer) = self.peer.lock().clone() else {
            return Err(WsError::Write("memory channel is closed".to_string()));
        };
        let is_close = frame.is_close();
        peer.send(InboundEvent::Frame(frame))
            .await
            .map_err(|_| WsError::Write("memory peer went away".to_string()))?;
        self.frames_sent.fetch_add(1, Ordering::AcqRel);
        if is_close {
            self.close_frames_sent.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    async fn close(&self, status: &CloseStatus) -> Result<(), WsError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let peer = self.peer.lock().take();
        if let Some(peer) = peer {
            tracing::trace!(%status, "severing memory channel");
            let _ = peer.send(InboundEvent::Closed).await;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Creates two connected transports and handles to their channels.
///
/// The first element of each tuple is the transport to hand to a session,
/// the second a typed handle for inspecting frame counters.
#[must_use]
pub fn pair(capacity: usize) -> ((Transport, Arc<MemoryChannel>), (Transport, Arc<MemoryChannel>)) {
    let capacity = capacity.max(1);
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);

    let a = Arc::new(MemoryChannel::new(b_tx));
    let b = Arc::new(MemoryChannel::new(a_tx));

    let a_channel: Arc<dyn CoreSessionChannel> = Arc::clone(&a) as Arc<dyn CoreSessionChannel>;
    let b_channel: Arc<dyn CoreSessionChannel> = Arc::clone(&b) as Arc<dyn CoreSessionChannel>;

    (
        (Transport::new(a_channel, Some(a_rx)), a),
        (Transport::new(b_channel, Some(b_rx)), b),
    )
}
