//! Seam to the transport provider used by client connects.

use async_trait::async_trait;

use crate::channel::Transport;
use crate::domain::{UpgradeRequest, UpgradeResponse};
use crate::error::WsError;

/// Performs the wire part of a client upgrade.
///
/// Implementations send `request` (its headers are already prepared) and
/// return the peer's raw response together with the transport. They do
/// not judge the response: validation belongs to the coordinator, which
/// closes the transport again when the handshake is rejected.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dials the peer and exchanges the upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Transport`] when the peer cannot be reached, or
    /// [`WsError::HandshakeFailure`] when the exchange broke down before a
    /// response was available.
    async fn connect(&self, request: &UpgradeRequest)
    -> Result<(UpgradeResponse, Transport), WsError>;
}
