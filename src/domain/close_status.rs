//! Close status carried by Close frames and `on_close` notifications.

use std::fmt;

use serde::Serialize;

/// Largest reason that fits a control frame (125 bytes minus the code).
pub const MAX_REASON_BYTES: usize = 123;

/// Status code plus optional reason text of a WebSocket closure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CloseStatus {
    code: u16,
    reason: String,
}

impl CloseStatus {
    /// 1000: normal closure.
    pub const NORMAL: u16 = 1000;
    /// 1001: endpoint going away (container shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// 1002: protocol error.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// 1003: received a data type the endpoint cannot accept.
    pub const UNSUPPORTED_DATA: u16 = 1003;
    /// 1005: Close frame carried no status. Never sent on the wire.
    pub const NO_STATUS: u16 = 1005;
    /// 1006: connection lost without a Close frame. Never sent on the wire.
    pub const ABNORMAL: u16 = 1006;
    /// 1011: unexpected condition on the server (or endpoint).
    pub const SERVER_ERROR: u16 = 1011;

    /// Creates a status with the given code and reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// 1000 with the given reason.
    #[must_use]
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(Self::NORMAL, reason)
    }

    /// 1006 with the given reason, recorded locally.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(Self::ABNORMAL, reason)
    }

    /// Returns the numeric close code.
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// Returns the reason text (possibly empty).
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns `true` for codes that are only ever recorded locally.
    #[must_use]
    pub const fn is_local_only(&self) -> bool {
        matches!(self.code, Self::NO_STATUS | Self::ABNORMAL)
    }

    /// Reason text as it goes on the wire, cut to [`MAX_REASON_BYTES`]
    /// without splitting a char.
    #[must_use]
    pub fn wire_reason(&self) -> &str {
        truncate_reason(&self.reason)
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Cuts `reason` to at most [`MAX_REASON_BYTES`] without splitting a char.
fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason.get(..end).unwrap_or_default()
}
