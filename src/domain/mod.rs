//! Domain layer: identifiers, lifecycle states, frames and handshake
//! metadata.
//!
//! Everything here is plain data with no I/O; the session, handler and
//! container modules build on these types.

pub mod close_status;
pub mod frame;
pub mod session_id;
pub mod session_state;
pub mod upgrade;

pub use close_status::CloseStatus;
pub use frame::{Frame, Payload};
pub use session_id::SessionId;
pub use session_state::SessionState;
pub use upgrade::{UpgradeRequest, UpgradeResponse};
