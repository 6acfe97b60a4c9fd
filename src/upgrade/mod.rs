//! Opening handshake: header rules, the transport seam and the client
//! connect flow.

pub mod connector;
pub mod coordinator;
pub mod handshake;

pub use connector::Connector;
pub use coordinator::ConnectHandle;
