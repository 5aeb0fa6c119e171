//! Push channel connection management
//!
//! This module owns the lifecycle of the push channel:
//! - `ConnectionManager` - connect/disconnect, reconnect with backoff, and the
//!   observable `ConnectionSnapshot` (status, presence, external channel)
//! - `PushTransport` - the collaborator that carries events
//! - `LoopbackTransport` - in-memory transport with a scriptable server side

pub mod loopback;
pub mod manager;
pub mod transport;
pub mod types;

pub use loopback::LoopbackTransport;
pub use manager::{ConnectionHandle, ConnectionManager};
pub use transport::PushTransport;
pub use types::{
    ConnectionSnapshot, ConnectionStatus, Credentials, ExternalChannelStatus, TransportSignal,
};
