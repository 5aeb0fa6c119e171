//! Common types for the connection module

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// State of this client's push channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No channel, and no attempt in progress
    #[default]
    Disconnected,
    /// Attempting to establish the channel
    Connecting,
    /// Channel established and delivering events
    Connected,
}

/// State of the third-party messaging channel behind the backend
///
/// Independent of this client's own socket state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalChannelStatus {
    /// Linked and relaying messages
    Connected,
    /// Not linked
    #[default]
    Disconnected,
    /// Link in progress
    Connecting,
    /// Waiting for a QR code to be scanned
    AwaitingQr,
}

/// Observable connection state, owned by the `ConnectionManager`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Push channel state
    pub status: ConnectionStatus,
    /// Ids of the agents currently online
    pub presence: BTreeSet<String>,
    /// External messaging channel state
    pub external_channel: ExternalChannelStatus,
    /// Pending pairing QR code, if any
    pub qr_code: Option<String>,
    /// Consecutive failed connect attempts
    pub attempts: u32,
    /// Incremented on every transition into `Connected`
    ///
    /// A watcher that sees the epoch change knows a (re)connect happened even
    /// if it missed the intermediate states.
    pub epoch: u64,
    /// Reconnect attempts were exhausted; only a new `connect()` retries
    pub exhausted: bool,
}

impl ConnectionSnapshot {
    /// Whether the push channel is up
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Authentication material for the push channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Session token issued by the backend
    pub token: String,
}

impl Credentials {
    /// Create credentials from a session token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

/// Signal delivered by a push transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// Handshake completed
    Connected,
    /// Link lost after it was established
    Disconnected {
        /// Transport-provided reason
        reason: String,
    },
    /// Handshake failed
    ConnectError {
        /// Transport-provided error message
        message: String,
    },
    /// Server-initiated event
    Event {
        /// Backend event name
        name: String,
        /// Raw JSON payload
        payload: Value,
    },
}
