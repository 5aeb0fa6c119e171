//! Inbox Sync - real-time state synchronization for support-agent consoles
//!
//! This library keeps an in-memory view of conversations, the open
//! conversation's message history and agent presence consistent with a
//! paginated REST API and a push event channel that may deliver events late,
//! twice, or not at all across reconnects.
//!
//! The pieces, leaves first:
//! - `model` - conversations, messages, notes and pagination cursors
//! - `settings` - JSON configuration, reconnect policy and event names
//! - `events` - push event kinds and payload decoding
//! - `dispatcher` - event name to handler registry
//! - `connection` - push channel lifecycle, reconnect backoff, presence
//! - `api` - REST collaborator and its HTTP implementation
//! - `cache` - conversation list cache and active conversation window
//! - `reconcile` - per-event rules applied to the caches
//! - `engine` - composition root tying REST fetches and push events together
//!
//! # Example
//! ```rust,no_run
//! use inbox_sync::connection::{ConnectionManager, Credentials, LoopbackTransport};
//! use inbox_sync::{HttpChatApi, SyncEngine, SyncSettings};
//! use std::sync::Arc;
//!
//! # async fn run() -> inbox_sync::Result<()> {
//! let settings = SyncSettings::load("inbox-sync.json")?;
//! let api = HttpChatApi::new(settings.api_base_url.clone(), "session-token")?;
//! let engine = SyncEngine::new(Arc::new(api), settings.clone());
//!
//! let manager = ConnectionManager::new(
//!     Arc::new(LoopbackTransport::new()),
//!     settings.socket_url.clone(),
//!     settings.reconnect.clone(),
//!     settings.events.clone(),
//! );
//! let _binding = engine.bind(&manager);
//! manager.connect(Some(&Credentials::new("session-token")));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod cache;
pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod model;
pub mod reconcile;
pub mod settings;

pub use api::{ChatApi, HttpChatApi};
pub use connection::{ConnectionManager, Credentials};
pub use engine::{Binding, Notice, SyncEngine};
pub use settings::SyncSettings;

/// Result type alias for Inbox Sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Inbox Sync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// REST call answered with a non-success status
    #[error("API error: {0}")]
    Api(String),

    /// REST call rejected the session token
    #[error("Session is no longer authorized")]
    Unauthorized,

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Push channel error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Push payload did not match the expected shape
    #[error("Payload error: {0}")]
    Payload(String),

    /// Invalid or unreadable settings
    #[error("Settings error: {0}")]
    Settings(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Initialize the Inbox Sync library with logging
pub fn init() {
    tracing_subscriber::fmt::init();
}

#[cfg(test)]
mod tests;
