//! Synchronization settings
//!
//! Persistent configuration for the engine: endpoints, page sizes, the push
//! channel's reconnect policy and the backend's event names. Settings are
//! stored in JSON format and can be loaded/saved from disk.

use crate::{events::EventKind, Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Synchronization settings
///
/// # Example
/// ```rust,no_run
/// use inbox_sync::SyncSettings;
///
/// // Load settings (returns default if file doesn't exist)
/// let settings = SyncSettings::load("inbox-sync.json").expect("Failed to load");
///
/// println!("Conversations per page: {}", settings.conversation_page_size);
/// println!("Reconnect attempts: {}", settings.reconnect.max_attempts);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Base URL of the REST API
    pub api_base_url: String,
    /// URL of the push channel
    pub socket_url: String,
    /// Page size for conversation list fetches
    pub conversation_page_size: u32,
    /// Page size for message history fetches
    pub message_page_size: u32,
    /// Capacity of the notice broadcast channel
    pub notice_buffer: usize,
    /// Push channel reconnect policy
    pub reconnect: ReconnectPolicy,
    /// Backend event names
    pub events: EventCatalog,
}

impl SyncSettings {
    /// Load settings from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to the settings file
    ///
    /// # Returns
    /// The loaded settings, or default settings if the file doesn't exist or is empty
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Settings(format!("Failed to read settings: {}", e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Self = serde_json::from_str(&data)
            .map_err(|e| Error::Settings(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;

        Ok(settings)
    }

    /// Save settings to a JSON file, creating parent directories as needed
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Settings(format!("Failed to create settings directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| Error::Settings(format!("Failed to write settings: {}", e)))?;

        Ok(())
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.conversation_page_size == 0 || self.message_page_size == 0 {
            return Err(Error::Settings("Page sizes must be greater than zero".to_string()));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(Error::Settings(
                "Reconnect attempt bound must be greater than zero".to_string(),
            ));
        }
        if self.reconnect.connect_timeout_ms == 0 {
            return Err(Error::Settings(
                "Connect timeout must be greater than zero".to_string(),
            ));
        }
        if self.notice_buffer == 0 {
            return Err(Error::Settings("Notice buffer must be greater than zero".to_string()));
        }
        self.events.validate()
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            socket_url: "http://localhost:3000".to_string(),
            conversation_page_size: 50,
            message_page_size: 50,
            notice_buffer: 64,
            reconnect: ReconnectPolicy::default(),
            events: EventCatalog::default(),
        }
    }
}

/// Exponential backoff for push channel reconnects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for any delay, in milliseconds
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay (0.0 - 1.0)
    pub randomization: f64,
    /// Timeout for a single connect attempt, in milliseconds
    pub connect_timeout_ms: u64,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay_ms`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay before retry number `attempt` (1-based), with jitter applied
    ///
    /// The result never exceeds `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt).as_millis() as f64;
        let spread = base * self.randomization.clamp(0.0, 1.0);
        let jittered = if spread > 0.0 {
            base + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            base
        };
        Duration::from_millis((jittered.max(0.0) as u64).min(self.max_delay_ms))
    }

    /// Timeout for a single connect attempt
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            randomization: 0.5,
            connect_timeout_ms: 20_000,
        }
    }
}

/// Backend event names for each event kind
///
/// The names are a backend contract; defaults match the current backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventCatalog {
    /// A message was added to a conversation
    pub new_message: String,
    /// A conversation was created
    pub new_conversation: String,
    /// A conversation was assigned or reassigned
    pub assignment_changed: String,
    /// A conversation was released back to the queue
    pub released: String,
    /// A conversation was finalized
    pub finalized: String,
    /// Messages of a conversation were read
    pub messages_read: String,
    /// An internal note was added
    pub note_added: String,
    /// The roster of online agents changed
    pub presence_update: String,
    /// The external messaging channel changed state
    pub external_channel_status: String,
    /// The external messaging channel needs a QR pairing
    pub external_channel_qr_code: String,
    /// A conversation was assigned to this agent
    pub personal_assignment: String,
    /// Dashboard analytics changed
    pub analytics_update: String,
}

impl EventCatalog {
    /// Backend name for an event kind
    pub fn name(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::NewMessage => &self.new_message,
            EventKind::NewConversation => &self.new_conversation,
            EventKind::AssignmentChanged => &self.assignment_changed,
            EventKind::Released => &self.released,
            EventKind::Finalized => &self.finalized,
            EventKind::MessagesRead => &self.messages_read,
            EventKind::NoteAdded => &self.note_added,
            EventKind::PresenceUpdate => &self.presence_update,
            EventKind::ExternalChannelStatus => &self.external_channel_status,
            EventKind::ExternalChannelQrCode => &self.external_channel_qr_code,
            EventKind::PersonalAssignment => &self.personal_assignment,
            EventKind::AnalyticsUpdate => &self.analytics_update,
        }
    }

    /// Event kind for a backend name, if the name is known
    pub fn kind(&self, name: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|kind| self.name(*kind) == name)
    }

    /// Every name must be non-empty and distinct
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for kind in EventKind::ALL {
            let name = self.name(kind);
            if name.is_empty() {
                return Err(Error::Settings(format!("Event name for {:?} is empty", kind)));
            }
            if !seen.insert(name) {
                return Err(Error::Settings(format!("Event name '{}' is used twice", name)));
            }
        }
        Ok(())
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self {
            new_message: "newMessage".to_string(),
            new_conversation: "newChat".to_string(),
            assignment_changed: "assignedChat".to_string(),
            released: "releasedChat".to_string(),
            finalized: "finalizedChat".to_string(),
            messages_read: "messagesRead".to_string(),
            note_added: "chat:newInternalNote".to_string(),
            presence_update: "presenceUpdate".to_string(),
            external_channel_status: "admin:status".to_string(),
            external_channel_qr_code: "admin:qr".to_string(),
            personal_assignment: "assignment-notification".to_string(),
            analytics_update: "dashboard:surveyUpdate".to_string(),
        }
    }
}
