//! Chat lines and internal notes

use super::{de_id, de_opt_id, ConversationId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sender {
    /// The customer on the external messaging channel
    Customer,
    /// A human support agent
    Agent,
    /// The automatic responder
    Bot,
    /// Backend-generated notices (assignment, closure, ...)
    System,
}

/// Opaque media attachment reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    /// Backend reference (URL or storage key)
    #[serde(alias = "mediaUrl", alias = "url")]
    pub reference: String,
    /// MIME type of the attachment
    #[serde(alias = "mediaType")]
    pub mime_type: String,
}

/// One chat line
///
/// Immutable once created; only `read_at` may go from unset to set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message ID
    #[serde(deserialize_with = "de_id")]
    pub id: MessageId,
    /// Conversation the message belongs to
    ///
    /// Push payloads may carry it next to the message instead of inside it;
    /// the event decoder fills it in.
    #[serde(default, alias = "chatId", deserialize_with = "de_id")]
    pub conversation_id: ConversationId,
    /// Author kind
    #[serde(alias = "senderType")]
    pub sender: Sender,
    /// Text body; absent for media-only messages
    #[serde(default)]
    pub content: Option<String>,
    /// Attachment, if any
    #[serde(default)]
    pub media: Option<MediaRef>,
    /// Creation time
    #[serde(alias = "createdAt")]
    pub timestamp: DateTime<Utc>,
    /// When the message was read
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// Author name to show, if the backend provides one
    #[serde(default, alias = "senderName")]
    pub sender_display_name: Option<String>,
}

impl Message {
    /// Create a new text message
    pub fn new(
        id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        sender: Sender,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender,
            content: Some(content.into()),
            media: None,
            timestamp,
            read_at: None,
            sender_display_name: None,
        }
    }

    /// History ordering key: `(timestamp, id)`
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.timestamp, self.id.as_str())
    }

    /// Set `read_at` if it is still unset; returns whether it changed
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.read_at.is_some() {
            return false;
        }
        self.read_at = Some(at);
        true
    }

    /// Text for the conversation list preview
    ///
    /// Media-only messages fall back to the attachment's MIME type.
    pub fn preview(&self) -> Option<String> {
        self.content
            .clone()
            .filter(|text| !text.is_empty())
            .or_else(|| self.media.as_ref().map(|media| media.mime_type.clone()))
    }
}

/// Internal note attached to a conversation, visible to agents only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Note ID
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    /// Conversation the note belongs to
    #[serde(default, alias = "chatId", deserialize_with = "de_id")]
    pub conversation_id: ConversationId,
    /// Note text
    pub content: String,
    /// Agent who wrote it
    #[serde(default, deserialize_with = "de_opt_id")]
    pub author_id: Option<String>,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}
