//! Conversation summaries and partial updates

use super::{de_id, de_opt_id, de_present, de_present_id, ConversationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation lifecycle status as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationStatus {
    /// Handled by the automatic responder, no agent involved
    #[serde(rename = "AUTO_RESPONDER", alias = "BOT_HANDLED")]
    BotHandled,
    /// Assigned to an agent and in progress
    #[serde(rename = "ACTIVE")]
    Active,
    /// Waiting for an agent
    #[serde(rename = "PENDING_ASSIGNMENT", alias = "QUEUED")]
    Queued,
    /// Finalized; closure is a status, never a removal
    #[serde(rename = "CLOSED")]
    Closed,
}

impl Default for ConversationStatus {
    fn default() -> Self {
        Self::Queued
    }
}

/// One customer thread as shown in the conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Stable identifier, immutable once created
    #[serde(deserialize_with = "de_id")]
    pub id: ConversationId,
    /// Phone number or external id of the customer
    #[serde(default, alias = "contactNumber")]
    pub contact_handle: String,
    /// Customer display name, if known
    #[serde(default, alias = "customerName")]
    pub display_name: Option<String>,
    /// Lifecycle status
    #[serde(default)]
    pub status: ConversationStatus,
    /// Agent currently handling the conversation
    #[serde(default, deserialize_with = "de_opt_id")]
    pub assigned_agent_id: Option<String>,
    /// Messages not yet seen by this agent
    #[serde(default)]
    pub unread_count: u32,
    /// Last activity; never moves backwards for a given conversation
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Short preview of the latest message
    #[serde(default)]
    pub last_message_preview: Option<String>,
}

impl Conversation {
    /// Create a new conversation summary
    pub fn new(id: impl Into<ConversationId>, contact_handle: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            contact_handle: contact_handle.into(),
            display_name: None,
            status: ConversationStatus::default(),
            assigned_agent_id: None,
            unread_count: 0,
            updated_at: Utc::now(),
            last_message_preview: None,
        }
    }

    /// Build a conversation from a partial update, filling gaps with defaults
    ///
    /// Used when an event references a conversation the list has never seen.
    pub fn from_patch(patch: &ConversationPatch, now: DateTime<Utc>) -> Self {
        let mut conversation = Self {
            id: patch.id.clone(),
            contact_handle: String::new(),
            display_name: None,
            status: ConversationStatus::default(),
            assigned_agent_id: None,
            unread_count: 0,
            updated_at: patch.updated_at.unwrap_or(now),
            last_message_preview: None,
        };
        conversation.apply(patch);
        conversation
    }

    /// Merge a partial update; any field the patch carries wins
    ///
    /// `id` never changes and `updated_at` only moves forward.
    pub fn apply(&mut self, patch: &ConversationPatch) {
        if let Some(contact_handle) = &patch.contact_handle {
            self.contact_handle = contact_handle.clone();
        }
        if let Some(display_name) = &patch.display_name {
            self.display_name = display_name.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(assigned_agent_id) = &patch.assigned_agent_id {
            self.assigned_agent_id = assigned_agent_id.clone();
        }
        if let Some(unread_count) = patch.unread_count {
            self.unread_count = unread_count;
        }
        if let Some(updated_at) = patch.updated_at {
            self.touch(updated_at);
        }
        if let Some(preview) = &patch.last_message_preview {
            self.last_message_preview = preview.clone();
        }
    }

    /// Advance `updated_at` to `at` unless it is already later
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }

    /// Whether an agent can still reply in this conversation
    pub fn accepts_replies(&self) -> bool {
        self.status != ConversationStatus::Closed
    }

    /// Name to show for the customer: display name, falling back to the handle
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.contact_handle)
    }
}

/// Partial conversation update carried by push events
///
/// Every field except `id` is optional. Nullable fields use a double option so
/// an explicit `null` (e.g. "no agent assigned") is told apart from absence.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    /// Conversation being updated
    #[serde(deserialize_with = "de_id")]
    pub id: ConversationId,
    /// New contact handle
    #[serde(default, alias = "contactNumber")]
    pub contact_handle: Option<String>,
    /// New display name; `Some(None)` clears it
    #[serde(default, alias = "customerName", deserialize_with = "de_present")]
    pub display_name: Option<Option<String>>,
    /// New status
    #[serde(default)]
    pub status: Option<ConversationStatus>,
    /// New assignee; `Some(None)` unassigns
    #[serde(default, deserialize_with = "de_present_id")]
    pub assigned_agent_id: Option<Option<String>>,
    /// Server-side unread count
    #[serde(default)]
    pub unread_count: Option<u32>,
    /// Server-side activity timestamp
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// New preview; `Some(None)` clears it
    #[serde(default, deserialize_with = "de_present")]
    pub last_message_preview: Option<Option<String>>,
}

impl ConversationPatch {
    /// Create an empty patch for a conversation
    pub fn new(id: impl Into<ConversationId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Patch that finalizes a conversation: closed and unassigned
    pub fn closed(mut self) -> Self {
        self.status = Some(ConversationStatus::Closed);
        self.assigned_agent_id = Some(None);
        self
    }

    /// Keep only status and assignee fields
    pub fn assignment_only(&self) -> Self {
        Self {
            id: self.id.clone(),
            status: self.status,
            assigned_agent_id: self.assigned_agent_id.clone(),
            ..Self::default()
        }
    }
}

impl From<Conversation> for ConversationPatch {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            contact_handle: Some(conversation.contact_handle),
            display_name: Some(conversation.display_name),
            status: Some(conversation.status),
            assigned_agent_id: Some(conversation.assigned_agent_id),
            unread_count: Some(conversation.unread_count),
            updated_at: Some(conversation.updated_at),
            last_message_preview: Some(conversation.last_message_preview),
        }
    }
}
