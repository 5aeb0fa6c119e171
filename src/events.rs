//! Push event kinds and payload decoding
//!
//! Raw events arrive as `(name, json)` pairs. The `EventCatalog` maps the
//! backend's names to an `EventKind`; `SyncEvent::decode` turns the payload
//! into a typed event. Payload decoding is lenient about id types and about
//! whether conversation ids sit inside or next to the nested object.

use crate::{
    connection::ExternalChannelStatus,
    model::{de_opt_id, ConversationId, ConversationPatch, Message, Note},
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Kinds of push events the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A message was added to a conversation
    NewMessage,
    /// A conversation was created
    NewConversation,
    /// A conversation was assigned or reassigned
    AssignmentChanged,
    /// A conversation was released back to the queue
    Released,
    /// A conversation was finalized
    Finalized,
    /// Messages of a conversation were read
    MessagesRead,
    /// An internal note was added
    NoteAdded,
    /// The roster of online agents changed
    PresenceUpdate,
    /// The external messaging channel changed state
    ExternalChannelStatus,
    /// The external messaging channel needs a QR pairing
    ExternalChannelQrCode,
    /// A conversation was assigned to this agent
    PersonalAssignment,
    /// Dashboard analytics changed
    AnalyticsUpdate,
}

impl EventKind {
    /// Every event kind
    pub const ALL: [EventKind; 12] = [
        EventKind::NewMessage,
        EventKind::NewConversation,
        EventKind::AssignmentChanged,
        EventKind::Released,
        EventKind::Finalized,
        EventKind::MessagesRead,
        EventKind::NoteAdded,
        EventKind::PresenceUpdate,
        EventKind::ExternalChannelStatus,
        EventKind::ExternalChannelQrCode,
        EventKind::PersonalAssignment,
        EventKind::AnalyticsUpdate,
    ];

    /// Kinds handled by the connection manager rather than the caches
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            EventKind::PresenceUpdate
                | EventKind::ExternalChannelStatus
                | EventKind::ExternalChannelQrCode
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::NewMessage => "new-message",
            EventKind::NewConversation => "new-conversation",
            EventKind::AssignmentChanged => "assignment-changed",
            EventKind::Released => "released",
            EventKind::Finalized => "finalized",
            EventKind::MessagesRead => "messages-read",
            EventKind::NoteAdded => "note-added",
            EventKind::PresenceUpdate => "presence-update",
            EventKind::ExternalChannelStatus => "external-channel-status",
            EventKind::ExternalChannelQrCode => "external-channel-qr-code",
            EventKind::PersonalAssignment => "personal-assignment-notification",
            EventKind::AnalyticsUpdate => "analytics-update",
        };
        f.write_str(label)
    }
}

/// A decoded push event
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A message was added; `conversation` carries any conversation fields
    /// the backend sent along
    NewMessage {
        /// The new message, with `conversation_id` filled in
        message: Message,
        /// Conversation fields included in the event
        conversation: Option<ConversationPatch>,
    },
    /// A conversation was created
    NewConversation(ConversationPatch),
    /// A conversation was assigned or reassigned
    AssignmentChanged(ConversationPatch),
    /// A conversation was released back to the queue
    Released(ConversationPatch),
    /// A conversation was finalized
    Finalized(ConversationPatch),
    /// Messages of a conversation were read
    MessagesRead {
        /// Conversation whose messages were read
        conversation_id: ConversationId,
        /// When they were read, if the backend says
        read_at: Option<DateTime<Utc>>,
    },
    /// An internal note was added
    NoteAdded(Note),
    /// Ids of the agents currently online
    PresenceUpdate(BTreeSet<String>),
    /// New state of the external messaging channel
    ExternalChannelStatus(ExternalChannelStatus),
    /// QR code to pair the external messaging channel
    ExternalChannelQrCode(String),
    /// A conversation was assigned to this agent
    PersonalAssignment(ConversationPatch),
    /// Opaque analytics payload
    AnalyticsUpdate(Value),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageEnvelope {
    #[serde(default, alias = "chatId", deserialize_with = "de_opt_id")]
    conversation_id: Option<String>,
    message: Message,
    #[serde(default, alias = "chat")]
    conversation: Option<ConversationPatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadEnvelope {
    #[serde(alias = "chatId", deserialize_with = "crate::model::de_id")]
    conversation_id: String,
    #[serde(default)]
    read_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteEnvelope {
    #[serde(default, alias = "chatId", deserialize_with = "de_opt_id")]
    conversation_id: Option<String>,
    note: Note,
}

impl SyncEvent {
    /// Decode a raw payload for a known event kind
    ///
    /// # Errors
    /// Returns `Error::Payload` when the payload does not have the expected shape.
    pub fn decode(kind: EventKind, payload: &Value) -> Result<Self> {
        let malformed = |e: serde_json::Error| Error::Payload(format!("{}: {}", kind, e));
        let patch = || ConversationPatch::deserialize(payload).map_err(malformed);

        let event = match kind {
            EventKind::NewMessage => {
                let (mut message, envelope_id, conversation) = if payload.get("message").is_some() {
                    let envelope = MessageEnvelope::deserialize(payload).map_err(malformed)?;
                    (envelope.message, envelope.conversation_id, envelope.conversation)
                } else {
                    (Message::deserialize(payload).map_err(malformed)?, None, None)
                };
                if let Some(id) = envelope_id {
                    message.conversation_id = id;
                }
                if message.conversation_id.is_empty() {
                    return Err(Error::Payload(format!(
                        "{}: message {} has no conversation id",
                        kind, message.id
                    )));
                }
                let conversation = conversation.map(|mut patch| {
                    patch.id = message.conversation_id.clone();
                    patch
                });
                SyncEvent::NewMessage {
                    message,
                    conversation,
                }
            }
            EventKind::NewConversation => SyncEvent::NewConversation(patch()?),
            EventKind::AssignmentChanged => SyncEvent::AssignmentChanged(patch()?),
            EventKind::Released => SyncEvent::Released(patch()?),
            EventKind::Finalized => SyncEvent::Finalized(patch()?),
            EventKind::PersonalAssignment => SyncEvent::PersonalAssignment(patch()?),
            EventKind::MessagesRead => match payload {
                Value::String(id) => SyncEvent::MessagesRead {
                    conversation_id: id.clone(),
                    read_at: None,
                },
                Value::Number(id) => SyncEvent::MessagesRead {
                    conversation_id: id.to_string(),
                    read_at: None,
                },
                _ => {
                    let envelope = ReadEnvelope::deserialize(payload).map_err(malformed)?;
                    SyncEvent::MessagesRead {
                        conversation_id: envelope.conversation_id,
                        read_at: envelope.read_at,
                    }
                }
            },
            EventKind::NoteAdded => {
                let envelope = NoteEnvelope::deserialize(payload).map_err(malformed)?;
                let mut note = envelope.note;
                if let Some(id) = envelope.conversation_id {
                    note.conversation_id = id;
                }
                if note.conversation_id.is_empty() {
                    return Err(Error::Payload(format!(
                        "{}: note {} has no conversation id",
                        kind, note.id
                    )));
                }
                SyncEvent::NoteAdded(note)
            }
            EventKind::PresenceUpdate => SyncEvent::PresenceUpdate(decode_presence(payload)),
            EventKind::ExternalChannelStatus => {
                let status = match payload {
                    Value::String(_) => payload,
                    _ => payload.get("status").unwrap_or(&Value::Null),
                };
                let status = match status {
                    Value::Null => ExternalChannelStatus::Disconnected,
                    other => ExternalChannelStatus::deserialize(other).map_err(malformed)?,
                };
                SyncEvent::ExternalChannelStatus(status)
            }
            EventKind::ExternalChannelQrCode => {
                let qr = match payload {
                    Value::String(qr) => Some(qr.clone()),
                    _ => payload.get("qr").and_then(Value::as_str).map(str::to_string),
                };
                match qr {
                    Some(qr) => SyncEvent::ExternalChannelQrCode(qr),
                    None => {
                        return Err(Error::Payload(format!("{}: missing QR code", kind)));
                    }
                }
            }
            EventKind::AnalyticsUpdate => SyncEvent::AnalyticsUpdate(payload.clone()),
        };
        Ok(event)
    }

    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::NewMessage { .. } => EventKind::NewMessage,
            SyncEvent::NewConversation(_) => EventKind::NewConversation,
            SyncEvent::AssignmentChanged(_) => EventKind::AssignmentChanged,
            SyncEvent::Released(_) => EventKind::Released,
            SyncEvent::Finalized(_) => EventKind::Finalized,
            SyncEvent::MessagesRead { .. } => EventKind::MessagesRead,
            SyncEvent::NoteAdded(_) => EventKind::NoteAdded,
            SyncEvent::PresenceUpdate(_) => EventKind::PresenceUpdate,
            SyncEvent::ExternalChannelStatus(_) => EventKind::ExternalChannelStatus,
            SyncEvent::ExternalChannelQrCode(_) => EventKind::ExternalChannelQrCode,
            SyncEvent::PersonalAssignment(_) => EventKind::PersonalAssignment,
            SyncEvent::AnalyticsUpdate(_) => EventKind::AnalyticsUpdate,
        }
    }

    /// Conversation the event refers to, if any
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            SyncEvent::NewMessage { message, .. } => Some(&message.conversation_id),
            SyncEvent::NewConversation(patch)
            | SyncEvent::AssignmentChanged(patch)
            | SyncEvent::Released(patch)
            | SyncEvent::Finalized(patch)
            | SyncEvent::PersonalAssignment(patch) => Some(&patch.id),
            SyncEvent::MessagesRead {
                conversation_id, ..
            } => Some(conversation_id),
            SyncEvent::NoteAdded(note) => Some(&note.conversation_id),
            _ => None,
        }
    }
}

/// Extract agent ids from a roster payload
///
/// Accepts a bare array or `{ "agents": [...] }`, with entries given as ids or
/// as objects carrying `id` / `userId`. Entries without an id are skipped.
fn decode_presence(payload: &Value) -> BTreeSet<String> {
    let entries = match payload {
        Value::Array(entries) => entries.as_slice(),
        _ => payload
            .get("agents")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    };
    entries
        .iter()
        .filter_map(|entry| {
            let id = match entry {
                Value::Object(_) => entry.get("id").or_else(|| entry.get("userId"))?,
                other => other,
            };
            match id {
                Value::String(id) => Some(id.clone()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            }
        })
        .collect()
}
