//! Reconciliation rules
//!
//! Maps one decoded push event onto the conversation list and the active
//! window. List metadata (ordering, unread counters) and window content
//! (message bodies, notes) are updated independently; neither is derived from
//! the other.
//!
//! `apply` is pure with respect to I/O: anything that needs the network or the
//! outside world is returned as an `Effects` value for the caller to act on.

use crate::cache::{ActiveWindow, ConversationList, LiveAppend, Upsert};
use crate::events::SyncEvent;
use crate::model::{ConversationId, ConversationPatch};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

/// User-facing notification raised by an event
///
/// The engine publishes these; rendering them is up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A conversation appeared that was not in the list
    NewConversation {
        /// The new conversation
        conversation_id: ConversationId,
        /// Customer label at the time of the event
        label: String,
    },
    /// A conversation was assigned to this agent
    AssignedToMe {
        /// The assigned conversation
        conversation_id: ConversationId,
    },
    /// Dashboard analytics changed
    AnalyticsUpdated(Value),
}

/// Follow-up work produced by an event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    /// Notices to publish
    pub notices: Vec<Notice>,
    /// The visible list page should be fetched again
    pub reload_list: bool,
}

/// Apply one event to the caches
///
/// `now` stamps list activity for events that carry no timestamp of their own.
pub fn apply(
    event: SyncEvent,
    list: &mut ConversationList,
    window: &mut ActiveWindow,
    now: DateTime<Utc>,
) -> Effects {
    let mut effects = Effects::default();

    match event {
        SyncEvent::NewMessage {
            message,
            conversation,
        } => {
            let mut patch =
                conversation.unwrap_or_else(|| ConversationPatch::new(&message.conversation_id));
            // The local counter is authoritative between list fetches
            patch.unread_count = None;
            if patch.last_message_preview.is_none() {
                patch.last_message_preview = Some(message.preview());
            }

            list.upsert_from_event(&patch, now);
            list.increment_unread(&patch.id, window.conversation_id());
            if let LiveAppend::Duplicate = window.append_live(message) {
                debug!("Message for {} already in history", patch.id);
            }
        }
        SyncEvent::NewConversation(patch) => {
            if let Upsert::Inserted = list.upsert_from_event(&patch, now) {
                let label = list
                    .get(&patch.id)
                    .map(|c| c.label().to_string())
                    .unwrap_or_default();
                effects.notices.push(Notice::NewConversation {
                    conversation_id: patch.id,
                    label,
                });
            }
        }
        SyncEvent::AssignmentChanged(patch) | SyncEvent::Released(patch) => {
            let patch = patch.assignment_only();
            list.merge(&patch);
            window.update_details(&patch);
        }
        SyncEvent::Finalized(patch) => {
            let patch = ConversationPatch::new(patch.id).closed();
            list.merge(&patch);
            window.update_details(&patch);
        }
        SyncEvent::MessagesRead {
            conversation_id,
            read_at,
        } => {
            list.reset_unread(&conversation_id);
            window.mark_read(&conversation_id, read_at.unwrap_or(now));
        }
        SyncEvent::NoteAdded(note) => {
            window.append_note(note);
        }
        SyncEvent::PersonalAssignment(patch) => {
            let assignment = patch.assignment_only();
            list.merge(&assignment);
            window.update_details(&assignment);
            effects.notices.push(Notice::AssignedToMe {
                conversation_id: patch.id,
            });
            effects.reload_list = true;
        }
        SyncEvent::AnalyticsUpdate(payload) => {
            effects.notices.push(Notice::AnalyticsUpdated(payload));
        }
        SyncEvent::PresenceUpdate(_)
        | SyncEvent::ExternalChannelStatus(_)
        | SyncEvent::ExternalChannelQrCode(_) => {}
    }

    effects
}
