use super::support::{at, conversation, history, message, meta, note};
use crate::cache::{ActiveWindow, ConversationList};
use crate::events::SyncEvent;
use crate::model::{ConversationPatch, ConversationStatus};
use crate::reconcile::{apply, Effects, Notice};
use serde_json::json;
use std::collections::BTreeSet;

struct Caches {
    list: ConversationList,
    window: ActiveWindow,
}

impl Caches {
    /// List with `a`, `b`, `c`; `open` (if any) loaded in the window
    fn new(open: Option<&str>) -> Self {
        let mut list = ConversationList::new();
        list.replace_page(
            vec![conversation("a"), conversation("b"), conversation("c")],
            meta(1, false),
        );
        let mut window = ActiveWindow::new();
        if let Some(id) = open {
            let ticket = window.begin_open(id, None, list.get(id).cloned());
            window.complete_open(&ticket, history(id, 0..3, 1, false), Vec::new());
        }
        Self { list, window }
    }

    fn apply(&mut self, event: SyncEvent) -> Effects {
        apply(event, &mut self.list, &mut self.window, at(500))
    }
}

fn new_message(id: &str, conversation_id: &str) -> SyncEvent {
    SyncEvent::NewMessage {
        message: message(id, conversation_id, 100),
        conversation: None,
    }
}

#[test]
fn test_new_message_for_closed_window_conversation() {
    let mut caches = Caches::new(None);

    let effects = caches.apply(new_message("m1", "c"));

    assert_eq!(effects, Effects::default());
    assert_eq!(caches.list.ids(), vec!["c", "a", "b"]);
    let c = caches.list.get("c").unwrap();
    assert_eq!(c.unread_count, 1);
    assert_eq!(c.updated_at, at(500));
    assert_eq!(c.last_message_preview.as_deref(), Some("text m1"));
    assert_eq!(caches.window.conversation_id(), None);
}

#[test]
fn test_new_message_for_open_conversation() {
    let mut caches = Caches::new(Some("b"));

    caches.apply(new_message("m1", "b"));
    caches.apply(new_message("m1", "b"));

    assert_eq!(caches.list.ids()[0], "b");
    assert_eq!(caches.list.get("b").unwrap().unread_count, 0);
    assert_eq!(caches.window.messages().len(), 4);
    assert_eq!(caches.window.messages().last().unwrap().id, "m1");
}

#[test]
fn test_new_message_for_unknown_conversation_inserts() {
    let mut caches = Caches::new(Some("a"));
    let mut patch = ConversationPatch::new("z");
    patch.display_name = Some(Some("Zoe".to_string()));
    patch.unread_count = Some(40);

    caches.apply(SyncEvent::NewMessage {
        message: message("m1", "z", 100),
        conversation: Some(patch),
    });

    let z = caches.list.get("z").unwrap();
    assert_eq!(caches.list.ids()[0], "z");
    assert_eq!(z.label(), "Zoe");
    assert_eq!(z.unread_count, 1);
    assert_eq!(caches.window.messages().len(), 3);
}

#[test]
fn test_new_conversation_notifies_once() {
    let mut caches = Caches::new(None);
    let mut patch = ConversationPatch::new("n");
    patch.contact_handle = Some("+123".to_string());

    let first = caches.apply(SyncEvent::NewConversation(patch.clone()));
    let replay = caches.apply(SyncEvent::NewConversation(patch));

    assert_eq!(
        first.notices,
        vec![Notice::NewConversation {
            conversation_id: "n".to_string(),
            label: "+123".to_string(),
        }]
    );
    assert!(replay.notices.is_empty());
    assert_eq!(caches.list.ids()[0], "n");
    assert_eq!(caches.list.len(), 4);
}

#[test]
fn test_assignment_merges_status_and_assignee_only() {
    let mut caches = Caches::new(Some("a"));
    let mut patch = ConversationPatch::new("a");
    patch.status = Some(ConversationStatus::Active);
    patch.assigned_agent_id = Some(Some("7".to_string()));
    patch.display_name = Some(Some("ignored".to_string()));

    caches.apply(SyncEvent::AssignmentChanged(patch));

    let a = caches.list.get("a").unwrap();
    assert_eq!(a.status, ConversationStatus::Active);
    assert_eq!(a.assigned_agent_id.as_deref(), Some("7"));
    assert_eq!(a.display_name, None);
    assert_eq!(caches.list.ids(), vec!["a", "b", "c"]);

    let details = caches.window.details().unwrap();
    assert_eq!(details.assigned_agent_id.as_deref(), Some("7"));
    assert_eq!(caches.window.messages().len(), 3);
}

#[test]
fn test_release_clears_assignee() {
    let mut caches = Caches::new(None);
    let mut assign = ConversationPatch::new("b");
    assign.assigned_agent_id = Some(Some("7".to_string()));
    caches.apply(SyncEvent::AssignmentChanged(assign));

    let mut release = ConversationPatch::new("b");
    release.status = Some(ConversationStatus::Queued);
    release.assigned_agent_id = Some(None);
    caches.apply(SyncEvent::Released(release));

    assert_eq!(caches.list.get("b").unwrap().assigned_agent_id, None);
}

#[test]
fn test_finalized_closes_and_mirrors_window() {
    let mut caches = Caches::new(Some("c"));
    let mut assign = ConversationPatch::new("c");
    assign.assigned_agent_id = Some(Some("7".to_string()));
    caches.apply(SyncEvent::AssignmentChanged(assign));

    caches.apply(SyncEvent::Finalized(ConversationPatch::new("c")));

    let c = caches.list.get("c").unwrap();
    assert_eq!(c.status, ConversationStatus::Closed);
    assert_eq!(c.assigned_agent_id, None);
    assert_eq!(caches.list.len(), 3, "closing never removes");
    assert_eq!(caches.window.details().unwrap().status, ConversationStatus::Closed);
}

#[test]
fn test_messages_read_resets_and_stamps() {
    let mut caches = Caches::new(Some("a"));
    caches.list.increment_unread("a", None);
    caches.list.increment_unread("b", None);

    caches.apply(SyncEvent::MessagesRead {
        conversation_id: "a".to_string(),
        read_at: Some(at(42)),
    });
    caches.apply(SyncEvent::MessagesRead {
        conversation_id: "b".to_string(),
        read_at: None,
    });

    assert_eq!(caches.list.get("a").unwrap().unread_count, 0);
    assert_eq!(caches.list.get("b").unwrap().unread_count, 0);
    assert!(caches.window.messages().iter().all(|m| m.read_at == Some(at(42))));
}

#[test]
fn test_note_added_only_for_open_window() {
    let mut caches = Caches::new(Some("a"));

    caches.apply(SyncEvent::NoteAdded(note("n1", "a", 1)));
    caches.apply(SyncEvent::NoteAdded(note("n2", "b", 1)));

    assert_eq!(caches.window.notes().len(), 1);
}

#[test]
fn test_personal_assignment_requests_reload() {
    let mut caches = Caches::new(None);
    let mut patch = ConversationPatch::new("b");
    patch.assigned_agent_id = Some(Some("me".to_string()));

    let effects = caches.apply(SyncEvent::PersonalAssignment(patch));

    assert!(effects.reload_list);
    assert_eq!(
        effects.notices,
        vec![Notice::AssignedToMe {
            conversation_id: "b".to_string()
        }]
    );
}

#[test]
fn test_connection_scoped_events_leave_caches_alone() {
    let mut caches = Caches::new(Some("a"));
    let before = caches.list.as_slice().to_vec();

    let effects = caches.apply(SyncEvent::PresenceUpdate(BTreeSet::from(["1".to_string()])));
    caches.apply(SyncEvent::ExternalChannelQrCode("qr".to_string()));

    assert_eq!(effects, Effects::default());
    assert_eq!(caches.list.as_slice(), before.as_slice());
}

#[test]
fn test_analytics_update_is_forwarded() {
    let mut caches = Caches::new(None);
    let effects = caches.apply(SyncEvent::AnalyticsUpdate(json!({ "score": 4.5 })));
    assert_eq!(effects.notices, vec![Notice::AnalyticsUpdated(json!({ "score": 4.5 }))]);
}
