// Shared fixtures for the test modules

use crate::api::ChatApi;
use crate::model::{
    Conversation, ConversationPatch, ConversationStatus, Message, Note, Page, PageMeta, Sender,
};
use crate::settings::{ReconnectPolicy, SyncSettings};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Fixed instant plus `secs` seconds
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn message(id: &str, conversation_id: &str, secs: i64) -> Message {
    Message::new(id, conversation_id, Sender::Customer, format!("text {}", id), at(secs))
}

pub fn conversation(id: &str) -> Conversation {
    let mut conversation = Conversation::new(id, format!("+5491100{}", id));
    conversation.updated_at = at(0);
    conversation
}

pub fn note(id: &str, conversation_id: &str, secs: i64) -> Note {
    Note {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        content: format!("note {}", id),
        author_id: Some("agent-1".to_string()),
        created_at: at(secs),
    }
}

pub fn meta(page: u32, has_previous: bool) -> PageMeta {
    PageMeta {
        page,
        limit: 50,
        total: 0,
        total_pages: page,
        has_next_page: Some(false),
        has_previous_page: Some(has_previous),
    }
}

/// One history page with a message per second in `range`
pub fn history(
    conversation_id: &str,
    range: std::ops::Range<i64>,
    page: u32,
    has_previous: bool,
) -> Page<Message> {
    let items = range
        .map(|i| message(&format!("{}-m{:03}", conversation_id, i), conversation_id, i))
        .collect();
    Page::new(items, meta(page, has_previous))
}

/// Settings with short reconnect delays
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            base_delay_ms: 5,
            max_delay_ms: 20,
            randomization: 0.0,
            connect_timeout_ms: 1_000,
        },
        ..SyncSettings::default()
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

/// Await a future, failing the test after two seconds
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

/// Scripted REST collaborator
///
/// Responses are keyed by call (`list:1`, `messages:A:newest`, `notes:A`,
/// `assign:A`, ...). A gated key blocks until `release` is called for it, so
/// tests decide in which order responses resolve.
#[derive(Default)]
pub struct ScriptedApi {
    conversations: Mutex<HashMap<u32, Page<Conversation>>>,
    messages: Mutex<HashMap<String, Page<Message>>>,
    notes: Mutex<HashMap<String, Vec<Note>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_conversations(&self, page: u32, items: Vec<Conversation>) {
        self.conversations
            .lock()
            .unwrap()
            .insert(page, Page::new(items, meta(page, false)));
    }

    pub fn set_messages(&self, conversation_id: &str, page: Option<u32>, history: Page<Message>) {
        self.messages
            .lock()
            .unwrap()
            .insert(messages_key(conversation_id, page), history);
    }

    pub fn set_notes(&self, conversation_id: &str, notes: Vec<Note>) {
        self.notes
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), notes);
    }

    pub fn gate(&self, key: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, key: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(key) {
            gate.add_permits(1);
        }
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, key: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == key).count()
    }

    /// Wait until `key` has been requested
    pub async fn requested(&self, key: &str) {
        eventually(|| self.call_count(key) > 0).await;
    }

    async fn pass(&self, key: String) -> Result<()> {
        self.calls.lock().unwrap().push(key.clone());
        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing.lock().unwrap().contains(&key) {
            return Err(Error::Api(format!("scripted failure for {}", key)));
        }
        Ok(())
    }
}

pub fn messages_key(conversation_id: &str, page: Option<u32>) -> String {
    match page {
        Some(page) => format!("messages:{}:{}", conversation_id, page),
        None => format!("messages:{}:newest", conversation_id),
    }
}

#[async_trait]
impl ChatApi for ScriptedApi {
    async fn list_conversations(&self, page: u32, _limit: u32) -> Result<Page<Conversation>> {
        self.pass(format!("list:{}", page)).await?;
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .unwrap_or_else(|| Page::new(Vec::new(), meta(page, false))))
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        page: Option<u32>,
        _limit: u32,
    ) -> Result<Page<Message>> {
        let key = messages_key(conversation_id, page);
        self.pass(key.clone()).await?;
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Page::new(Vec::new(), meta(1, false))))
    }

    async fn fetch_notes(&self, conversation_id: &str) -> Result<Vec<Note>> {
        self.pass(format!("notes:{}", conversation_id)).await?;
        Ok(self
            .notes
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        self.pass(format!("mark_read:{}", conversation_id)).await
    }

    async fn assign(
        &self,
        conversation_id: &str,
        agent_id: Option<&str>,
    ) -> Result<Option<ConversationPatch>> {
        self.pass(format!("assign:{}", conversation_id)).await?;
        let mut patch = ConversationPatch::new(conversation_id);
        patch.status = Some(ConversationStatus::Active);
        patch.assigned_agent_id = Some(Some(agent_id.unwrap_or("me").to_string()));
        Ok(Some(patch))
    }

    async fn release(&self, conversation_id: &str) -> Result<Option<ConversationPatch>> {
        self.pass(format!("release:{}", conversation_id)).await?;
        let mut patch = ConversationPatch::new(conversation_id);
        patch.status = Some(ConversationStatus::Queued);
        patch.assigned_agent_id = Some(None);
        Ok(Some(patch))
    }

    async fn unassign(&self, conversation_id: &str) -> Result<Option<ConversationPatch>> {
        self.pass(format!("unassign:{}", conversation_id)).await?;
        Ok(None)
    }

    async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message> {
        self.pass(format!("send:{}", conversation_id)).await?;
        let id = format!("sent-{}", self.call_count(&format!("send:{}", conversation_id)));
        Ok(Message::new(id, conversation_id, Sender::Agent, content, Utc::now()))
    }

    async fn create_note(&self, conversation_id: &str, content: &str) -> Result<Note> {
        self.pass(format!("note:{}", conversation_id)).await?;
        Ok(Note {
            id: format!("note-{}", self.call_count(&format!("note:{}", conversation_id))),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            author_id: Some("me".to_string()),
            created_at: Utc::now(),
        })
    }
}
