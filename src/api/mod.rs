//! REST collaborator
//!
//! `ChatApi` is the paginated fetch and command interface the engine talks to.
//! `HttpChatApi` implements it over HTTP with `reqwest`.

pub mod http;

pub use http::HttpChatApi;

use crate::model::{Conversation, ConversationPatch, Message, Note, Page};
use crate::Result;
use async_trait::async_trait;

/// Backend REST operations used by the engine
///
/// Commands return what the server confirmed. A command whose response does
/// not carry a conversation returns `None`; the matching push event will
/// update the caches instead.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch one page of the conversation list
    async fn list_conversations(&self, page: u32, limit: u32) -> Result<Page<Conversation>>;

    /// Fetch one page of a conversation's history; `None` asks for the newest
    async fn list_messages(
        &self,
        conversation_id: &str,
        page: Option<u32>,
        limit: u32,
    ) -> Result<Page<Message>>;

    /// Fetch the internal notes of a conversation
    async fn fetch_notes(&self, conversation_id: &str) -> Result<Vec<Note>>;

    /// Mark every message of a conversation as read
    async fn mark_read(&self, conversation_id: &str) -> Result<()>;

    /// Assign a conversation to `agent_id`, or to the caller when `None`
    async fn assign(
        &self,
        conversation_id: &str,
        agent_id: Option<&str>,
    ) -> Result<Option<ConversationPatch>>;

    /// Release a conversation back to the queue
    async fn release(&self, conversation_id: &str) -> Result<Option<ConversationPatch>>;

    /// Remove the assignee without closing the conversation
    async fn unassign(&self, conversation_id: &str) -> Result<Option<ConversationPatch>>;

    /// Send a text message
    async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message>;

    /// Add an internal note
    async fn create_note(&self, conversation_id: &str, content: &str) -> Result<Note>;
}
