//! `ChatApi` over HTTP

use super::ChatApi;
use crate::model::{Conversation, ConversationPatch, Message, Note, Page};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ConversationDetail {
    #[serde(default)]
    notes: Vec<Note>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<Value>,
}

/// REST client authenticated with a bearer token
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpChatApi {
    /// Create a client for the API at `base_url`
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!("{} {}", status, response.url().path());

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|e| e.message)
                .map(|message| match message {
                    Value::String(text) => text,
                    other => other.to_string(),
                })
                .unwrap_or(body);
            return Err(Error::Api(format!("{}: {}", status, message)));
        }
        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send(request).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Command response that may or may not be a conversation
    async fn command(&self, request: RequestBuilder) -> Result<Option<ConversationPatch>> {
        let body = self.send(request).await?.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice(&body) {
            Ok(patch) => Ok(Some(patch)),
            Err(e) => {
                warn!("Command response is not a conversation: {}", e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self, page: u32, limit: u32) -> Result<Page<Conversation>> {
        self.fetch(
            self.request(Method::GET, "/chats")
                .query(&[("page", page), ("limit", limit)]),
        )
        .await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        page: Option<u32>,
        limit: u32,
    ) -> Result<Page<Message>> {
        let mut request = self
            .request(Method::GET, &format!("/chats/{}/messages", conversation_id))
            .query(&[("limit", limit)]);
        if let Some(page) = page {
            request = request.query(&[("page", page)]);
        }
        let mut page: Page<Message> = self.fetch(request).await?;
        for message in page.items.iter_mut().filter(|m| m.conversation_id.is_empty()) {
            message.conversation_id = conversation_id.to_string();
        }
        Ok(page)
    }

    async fn fetch_notes(&self, conversation_id: &str) -> Result<Vec<Note>> {
        let detail: ConversationDetail = self
            .fetch(self.request(Method::GET, &format!("/chats/{}", conversation_id)))
            .await?;
        Ok(detail
            .notes
            .into_iter()
            .map(|mut note| {
                if note.conversation_id.is_empty() {
                    note.conversation_id = conversation_id.to_string();
                }
                note
            })
            .collect())
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        self.send(
            self.request(Method::PATCH, &format!("/chats/{}/read", conversation_id))
                .json(&json!({})),
        )
        .await?;
        Ok(())
    }

    async fn assign(
        &self,
        conversation_id: &str,
        agent_id: Option<&str>,
    ) -> Result<Option<ConversationPatch>> {
        let body = match agent_id {
            Some(agent_id) => json!({ "agentId": agent_id }),
            None => json!({}),
        };
        self.command(
            self.request(Method::PATCH, &format!("/chats/{}/assign", conversation_id))
                .json(&body),
        )
        .await
    }

    async fn release(&self, conversation_id: &str) -> Result<Option<ConversationPatch>> {
        self.command(
            self.request(Method::PATCH, &format!("/chats/{}/release", conversation_id))
                .json(&json!({})),
        )
        .await
    }

    async fn unassign(&self, conversation_id: &str) -> Result<Option<ConversationPatch>> {
        self.command(
            self.request(Method::PATCH, &format!("/chats/{}/unassign", conversation_id))
                .json(&json!({})),
        )
        .await
    }

    async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message> {
        let mut message: Message = self
            .fetch(
                self.request(Method::POST, &format!("/chats/{}/message", conversation_id))
                    .json(&json!({ "content": content })),
            )
            .await?;
        if message.conversation_id.is_empty() {
            message.conversation_id = conversation_id.to_string();
        }
        Ok(message)
    }

    async fn create_note(&self, conversation_id: &str, content: &str) -> Result<Note> {
        let mut note: Note = self
            .fetch(
                self.request(Method::POST, &format!("/chats/{}/notes", conversation_id))
                    .json(&json!({ "content": content })),
            )
            .await?;
        if note.conversation_id.is_empty() {
            note.conversation_id = conversation_id.to_string();
        }
        Ok(note)
    }
}
