//! Active conversation window
//!
//! Holds the message history, notes and pagination cursor of the one
//! conversation currently open. Network fetches are split in two phases: a
//! `begin_*` call hands out a ticket carrying a monotonic request token, and
//! the matching `complete_*` / `fail_*` call applies the result only if that
//! token still identifies the current window. A late response for a window
//! that has since been reopened is discarded with a cheap integer comparison.
//!
//! History stays sorted ascending by `(timestamp, id)` with unique ids after
//! any mix of live appends and older-page prepends.

use crate::model::{
    Conversation, ConversationId, ConversationPatch, LoadState, Message, MessageId, Note, Page,
    PageMeta,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Ticket for an in-flight `open`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTicket {
    token: u64,
    conversation_id: ConversationId,
    page: Option<u32>,
}

impl OpenTicket {
    /// Request token captured when the open was issued
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Conversation being opened
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Requested history page; `None` asks for the newest page
    pub fn page(&self) -> Option<u32> {
        self.page
    }
}

/// Ticket for an in-flight older-page fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OlderTicket {
    token: u64,
    conversation_id: ConversationId,
    page: u32,
}

impl OlderTicket {
    /// Token of the window the fetch was issued for
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Conversation whose history is being extended
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Page number to fetch
    pub fn page(&self) -> u32 {
        self.page
    }
}

/// Whether a fetch result was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Result applied; `added` messages were new to the window
    Accepted {
        /// Messages inserted into the history
        added: usize,
    },
    /// The window was reopened or closed since the request; result ignored
    Stale,
}

/// Outcome of a live append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveAppend {
    /// Message added to the history
    Appended,
    /// A message with this id is already present
    Duplicate,
    /// The message belongs to a conversation that is not open
    NotOpen,
}

#[derive(Debug, Clone)]
struct OpenConversation {
    conversation_id: ConversationId,
    details: Option<Conversation>,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    notes: Vec<Note>,
    cursor: Option<PageMeta>,
    load: LoadState,
    older: LoadState,
}

impl OpenConversation {
    fn new(conversation_id: ConversationId, details: Option<Conversation>) -> Self {
        Self {
            conversation_id,
            details,
            messages: Vec::new(),
            ids: HashSet::new(),
            notes: Vec::new(),
            cursor: None,
            load: LoadState::Pending,
            older: LoadState::Idle,
        }
    }

    fn rebuild_ids(&mut self) {
        self.ids = self.messages.iter().map(|m| m.id.clone()).collect();
    }
}

/// Message history of the single open conversation
#[derive(Debug, Clone, Default)]
pub struct ActiveWindow {
    next_token: u64,
    token: u64,
    current: Option<OpenConversation>,
}

impl ActiveWindow {
    /// Create a window with no conversation open
    pub fn new() -> Self {
        Self::default()
    }

    /// Start opening a conversation, replacing the current window entirely
    ///
    /// Any in-flight open or older-page fetch of the previous window becomes
    /// stale. `details` seeds the status/assignee shown for the conversation.
    pub fn begin_open(
        &mut self,
        conversation_id: impl Into<ConversationId>,
        page: Option<u32>,
        details: Option<Conversation>,
    ) -> OpenTicket {
        self.next_token += 1;
        self.token = self.next_token;
        let conversation_id = conversation_id.into();
        self.current = Some(OpenConversation::new(conversation_id.clone(), details));
        OpenTicket {
            token: self.token,
            conversation_id,
            page,
        }
    }

    /// Apply the first history page (and notes) of an open
    ///
    /// Live messages and notes received while the fetch was in flight are
    /// merged with the page rather than dropped.
    pub fn complete_open(
        &mut self,
        ticket: &OpenTicket,
        page: Page<Message>,
        notes: Vec<Note>,
    ) -> Applied {
        if !self.is_current(ticket.token) {
            debug!("Discarding stale history page for {}", ticket.conversation_id);
            return Applied::Stale;
        }
        let Some(window) = self.current.as_mut() else {
            return Applied::Stale;
        };

        let live = std::mem::take(&mut window.messages);
        let fetched = page.items.len();
        window.messages = merge_sorted(page.items, live);
        window.rebuild_ids();

        let live_notes = std::mem::take(&mut window.notes);
        let mut seen = HashSet::new();
        window.notes = notes
            .into_iter()
            .chain(live_notes)
            .filter(|note| seen.insert(note.id.clone()))
            .collect();
        window.notes.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        window.cursor = Some(page.meta);
        window.load = LoadState::Idle;
        debug_assert!(self.is_ordered());
        Applied::Accepted { added: fetched }
    }

    /// Record a failed open; the window stays on the requested conversation
    pub fn fail_open(&mut self, ticket: &OpenTicket, error: impl Into<String>) -> Applied {
        if !self.is_current(ticket.token) {
            return Applied::Stale;
        }
        match self.current.as_mut() {
            Some(window) => {
                window.load = LoadState::Failed(error.into());
                Applied::Accepted { added: 0 }
            }
            None => Applied::Stale,
        }
    }

    /// Close the window; in-flight results for it become stale
    pub fn close(&mut self) {
        self.current = None;
    }

    /// Start loading the next older page
    ///
    /// Returns `None` (nothing to do) when no conversation is loaded, the open
    /// itself is still pending, an older fetch is already in flight, or the
    /// cursor reports no older history.
    pub fn begin_load_older(&mut self) -> Option<OlderTicket> {
        let token = self.token;
        let window = self.current.as_mut()?;
        if window.load.is_pending() || window.older.is_pending() {
            return None;
        }
        let page = window.cursor.as_ref()?.older_page()?;
        window.older = LoadState::Pending;
        Some(OlderTicket {
            token,
            conversation_id: window.conversation_id.clone(),
            page,
        })
    }

    /// Prepend an older page as a block
    ///
    /// Messages already present are skipped. If the block does not sort
    /// entirely before the current history the window is re-sorted, which
    /// keeps the history ordered even when the backend page overlaps.
    pub fn complete_load_older(&mut self, ticket: &OlderTicket, page: Page<Message>) -> Applied {
        if !self.is_current(ticket.token) {
            debug!("Discarding stale older page for {}", ticket.conversation_id);
            return Applied::Stale;
        }
        let Some(window) = self.current.as_mut() else {
            return Applied::Stale;
        };

        let mut seen = HashSet::new();
        let mut block: Vec<Message> = page
            .items
            .into_iter()
            .filter(|m| !window.ids.contains(&m.id) && seen.insert(m.id.clone()))
            .collect();
        let added = block.len();

        let block_sorted = block.windows(2).all(|w| w[0].order_key() < w[1].order_key());
        let fits_before = match (block.last(), window.messages.first()) {
            (Some(last), Some(first)) => last.order_key() < first.order_key(),
            _ => true,
        };

        if block_sorted && fits_before {
            block.append(&mut window.messages);
            window.messages = block;
        } else {
            warn!(
                "Older page {} of {} overlaps loaded history, re-sorting",
                ticket.page, ticket.conversation_id
            );
            let existing = std::mem::take(&mut window.messages);
            window.messages = merge_sorted(block, existing);
        }
        window.rebuild_ids();
        window.cursor = Some(page.meta);
        window.older = LoadState::Idle;
        debug_assert!(self.is_ordered());
        Applied::Accepted { added }
    }

    /// Record a failed older-page fetch so a retry is possible
    pub fn fail_load_older(&mut self, ticket: &OlderTicket, error: impl Into<String>) -> Applied {
        if !self.is_current(ticket.token) {
            return Applied::Stale;
        }
        match self.current.as_mut() {
            Some(window) => {
                window.older = LoadState::Failed(error.into());
                Applied::Accepted { added: 0 }
            }
            None => Applied::Stale,
        }
    }

    /// Append a message pushed by the server
    ///
    /// Ignored unless the message belongs to the open conversation and its id
    /// is new. A message older than the tail is inserted at its sorted position.
    pub fn append_live(&mut self, message: Message) -> LiveAppend {
        let Some(window) = self.current.as_mut() else {
            return LiveAppend::NotOpen;
        };
        if window.conversation_id != message.conversation_id {
            return LiveAppend::NotOpen;
        }
        if window.ids.contains(&message.id) {
            debug!("Duplicate message {} suppressed", message.id);
            return LiveAppend::Duplicate;
        }

        window.ids.insert(message.id.clone());
        let in_order = window
            .messages
            .last()
            .is_none_or(|last| last.order_key() < message.order_key());
        if in_order {
            window.messages.push(message);
        } else {
            let index = window
                .messages
                .partition_point(|m| m.order_key() < message.order_key());
            window.messages.insert(index, message);
        }
        debug_assert!(self.is_ordered());
        LiveAppend::Appended
    }

    /// Stamp `read_at` on every unread message of the open conversation
    ///
    /// Returns how many messages changed.
    pub fn mark_read(&mut self, conversation_id: &str, at: DateTime<Utc>) -> usize {
        match self.current.as_mut() {
            Some(window) if window.conversation_id == conversation_id => window
                .messages
                .iter_mut()
                .map(|m| m.mark_read(at))
                .filter(|changed| *changed)
                .count(),
            _ => 0,
        }
    }

    /// Merge conversation fields into the open window's details
    ///
    /// History is left untouched. Returns `false` if another conversation (or
    /// none) is open.
    pub fn update_details(&mut self, patch: &ConversationPatch) -> bool {
        match self.current.as_mut() {
            Some(window) if window.conversation_id == patch.id => {
                match window.details.as_mut() {
                    Some(details) => details.apply(patch),
                    None => window.details = Some(Conversation::from_patch(patch, Utc::now())),
                }
                true
            }
            _ => false,
        }
    }

    /// Append an internal note if its conversation is open
    pub fn append_note(&mut self, note: Note) -> bool {
        match self.current.as_mut() {
            Some(window) if window.conversation_id == note.conversation_id => {
                if window.notes.iter().any(|n| n.id == note.id) {
                    return false;
                }
                window.notes.push(note);
                true
            }
            _ => false,
        }
    }

    /// Id of the open conversation
    pub fn conversation_id(&self) -> Option<&str> {
        self.current.as_ref().map(|w| w.conversation_id.as_str())
    }

    /// Whether `conversation_id` is the open conversation
    pub fn is_open_for(&self, conversation_id: &str) -> bool {
        self.conversation_id() == Some(conversation_id)
    }

    /// Token of the current window
    pub fn token(&self) -> u64 {
        self.token
    }

    /// History in display order
    pub fn messages(&self) -> &[Message] {
        self.current.as_ref().map(|w| w.messages.as_slice()).unwrap_or(&[])
    }

    /// Internal notes of the open conversation
    pub fn notes(&self) -> &[Note] {
        self.current.as_ref().map(|w| w.notes.as_slice()).unwrap_or(&[])
    }

    /// Status/assignee details of the open conversation
    pub fn details(&self) -> Option<&Conversation> {
        self.current.as_ref().and_then(|w| w.details.as_ref())
    }

    /// Cursor of the last history fetch
    pub fn cursor(&self) -> Option<&PageMeta> {
        self.current.as_ref().and_then(|w| w.cursor.as_ref())
    }

    /// State of the open request
    pub fn load_state(&self) -> LoadState {
        self.current.as_ref().map(|w| w.load.clone()).unwrap_or_default()
    }

    /// State of the older-page request
    pub fn older_state(&self) -> LoadState {
        self.current.as_ref().map(|w| w.older.clone()).unwrap_or_default()
    }

    /// Whether more history can be loaded
    pub fn has_older(&self) -> bool {
        self.cursor().is_some_and(|c| c.older_page().is_some())
    }

    /// Check the history invariant: strictly ascending `(timestamp, id)`
    pub fn is_ordered(&self) -> bool {
        self.messages()
            .windows(2)
            .all(|w| w[0].order_key() < w[1].order_key())
    }

    fn is_current(&self, token: u64) -> bool {
        self.current.is_some() && self.token == token
    }
}

/// Merge two message sets into one sorted, id-unique history
///
/// On id collisions the entry from `primary` is kept.
fn merge_sorted(primary: Vec<Message>, secondary: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::with_capacity(primary.len() + secondary.len());
    let mut merged: Vec<Message> = primary
        .into_iter()
        .chain(secondary)
        .filter(|m| seen.insert(m.id.clone()))
        .collect();
    merged.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    merged
}
