//! Conversation list cache
//!
//! Ordered most-recently-active first. Ordering is insertion-order stable: an
//! entry moves only when something touches it locally, never because of a
//! timestamp re-sort, so two conversations with equal `updated_at` keep the
//! order in which they were last touched.

use crate::model::{Conversation, ConversationPatch, PageMeta};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The conversation was not cached and has been inserted at the front
    Inserted,
    /// An existing entry was merged and moved to the front
    Updated,
}

/// Ordered collection of conversation summaries keyed by id
#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    items: Vec<Conversation>,
    cursor: Option<PageMeta>,
}

impl ConversationList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the visible page wholesale after an explicit fetch
    ///
    /// Nothing from the previous contents survives. Duplicate ids inside the
    /// page keep their first occurrence.
    pub fn replace_page(&mut self, items: Vec<Conversation>, cursor: PageMeta) {
        let mut seen = HashSet::with_capacity(items.len());
        self.items = items
            .into_iter()
            .filter(|conversation| seen.insert(conversation.id.clone()))
            .collect();
        self.cursor = Some(cursor);
    }

    /// Apply an event's conversation data and surface it first
    ///
    /// Existing entries are merged (the patch wins for every field it carries)
    /// and moved to the front; unknown ids are inserted at the front. When the
    /// patch has no timestamp of its own, `updated_at` is stamped with `now`.
    pub fn upsert_from_event(&mut self, patch: &ConversationPatch, now: DateTime<Utc>) -> Upsert {
        let stamp = patch.updated_at.unwrap_or(now);
        match self.position(&patch.id) {
            Some(index) => {
                let conversation = &mut self.items[index];
                conversation.apply(patch);
                conversation.touch(stamp);
                self.move_to_front(index);
                Upsert::Updated
            }
            None => {
                let mut conversation = Conversation::from_patch(patch, now);
                conversation.touch(stamp);
                self.items.insert(0, conversation);
                Upsert::Inserted
            }
        }
    }

    /// Merge a patch in place without reordering
    ///
    /// Returns `false` when the conversation is not cached.
    pub fn merge(&mut self, patch: &ConversationPatch) -> bool {
        match self.get_mut(&patch.id) {
            Some(conversation) => {
                conversation.apply(patch);
                true
            }
            None => false,
        }
    }

    /// Count one more unread message
    ///
    /// No-op when `id` is the conversation currently open (`active`), since the
    /// agent is already looking at it. Returns whether the counter changed.
    pub fn increment_unread(&mut self, id: &str, active: Option<&str>) -> bool {
        if active == Some(id) {
            return false;
        }
        match self.get_mut(id) {
            Some(conversation) => {
                conversation.unread_count = conversation.unread_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Set the unread counter to zero
    ///
    /// Returns `false` when the conversation is not cached.
    pub fn reset_unread(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(conversation) => {
                conversation.unread_count = 0;
                true
            }
            None => false,
        }
    }

    /// Look up a conversation by id
    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.items.iter_mut().find(|c| c.id == id)
    }

    /// Index of a conversation in display order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|c| c.id == id)
    }

    /// Conversations in display order
    pub fn as_slice(&self) -> &[Conversation] {
        &self.items
    }

    /// Iterate conversations in display order
    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.items.iter()
    }

    /// Ids in display order
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|c| c.id.as_str()).collect()
    }

    /// Number of cached conversations
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cursor of the last explicit page fetch
    pub fn cursor(&self) -> Option<&PageMeta> {
        self.cursor.as_ref()
    }

    /// Sum of unread counters across cached conversations
    pub fn total_unread(&self) -> u64 {
        self.items.iter().map(|c| u64::from(c.unread_count)).sum()
    }

    fn move_to_front(&mut self, index: usize) {
        self.items[..=index].rotate_right(1);
    }
}
