//! Pagination metadata and load state

use serde::{Deserialize, Serialize};

/// Pagination cursor returned alongside every page
///
/// Only trusted right after the REST call that produced it; push events never
/// touch these fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageMeta {
    /// 1-based page number
    pub page: u32,
    /// Page size requested
    pub limit: u32,
    /// Total number of items across all pages
    pub total: u64,
    /// Total number of pages
    pub total_pages: u32,
    /// Newer items exist (message windows only)
    pub has_next_page: Option<bool>,
    /// Older history exists (message windows only)
    pub has_previous_page: Option<bool>,
}

impl PageMeta {
    /// Whether older history can still be loaded
    ///
    /// Falls back to `page > 1` when the backend omits the flag.
    pub fn has_older(&self) -> bool {
        self.has_previous_page.unwrap_or(self.page > 1)
    }

    /// Page number holding the next older block, if any
    pub fn older_page(&self) -> Option<u32> {
        if self.has_older() && self.page > 1 {
            Some(self.page - 1)
        } else {
            None
        }
    }
}

/// One page of items plus its cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items of this page, in the order the backend returned them
    #[serde(alias = "data")]
    pub items: Vec<T>,
    /// Cursor for this page
    #[serde(default)]
    pub meta: PageMeta,
}

impl<T> Page<T> {
    /// Create a page from items and a cursor
    pub fn new(items: Vec<T>, meta: PageMeta) -> Self {
        Self { items, meta }
    }
}

/// State of an asynchronous operation, for "loading" / "failed to load" UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    /// Nothing in flight
    #[default]
    Idle,
    /// Request issued, result not applied yet
    Pending,
    /// Last request failed with the given message
    Failed(String),
}

impl LoadState {
    /// Whether a request is in flight
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}
