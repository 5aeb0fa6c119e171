//! In-memory caches owned by the synchronization engine
//!
//! - `conversation_list` - ordered conversation summaries (inbox view)
//! - `active_window` - message history of the single open conversation
//!
//! Both are plain synchronous data structures. Every mutation completes before
//! returning, so callers holding one lock around them never expose partial state.

pub mod active_window;
pub mod conversation_list;

pub use active_window::{ActiveWindow, Applied, LiveAppend, OlderTicket, OpenTicket};
pub use conversation_list::{ConversationList, Upsert};
