//! Data model shared by the caches, the event decoder and the REST client
//!
//! Submodules:
//! - `conversation` - conversation summaries, statuses and partial updates
//! - `message` - chat lines, senders, media references and internal notes
//! - `page` - pagination metadata and per-operation load state
//!
//! Backend ids may arrive as JSON strings or numbers; both decode to `String`.

pub mod conversation;
pub mod message;
pub mod page;

pub use conversation::{Conversation, ConversationPatch, ConversationStatus};
pub use message::{MediaRef, Message, Note, Sender};
pub use page::{LoadState, Page, PageMeta};

use serde::{Deserialize, Deserializer};

/// Stable conversation identifier
pub type ConversationId = String;

/// Stable message identifier
pub type MessageId = String;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Signed(n) => n.to_string(),
            RawId::Unsigned(n) => n.to_string(),
        }
    }
}

/// Decode an id given either as a string or a number
pub(crate) fn de_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

/// Decode an optional id given either as a string or a number
pub(crate) fn de_opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

/// Distinguish "field absent" (`None`) from "field present but null" (`Some(None)`)
pub(crate) fn de_present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Same as `de_present` for lenient ids
pub(crate) fn de_present_id<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(de_opt_id(deserializer)?))
}
