//! Parla core types

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

/// Chat pages requested from the desk backend default to this size.
pub const DEFAULT_PER_PAGE: u32 = 10;

/// One searchable entry of a directory: a CRM client, or a chat seen
/// through its directory view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub id: String,
    pub display_name: String,
    /// Extra strings the matcher may hit: raw id, phone digits, formatted
    /// phone, messaging address. Never empty (see [`DirectoryRecord::new`]).
    pub match_tokens: SmallVec<[String; 4]>,
    /// Whether a live messaging channel is attached. Live records rank first.
    pub channel_live: bool,
}

impl DirectoryRecord {
    /// Builds a record whose only match token is the display name. Use
    /// [`with_tokens`](Self::with_tokens) to attach the real token set.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let match_tokens = smallvec![display_name.clone()];
        Self { id: id.into(), display_name, match_tokens, channel_live: false }
    }

    /// Replaces the match tokens. Blank tokens are dropped; if nothing
    /// usable remains the display-name fallback stays in place.
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kept: SmallVec<[String; 4]> = tokens
            .into_iter()
            .map(Into::into)
            .filter(|t| !t.trim().is_empty())
            .collect();
        if !kept.is_empty() {
            self.match_tokens = kept;
        }
        self
    }

    pub fn with_channel_live(mut self, live: bool) -> Self {
        self.channel_live = live;
        self
    }
}

/// Immutable published view of the client directory. Always handed around
/// as `Arc<RosterSnapshot>`; `version` increments on each refresh.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RosterSnapshot {
    pub version: u64,
    pub records: Vec<DirectoryRecord>,
}

/// Cheap identity key over a record slice: length plus the endpoint ids.
/// Interior edits that keep both are invisible, which is acceptable because
/// published collections are swapped whole, never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    count: usize,
    first_id: Option<String>,
    last_id: Option<String>,
}

impl Fingerprint {
    pub fn of(records: &[DirectoryRecord]) -> Self {
        Self {
            count: records.len(),
            first_id: records.first().map(|r| r.id.clone()),
            last_id: records.last().map(|r| r.id.clone()),
        }
    }

    /// Compares against a slice without building a new fingerprint.
    pub fn matches(&self, records: &[DirectoryRecord]) -> bool {
        self.count == records.len()
            && self.first_id.as_deref() == records.first().map(|r| r.id.as_str())
            && self.last_id.as_deref() == records.last().map(|r| r.id.as_str())
    }
}

/// One chat as listed by the desk backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatItem {
    pub id: String,
    pub title: String,
    pub platform: String,
    pub client_name: String,
    /// Last activity as epoch seconds; 0 when the server sent none.
    pub updated_ts: i64,
}

impl ChatItem {
    /// Directory view of the chat, for the shared matcher.
    pub fn record(&self) -> DirectoryRecord {
        DirectoryRecord::new(self.id.clone(), self.title.clone())
            .with_tokens([
                self.client_name.clone(),
                self.platform.clone(),
                self.id.clone(),
            ])
            .with_channel_live(true)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PageMeta {
    pub has_next_page: bool,
    pub next_page: Option<u32>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatPage {
    pub items: Vec<ChatItem>,
    pub meta: PageMeta,
}

/// Query half of `GET /chats`. Pages are 1-based on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatListRequest {
    pub page: u32,
    pub per_page: u32,
    pub platform: Option<String>,
    pub client_name: Option<String>,
}

impl ChatListRequest {
    pub fn first_page(per_page: u32) -> Self {
        Self { page: 1, per_page, platform: None, client_name: None }
    }
}

impl Default for ChatListRequest {
    fn default() -> Self {
        Self::first_page(DEFAULT_PER_PAGE)
    }
}

pub mod prelude {
    pub use super::{
        ChatItem, ChatListRequest, ChatPage, DirectoryRecord, Fingerprint, PageMeta,
        RosterSnapshot,
    };
}
