//! Window sources: the roster search and the chat feed behind one trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use parla_core::{ChatItem, DirectoryRecord, DEFAULT_PER_PAGE};
use parla_feed::{ChatFeed, FeedConfig, LoadOutcome as FeedOutcome};
use parla_gateway::DeskGateway;
use parla_roster::RosterHandle;
use parla_search::{MatchIndex, SearchOptions};

use crate::{SourcePage, WindowResult, WindowSource};

/// Client search over the current roster snapshot. The whole collection is
/// local, so pages are sliced out of one `MatchIndex` search; an empty or
/// not-yet-loaded roster yields zero results, never an error.
pub struct RosterSource {
    roster: RosterHandle,
    index: Arc<MatchIndex>,
    exclude_id: Option<String>,
}

impl RosterSource {
    pub fn new(roster: RosterHandle, index: Arc<MatchIndex>) -> Self {
        Self { roster, index, exclude_id: None }
    }

    /// Drops one record from every page ("everyone but me" pickers).
    pub fn with_exclude(mut self, id: impl Into<String>) -> Self {
        self.exclude_id = Some(id.into());
        self
    }
}

#[async_trait::async_trait]
impl WindowSource for RosterSource {
    async fn fetch(&self, query: &str, offset: usize, limit: usize) -> WindowResult<SourcePage> {
        let snap = self.roster.current();
        let opts = SearchOptions {
            exclude_id: self.exclude_id.clone(),
            offset,
            limit: Some(limit),
            ..SearchOptions::default()
        };
        let out = self.index.search(&snap.records, query, &opts);
        Ok(SourcePage {
            records: out.records,
            total_count: out.total_count as u64,
            has_more: out.has_more,
            is_default_list: out.is_default_list,
        })
    }
}

/// Chat search over the server-paginated inbox. The query maps to the
/// backend's `clientName` filter, so each query value gets its own
/// [`ChatFeed`]; feeds stick around and a revisited query serves from what
/// it already accumulated.
pub struct ChatSource {
    gateway: Arc<dyn DeskGateway>,
    per_page: u32,
    platform: Option<String>,
    feeds: Mutex<HashMap<String, Arc<ChatFeed>>>,
}

impl ChatSource {
    pub fn new(gateway: Arc<dyn DeskGateway>) -> Self {
        Self {
            gateway,
            per_page: DEFAULT_PER_PAGE,
            platform: None,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Server page size for the feeds behind this source.
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    /// Restricts every feed to one platform.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    fn feed_for(&self, query: &str) -> Arc<ChatFeed> {
        let mut feeds = self.feeds.lock().unwrap();
        feeds
            .entry(query.to_string())
            .or_insert_with(|| {
                let cfg = FeedConfig {
                    per_page: self.per_page,
                    platform: self.platform.clone(),
                    client_name: (!query.is_empty()).then(|| query.to_string()),
                };
                Arc::new(ChatFeed::new(self.gateway.clone(), cfg))
            })
            .clone()
    }
}

#[async_trait::async_trait]
impl WindowSource for ChatSource {
    async fn fetch(&self, query: &str, offset: usize, limit: usize) -> WindowResult<SourcePage> {
        let feed = self.feed_for(query);
        let need = offset.saturating_add(limit);
        loop {
            let snap = feed.snapshot();
            if snap.items.len() >= need || !snap.has_next_page {
                break;
            }
            match feed.load_next().await? {
                FeedOutcome::Loaded { .. } => {}
                // Another task is filling this feed; serve what accumulated.
                FeedOutcome::InFlight => break,
                FeedOutcome::Exhausted => break,
            }
        }

        let snap = feed.snapshot();
        let records: Vec<DirectoryRecord> =
            snap.items.iter().skip(offset).take(limit).map(ChatItem::record).collect();
        let has_more = snap.has_next_page || snap.items.len() > offset + records.len();
        Ok(SourcePage {
            total_count: snap.total.unwrap_or(snap.items.len() as u64),
            records,
            has_more,
            is_default_list: query.is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parla_core::{ChatPage, PageMeta, RosterSnapshot};
    use parla_gateway::ScriptedGateway;

    fn roster_of(names: &[&str]) -> RosterHandle {
        let records = names
            .iter()
            .enumerate()
            .map(|(i, n)| DirectoryRecord::new(format!("u-{i}"), *n))
            .collect();
        RosterHandle::fixed(RosterSnapshot { version: 1, records })
    }

    fn chats(range: std::ops::Range<usize>) -> Vec<ChatItem> {
        range
            .map(|i| ChatItem {
                id: format!("c-{i}"),
                title: format!("Chat {i}"),
                platform: "whatsapp".into(),
                client_name: "Ana".into(),
                updated_ts: 0,
            })
            .collect()
    }

    fn page(range: std::ops::Range<usize>, next: Option<u32>, total: u64) -> ChatPage {
        ChatPage {
            items: chats(range),
            meta: PageMeta { has_next_page: next.is_some(), next_page: next, total },
        }
    }

    #[tokio::test]
    async fn roster_source_slices_match_pages() {
        let names: Vec<String> = (0..25).map(|i| format!("cliente {i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let src = RosterSource::new(roster_of(&refs), Arc::new(MatchIndex::new()));

        let first = src.fetch("", 0, 10).await.unwrap();
        assert_eq!(first.records.len(), 10);
        assert_eq!(first.total_count, 25);
        assert!(first.has_more);
        assert!(first.is_default_list);

        let tail = src.fetch("cliente", 20, 10).await.unwrap();
        assert_eq!(tail.records.len(), 5);
        assert!(!tail.has_more);
        assert!(!tail.is_default_list);
    }

    #[tokio::test]
    async fn roster_source_respects_exclude() {
        let src = RosterSource::new(roster_of(&["Ana", "Beto", "Caio"]), Arc::new(MatchIndex::new()))
            .with_exclude("u-1");
        let out = src.fetch("", 0, 10).await.unwrap();
        assert_eq!(out.total_count, 2);
        assert!(out.records.iter().all(|r| r.id != "u-1"));
    }

    #[tokio::test]
    async fn empty_roster_means_zero_results() {
        let src = RosterSource::new(roster_of(&[]), Arc::new(MatchIndex::new()));
        let out = src.fetch("ana", 0, 10).await.unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.total_count, 0);
        assert!(!out.has_more);
    }

    #[tokio::test]
    async fn chat_source_drives_the_feed_until_covered() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.script_page(1, None, page(0..10, Some(2), 30));
        gw.script_page(2, None, page(10..20, Some(3), 30));
        gw.script_page(3, None, page(20..30, None, 30));
        let src = ChatSource::new(gw.clone());

        let out = src.fetch("", 20, 5).await.unwrap();
        assert_eq!(out.records.len(), 5);
        assert_eq!(out.records[0].id, "c-20");
        assert_eq!(out.total_count, 30);
        // Server is done, but items past the slice are still unread.
        assert!(out.has_more);
        assert!(out.is_default_list);
        assert_eq!(gw.chat_calls(), 3);

        // The tail of the accumulated feed needs no further calls.
        let tail = src.fetch("", 25, 5).await.unwrap();
        assert_eq!(tail.records.len(), 5);
        assert!(!tail.has_more);
        assert_eq!(gw.chat_calls(), 3);
    }

    #[tokio::test]
    async fn chat_source_keys_feeds_by_query() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.script_page(1, None, page(0..10, None, 10));
        gw.script_page(1, Some("ana"), page(0..2, None, 2));
        let src = ChatSource::new(gw.clone());

        let inbox = src.fetch("", 0, 10).await.unwrap();
        assert_eq!(inbox.records.len(), 10);
        assert!(inbox.is_default_list);

        let ana = src.fetch("ana", 0, 10).await.unwrap();
        assert_eq!(ana.records.len(), 2);
        assert!(!ana.is_default_list);
        assert_eq!(gw.page_calls(1, None), 1);
        assert_eq!(gw.page_calls(1, Some("ana")), 1);

        // Revisiting a query reuses its feed instead of refetching.
        let again = src.fetch("ana", 0, 10).await.unwrap();
        assert_eq!(again.records.len(), 2);
        assert_eq!(gw.page_calls(1, Some("ana")), 1);
    }

    #[tokio::test]
    async fn chat_source_short_collection_is_exhausted() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.script_page(1, None, page(0..3, None, 3));
        let src = ChatSource::new(gw);

        let out = src.fetch("", 0, 10).await.unwrap();
        assert_eq!(out.records.len(), 3);
        assert!(!out.has_more);

        let past = src.fetch("", 10, 5).await.unwrap();
        assert!(past.records.is_empty());
        assert!(!past.has_more);
    }
}
