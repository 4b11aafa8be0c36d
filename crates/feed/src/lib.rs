//! Parla feed: grows a remotely-paginated chat list one page at a time.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Instant;

use parla_core::{ChatItem, ChatListRequest, ChatPage, DEFAULT_PER_PAGE};
use parla_gateway::{DeskGateway, GatewayError};
use rustc_hash::FxHashSet;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Filter set one feed serves. A feed must not be reused across filters;
/// build a new one per query context.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub per_page: u32,
    pub platform: Option<String>,
    pub client_name: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { per_page: DEFAULT_PER_PAGE, platform: None, client_name: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page landed; `total` is the accumulated item count.
    Loaded { appended: usize, total: usize },
    /// Another load or refresh holds the I/O gate; nothing was fetched.
    InFlight,
    /// The server already reported the end; nothing was fetched.
    Exhausted,
}

/// Render view of the accumulated feed.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub items: Vec<ChatItem>,
    pub has_next_page: bool,
    /// Page a `load_next` would fetch; `None` once exhausted.
    pub next_page: Option<u32>,
    /// Server-reported total; `None` until the first page landed.
    pub total: Option<u64>,
    pub pages_loaded: u32,
    pub last_error: Option<String>,
}

struct FeedState {
    items: Vec<ChatItem>,
    seen: FxHashSet<String>,
    has_next_page: bool,
    next_page: u32,
    total: Option<u64>,
    pages_loaded: u32,
    last_error: Option<String>,
}

impl FeedState {
    /// A fresh feed assumes a first page exists until the server says
    /// otherwise.
    fn fresh() -> Self {
        Self {
            items: Vec::new(),
            seen: FxHashSet::default(),
            has_next_page: true,
            next_page: 1,
            total: None,
            pages_loaded: 0,
            last_error: None,
        }
    }

    /// Appends in arrival order, skipping ids already accumulated.
    fn absorb(&mut self, page: ChatPage, fetched: u32) -> usize {
        let mut appended = 0usize;
        for item in page.items {
            if self.seen.insert(item.id.clone()) {
                self.items.push(item);
                appended += 1;
            }
        }
        self.has_next_page = page.meta.has_next_page;
        self.next_page = page.meta.next_page.unwrap_or(fetched + 1);
        self.total = Some(page.meta.total);
        self.pages_loaded += 1;
        self.last_error = None;
        appended
    }
}

/// Incrementally loaded chat list over a `DeskGateway`.
///
/// `Arc`-share one feed between the tasks of a single query context; the
/// I/O gate collapses whatever concurrent loading they attempt.
pub struct ChatFeed {
    gateway: Arc<dyn DeskGateway>,
    cfg: FeedConfig,
    state: Mutex<FeedState>,
    io_gate: tokio::sync::Mutex<()>,
}

impl ChatFeed {
    pub fn new(gateway: Arc<dyn DeskGateway>, cfg: FeedConfig) -> Self {
        Self {
            gateway,
            cfg,
            state: Mutex::new(FeedState::fresh()),
            io_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn request(&self, page: u32) -> ChatListRequest {
        ChatListRequest {
            page,
            per_page: self.cfg.per_page.max(1),
            platform: self.cfg.platform.clone(),
            client_name: self.cfg.client_name.clone(),
        }
    }

    /// Fetches the next page and appends it. Overlapping calls collapse:
    /// whoever finds the gate busy returns `InFlight` without touching the
    /// network. On error the accumulated state is left as it was, so calling
    /// again retries the same page.
    pub async fn load_next(&self) -> Result<LoadOutcome, FeedError> {
        let Ok(_io) = self.io_gate.try_lock() else {
            return Ok(LoadOutcome::InFlight);
        };
        let page = {
            let s = self.state.lock().unwrap();
            if !s.has_next_page {
                return Ok(LoadOutcome::Exhausted);
            }
            s.next_page
        };

        let t0 = Instant::now();
        match self.gateway.chat_page(&self.request(page)).await {
            Ok(fetched) => {
                let mut s = self.state.lock().unwrap();
                let appended = s.absorb(fetched, page);
                metrics::counter!("feed_pages_total", 1u64);
                metrics::counter!("feed_items_total", appended as u64);
                metrics::histogram!("feed_page_ms", t0.elapsed().as_secs_f64() * 1_000.0);
                info!(
                    page,
                    appended,
                    total = s.items.len(),
                    has_next = s.has_next_page,
                    took_ms = %t0.elapsed().as_millis(),
                    "feed: page ok"
                );
                Ok(LoadOutcome::Loaded { appended, total: s.items.len() })
            }
            Err(e) => {
                metrics::counter!("feed_fetch_errors_total", 1u64);
                warn!(page, error = %e, "feed: page fetch failed");
                self.state.lock().unwrap().last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Refetches page 1 and, only on success, replaces the accumulated
    /// state. Serializes against any in-flight load through the same gate.
    /// This is the one transition that can take `has_next_page` back to
    /// `true` after exhaustion.
    pub async fn refresh(&self) -> Result<usize, FeedError> {
        let _io = self.io_gate.lock().await;
        let t0 = Instant::now();
        match self.gateway.chat_page(&self.request(1)).await {
            Ok(fetched) => {
                let mut s = self.state.lock().unwrap();
                *s = FeedState::fresh();
                let appended = s.absorb(fetched, 1);
                metrics::counter!("feed_pages_total", 1u64);
                metrics::histogram!("feed_page_ms", t0.elapsed().as_secs_f64() * 1_000.0);
                info!(
                    items = appended,
                    has_next = s.has_next_page,
                    took_ms = %t0.elapsed().as_millis(),
                    "feed: refreshed"
                );
                Ok(appended)
            }
            Err(e) => {
                metrics::counter!("feed_fetch_errors_total", 1u64);
                warn!(error = %e, "feed: refresh failed; keeping stale pages");
                self.state.lock().unwrap().last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let s = self.state.lock().unwrap();
        FeedSnapshot {
            items: s.items.clone(),
            has_next_page: s.has_next_page,
            next_page: s.has_next_page.then_some(s.next_page),
            total: s.total,
            pages_loaded: s.pages_loaded,
            last_error: s.last_error.clone(),
        }
    }
}
