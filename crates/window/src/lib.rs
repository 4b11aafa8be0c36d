//! Parla window: incremental search over a swappable source.
//!
//! `SearchController` binds a live query string and a [`WindowSource`] to one
//! [`SearchWindow`] presentation code renders and extends. Every fetch is
//! tagged with a generation counter; query changes and resets bump it, so a
//! late page from a superseded query is dropped instead of appended.

#![forbid(unsafe_code)]

mod sources;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use parla_core::{DirectoryRecord, DEFAULT_PER_PAGE};
use parla_feed::FeedError;
use parla_gateway::GatewayError;
use tracing::debug;

pub use sources::{ChatSource, RosterSource};

/// Errors crossing the window boundary.
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    /// The chat feed behind the window failed to load a page.
    #[error(transparent)]
    Feed(#[from] FeedError),
    /// A direct backend fetch behind a custom source failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub type WindowResult<T> = Result<T, WindowError>;

/// One source page as the controller sees it, whatever produced it.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub records: Vec<DirectoryRecord>,
    /// Matches behind the whole query, not just this page.
    pub total_count: u64,
    pub has_more: bool,
    pub is_default_list: bool,
}

/// Where window pages come from: a roster search, a chat feed, or whatever
/// the embedding application plugs in.
#[async_trait::async_trait]
pub trait WindowSource: Send + Sync {
    async fn fetch(&self, query: &str, offset: usize, limit: usize) -> WindowResult<SourcePage>;
}

/// What one controller call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Fresh records landed; `total` is the source-reported match count.
    Loaded { appended: usize, total: u64 },
    /// A previous `load_more` is still pending; nothing was fetched.
    InFlight,
    /// Nothing left to load, or the controller is not initialized.
    Exhausted,
    /// The completion belonged to a superseded query and was dropped.
    Stale,
    /// The call changed nothing (same query, or already initialized).
    Unchanged,
}

/// The currently loaded slice of results for one active query.
#[derive(Debug, Clone)]
pub struct SearchWindow {
    pub query: String,
    pub records: Vec<DirectoryRecord>,
    /// Offset the next `load_more` fetches at; tracks `records.len()`.
    pub offset: usize,
    pub has_more: bool,
    pub total_count: u64,
    pub is_default_list: bool,
    pub loading: bool,
    pub last_error: Option<String>,
    pub initialized: bool,
}

impl SearchWindow {
    /// Pre-`initialize` value: nothing loaded, everything still loadable.
    pub fn fresh() -> Self {
        Self {
            query: String::new(),
            records: Vec::new(),
            offset: 0,
            has_more: true,
            total_count: 0,
            is_default_list: false,
            loading: false,
            last_error: None,
            initialized: false,
        }
    }

    /// Window for a query whose first page is being fetched right now.
    fn opened(query: &str) -> Self {
        Self { query: query.to_string(), loading: true, initialized: true, ..Self::fresh() }
    }
}

impl Default for SearchWindow {
    fn default() -> Self {
        Self::fresh()
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Records per `load_more` page.
    pub page_size: usize,
    /// Minimum `load_more` latency, for UI smoothing. Off by default.
    pub smoothing: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { page_size: DEFAULT_PER_PAGE as usize, smoothing: None }
    }
}

struct ControllerState {
    window: SearchWindow,
    generation: u64,
}

/// Binds a changing query to an append-only result window.
///
/// All operations take `&self`; share the controller behind an `Arc`. A query
/// change never aborts the request already on the wire; the generation tag
/// invalidates its completion and the page is thrown away on arrival.
pub struct SearchController {
    source: Arc<dyn WindowSource>,
    cfg: ControllerConfig,
    state: Mutex<ControllerState>,
    // Serializes load_more; a failed try_lock is the InFlight outcome.
    io_gate: tokio::sync::Mutex<()>,
}

impl SearchController {
    pub fn new(source: Arc<dyn WindowSource>, cfg: ControllerConfig) -> Self {
        Self {
            source,
            cfg,
            state: Mutex::new(ControllerState { window: SearchWindow::fresh(), generation: 0 }),
            io_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Computes the first window for `query` at offset zero. A second call
    /// before a query change is a no-op; `set_query` and `reset` move on.
    pub async fn initialize(&self, query: &str) -> WindowResult<LoadOutcome> {
        let query = query.trim().to_string();
        let generation = {
            let mut s = self.state.lock().unwrap();
            if s.window.initialized {
                return Ok(LoadOutcome::Unchanged);
            }
            s.window = SearchWindow::opened(&query);
            s.generation
        };
        self.recompute(&query, generation).await
    }

    /// Swaps the window for the new trimmed query and recomputes from offset
    /// zero. String-equal queries are a no-op. Called before `initialize`,
    /// it initializes.
    pub async fn set_query(&self, new_query: &str) -> WindowResult<LoadOutcome> {
        let query = new_query.trim().to_string();
        let generation = {
            let mut s = self.state.lock().unwrap();
            if s.window.initialized && s.window.query == query {
                return Ok(LoadOutcome::Unchanged);
            }
            s.generation += 1;
            s.window = SearchWindow::opened(&query);
            s.generation
        };
        debug!(query = %query, generation, "window: query changed");
        self.recompute(&query, generation).await
    }

    /// Extends the window by one page fetched at `offset = records.len()`.
    ///
    /// Overlapping calls collapse: while one is pending the others come back
    /// `InFlight` without touching the source.
    pub async fn load_more(&self) -> WindowResult<LoadOutcome> {
        let Ok(_io) = self.io_gate.try_lock() else {
            return Ok(LoadOutcome::InFlight);
        };
        let (query, offset, generation) = {
            let mut s = self.state.lock().unwrap();
            if !s.window.initialized || !s.window.has_more {
                return Ok(LoadOutcome::Exhausted);
            }
            s.window.loading = true;
            (s.window.query.clone(), s.window.records.len(), s.generation)
        };
        let t0 = Instant::now();
        let fetched = self.source.fetch(&query, offset, self.cfg.page_size).await;
        histogram!("window_fetch_ms", t0.elapsed().as_secs_f64() * 1_000.0);
        if let Some(min) = self.cfg.smoothing {
            let elapsed = t0.elapsed();
            if elapsed < min {
                tokio::time::sleep(min - elapsed).await;
            }
        }
        self.apply(generation, offset, fetched)
    }

    /// Back to the pre-`initialize` state; in-flight completions are
    /// invalidated. Idempotent.
    pub fn reset(&self) {
        let mut s = self.state.lock().unwrap();
        s.generation += 1;
        s.window = SearchWindow::fresh();
        debug!(generation = s.generation, "window: reset");
    }

    /// Clone of the current window, for rendering.
    pub fn window(&self) -> SearchWindow {
        self.state.lock().unwrap().window.clone()
    }

    async fn recompute(&self, query: &str, generation: u64) -> WindowResult<LoadOutcome> {
        let t0 = Instant::now();
        let fetched = self.source.fetch(query, 0, self.cfg.page_size).await;
        histogram!("window_fetch_ms", t0.elapsed().as_secs_f64() * 1_000.0);
        self.apply(generation, 0, fetched)
    }

    /// A completion lands only while its generation is still current.
    fn apply(
        &self,
        generation: u64,
        offset: usize,
        fetched: WindowResult<SourcePage>,
    ) -> WindowResult<LoadOutcome> {
        let mut s = self.state.lock().unwrap();
        if s.generation != generation {
            counter!("window_stale_total", 1u64);
            debug!(tagged = generation, current = s.generation, "window: stale completion dropped");
            return Ok(LoadOutcome::Stale);
        }
        s.window.loading = false;
        match fetched {
            Ok(page) => {
                let appended = page.records.len();
                if offset == 0 {
                    s.window.records = page.records;
                } else {
                    s.window.records.extend(page.records);
                }
                s.window.offset = s.window.records.len();
                s.window.has_more = page.has_more;
                s.window.total_count = page.total_count;
                s.window.is_default_list = page.is_default_list;
                s.window.last_error = None;
                Ok(LoadOutcome::Loaded { appended, total: page.total_count })
            }
            Err(e) => {
                counter!("window_fetch_errors_total", 1u64);
                s.window.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
