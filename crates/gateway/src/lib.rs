//! Parla gateway: desk backend REST client.
//!
//! This crate defines the `DeskGateway` trait the rest of the workspace
//! depends on, the reqwest-backed `HttpGateway`, and the programmable
//! `ScriptedGateway` double used by tests across the workspace.

#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use parla_core::{ChatItem, ChatListRequest, ChatPage, DirectoryRecord, PageMeta};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use url::Url;

/// Errors crossing the gateway boundary.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid base url {url:?}: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("desk returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("decoding {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Read surface of the desk backend used by roster, feed and window.
#[async_trait::async_trait]
pub trait DeskGateway: Send + Sync {
    /// Full client directory (`GET /clients`).
    async fn list_clients(&self) -> GatewayResult<Vec<DirectoryRecord>>;

    /// One page of the chat inbox (`GET /chats`).
    async fn chat_page(&self, req: &ChatListRequest) -> GatewayResult<ChatPage>;
}

// ----------------- Wire shapes -----------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientWire {
    id: String,
    name: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    whatsapp_jid: Option<String>,
    #[serde(default)]
    channel_live: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatItemWire {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    platform_name: String,
    #[serde(default)]
    client_name: String,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageMetaWire {
    #[serde(default)]
    has_next_page: bool,
    #[serde(default)]
    next_page: Option<u32>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ChatsWire {
    #[serde(default)]
    items: Vec<ChatItemWire>,
    #[serde(default)]
    meta: PageMetaWire,
}

fn phone_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn record_from(w: ClientWire) -> DirectoryRecord {
    let mut tokens: Vec<String> = vec![w.id.clone()];
    if let Some(phone) = &w.phone {
        let digits = phone_digits(phone);
        if !digits.is_empty() {
            tokens.push(digits);
        }
        tokens.push(phone.clone());
    }
    if let Some(jid) = &w.whatsapp_jid {
        tokens.push(jid.clone());
    }
    DirectoryRecord::new(w.id, w.name)
        .with_tokens(tokens)
        .with_channel_live(w.channel_live)
}

fn chat_from(w: ChatItemWire) -> ChatItem {
    let updated_ts = w
        .updated_at
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(0);
    ChatItem {
        id: w.id,
        title: w.title,
        platform: w.platform_name,
        client_name: w.client_name,
        updated_ts,
    }
}

fn page_from(w: ChatsWire) -> ChatPage {
    ChatPage {
        items: w.items.into_iter().map(chat_from).collect(),
        meta: PageMeta {
            has_next_page: w.meta.has_next_page,
            next_page: w.meta.next_page,
            total: w.meta.total,
        },
    }
}

// ----------------- HTTP implementation -----------------

/// `DeskGateway` over the real desk REST API.
pub struct HttpGateway {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    workspace: Option<String>,
}

impl HttpGateway {
    /// Builds a client for the given base URL. Auth token and workspace id
    /// are picked up from `PARLA_API_TOKEN` / `PARLA_WORKSPACE`.
    pub fn new(base_url: &str) -> GatewayResult<Self> {
        // Url::join drops the last path segment without a trailing slash.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base = Url::parse(&normalized).map_err(|e| GatewayError::BaseUrl {
            url: base_url.to_string(),
            source: e,
        })?;
        let timeout_secs: u64 = std::env::var("PARLA_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base,
            token: std::env::var("PARLA_API_TOKEN").ok(),
            workspace: std::env::var("PARLA_WORKSPACE").ok(),
        })
    }

    fn endpoint(&self, path: &str) -> GatewayResult<Url> {
        self.base.join(path).map_err(|e| GatewayError::BaseUrl {
            url: format!("{}{path}", self.base),
            source: e,
        })
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        context: &'static str,
    ) -> GatewayResult<T> {
        let mut req = req;
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(ws) = &self.workspace {
            req = req.header("X-Workspace-Id", ws);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            warn!(code = status.as_u16(), context, "gateway: request failed");
            return Err(GatewayError::Status {
                code: status.as_u16(),
                body: clip(&body),
            });
        }
        serde_json::from_str(&body).map_err(|e| GatewayError::Decode { context, source: e })
    }
}

/// Keeps error bodies loggable without dumping whole payloads.
fn clip(body: &str) -> String {
    const MAX_CHARS: usize = 512;
    match body.char_indices().nth(MAX_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[async_trait::async_trait]
impl DeskGateway for HttpGateway {
    async fn list_clients(&self) -> GatewayResult<Vec<DirectoryRecord>> {
        let t0 = Instant::now();
        let url = self.endpoint("clients")?;
        let wires: Vec<ClientWire> = self.send(self.http.get(url), "clients list").await?;
        let records: Vec<DirectoryRecord> = wires.into_iter().map(record_from).collect();
        info!(count = records.len(), took_ms = %t0.elapsed().as_millis(), "gateway: clients ok");
        Ok(records)
    }

    async fn chat_page(&self, req: &ChatListRequest) -> GatewayResult<ChatPage> {
        let t0 = Instant::now();
        let url = self.endpoint("chats")?;
        let mut http_req = self.http.get(url).query(&[
            ("pageNumber", req.page.to_string()),
            ("perPage", req.per_page.to_string()),
        ]);
        if let Some(platform) = req.platform.as_deref() {
            http_req = http_req.query(&[("platformName", platform)]);
        }
        if let Some(client) = req.client_name.as_deref() {
            http_req = http_req.query(&[("clientName", client)]);
        }
        let wire: ChatsWire = self.send(http_req, "chats page").await?;
        let page = page_from(wire);
        info!(
            page = req.page,
            items = page.items.len(),
            has_next = page.meta.has_next_page,
            took_ms = %t0.elapsed().as_millis(),
            "gateway: chats page ok"
        );
        Ok(page)
    }
}

// ----------------- Scripted implementation -----------------

type PageKey = (u32, Option<String>);

#[derive(Default)]
struct Script {
    clients: Vec<DirectoryRecord>,
    fail_clients: u32,
    client_calls: u64,
    pages: HashMap<PageKey, VecDeque<ChatPage>>,
    fail_pages: HashMap<PageKey, u32>,
    page_calls: HashMap<PageKey, u64>,
    chat_calls: u64,
}

/// Programmable in-memory gateway for tests. Pages are keyed by
/// `(page, clientName filter)`; unscripted pages answer like a 404.
/// [`script_page`](Self::script_page) replaces a page's responses,
/// [`queue_page`](Self::queue_page) appends a one-shot response ahead of
/// the sticky last one, so a key can serve different content per call.
///
/// Built with [`ScriptedGateway::gated`], every response parks on a
/// zero-permit semaphore until the test adds permits (one per response)
/// or closes it, which lets tests interleave completions deterministically
/// instead of sleeping.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let gw = Self {
            script: Mutex::new(Script::default()),
            gate: Some(gate.clone()),
        };
        (gw, gate)
    }

    pub fn script_clients(&self, records: Vec<DirectoryRecord>) {
        self.script.lock().unwrap().clients = records;
    }

    /// The next `n` `list_clients` calls fail with a scripted 500.
    pub fn fail_next_clients(&self, n: u32) {
        self.script.lock().unwrap().fail_clients = n;
    }

    pub fn script_page(&self, page: u32, client: Option<&str>, chats: ChatPage) {
        self.script
            .lock()
            .unwrap()
            .pages
            .insert((page, client.map(str::to_string)), VecDeque::from([chats]));
    }

    /// Appends a response for `(page, client)`. Queued responses are served
    /// once each, in order; the final one keeps answering.
    pub fn queue_page(&self, page: u32, client: Option<&str>, chats: ChatPage) {
        self.script
            .lock()
            .unwrap()
            .pages
            .entry((page, client.map(str::to_string)))
            .or_default()
            .push_back(chats);
    }

    /// The next `n` fetches of `(page, client)` fail with a scripted 500.
    pub fn fail_next_page(&self, page: u32, client: Option<&str>, n: u32) {
        self.script
            .lock()
            .unwrap()
            .fail_pages
            .insert((page, client.map(str::to_string)), n);
    }

    pub fn client_calls(&self) -> u64 {
        self.script.lock().unwrap().client_calls
    }

    pub fn chat_calls(&self) -> u64 {
        self.script.lock().unwrap().chat_calls
    }

    pub fn page_calls(&self, page: u32, client: Option<&str>) -> u64 {
        self.script
            .lock()
            .unwrap()
            .page_calls
            .get(&(page, client.map(str::to_string)))
            .copied()
            .unwrap_or(0)
    }

    async fn park(&self) {
        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                // Consume the permit so each release serves one response.
                Ok(permit) => permit.forget(),
                // Closed gate lets everything through.
                Err(_) => {}
            }
        }
    }
}

#[async_trait::async_trait]
impl DeskGateway for ScriptedGateway {
    async fn list_clients(&self) -> GatewayResult<Vec<DirectoryRecord>> {
        let scripted = {
            let mut s = self.script.lock().unwrap();
            s.client_calls += 1;
            if s.fail_clients > 0 {
                s.fail_clients -= 1;
                Err(GatewayError::Status {
                    code: 500,
                    body: "scripted failure".into(),
                })
            } else {
                Ok(s.clients.clone())
            }
        };
        self.park().await;
        scripted
    }

    async fn chat_page(&self, req: &ChatListRequest) -> GatewayResult<ChatPage> {
        let key: PageKey = (req.page, req.client_name.clone());
        let scripted = {
            let mut s = self.script.lock().unwrap();
            s.chat_calls += 1;
            *s.page_calls.entry(key.clone()).or_insert(0) += 1;
            match s.fail_pages.get_mut(&key) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(GatewayError::Status {
                        code: 500,
                        body: "scripted failure".into(),
                    })
                }
                _ => {
                    let page = s.pages.get_mut(&key).and_then(|q| {
                        if q.len() > 1 {
                            q.pop_front()
                        } else {
                            q.front().cloned()
                        }
                    });
                    match page {
                        Some(page) => Ok(page),
                        None => Err(GatewayError::Status {
                            code: 404,
                            body: format!("no scripted chats page {:?}", key),
                        }),
                    }
                }
            }
        };
        self.park().await;
        scripted
    }
}
