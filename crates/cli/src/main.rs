use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use parla_feed::{ChatFeed, FeedConfig, LoadOutcome};
use parla_gateway::HttpGateway;
use parla_roster::load_roster;
use parla_search::{MatchIndex, SearchOptions, SearchOutcome};

#[derive(Parser, Debug)]
#[command(name = "parlactl", version, about = "Parla CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Desk backend base URL
    #[arg(long = "api-url", global = true, env = "PARLA_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Client directory
    Clients {
        #[command(subcommand)]
        command: ClientsCmd,
    },
    /// Chat inbox
    Chats {
        #[command(subcommand)]
        command: ChatsCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ClientsCmd {
    /// Ranked default listing
    Ls {
        #[arg(long = "limit", default_value_t = 25)]
        limit: usize,
    },
    /// Substring search over names, phones and messaging addresses
    Search {
        query: String,
        #[arg(long = "limit", default_value_t = 50)]
        limit: usize,
        #[arg(long = "offset", default_value_t = 0)]
        offset: usize,
        /// Drop one record id from the results
        #[arg(long = "exclude")]
        exclude: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ChatsCmd {
    /// Page through the chat inbox
    Ls {
        /// Platform filter, e.g. "whatsapp"
        #[arg(long = "platform")]
        platform: Option<String>,
        /// Server-side client name filter
        #[arg(long = "client")]
        client: Option<String>,
        #[arg(long = "per-page", default_value_t = parla_core::DEFAULT_PER_PAGE)]
        per_page: u32,
        /// Pages to fetch
        #[arg(long = "pages", default_value_t = 1, conflicts_with = "all")]
        pages: u32,
        /// Keep fetching until the server reports the end
        #[arg(long = "all", action = ArgAction::SetTrue)]
        all: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("PARLA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PARLA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid PARLA_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let api_url = cli
        .api_url
        .as_deref()
        .ok_or_else(|| anyhow!("desk base URL required; pass --api-url or set PARLA_API_URL"))?;
    let gateway = HttpGateway::new(api_url)?;

    match cli.command {
        Commands::Clients { command } => match command {
            ClientsCmd::Ls { limit } => {
                info!(limit, "clients ls invoked");
                let snap = load_roster(&gateway).await?;
                let opts = SearchOptions { limit: Some(limit), ..Default::default() };
                let out = MatchIndex::new().search(&snap.records, "", &opts);
                print_clients(&out, cli.output)?;
            }
            ClientsCmd::Search { query, limit, offset, exclude } => {
                info!(query = %query, limit, offset, "clients search invoked");
                let snap = load_roster(&gateway).await?;
                let opts = SearchOptions {
                    exclude_id: exclude,
                    offset,
                    limit: Some(limit),
                    ..Default::default()
                };
                let out = MatchIndex::new().search(&snap.records, &query, &opts);
                print_clients(&out, cli.output)?;
            }
        },
        Commands::Chats { command } => match command {
            ChatsCmd::Ls { platform, client, per_page, pages, all } => {
                info!(platform = ?platform, client = ?client, per_page, pages, all, "chats ls invoked");
                let cfg = FeedConfig { per_page, platform, client_name: client };
                let feed = ChatFeed::new(Arc::new(gateway), cfg);

                let mut fetched = 0u32;
                loop {
                    if !all && fetched >= pages {
                        break;
                    }
                    match feed.load_next().await {
                        Ok(LoadOutcome::Loaded { .. }) => fetched += 1,
                        Ok(LoadOutcome::Exhausted) | Ok(LoadOutcome::InFlight) => break,
                        Err(e) => {
                            if fetched == 0 {
                                return Err(e.into());
                            }
                            warn!(error = %e, "chats: page fetch failed; rendering loaded pages");
                            break;
                        }
                    }
                }

                let snap = feed.snapshot();
                match cli.output {
                    Output::Human => {
                        println!("{:<10} {:<18} {:<30} AGE", "PLATFORM", "CLIENT", "TITLE");
                        for item in &snap.items {
                            println!(
                                "{:<10} {:<18} {:<30} {}",
                                item.platform,
                                item.client_name,
                                item.title,
                                render_age(item.updated_ts)
                            );
                        }
                        let total = snap.total.unwrap_or(snap.items.len() as u64);
                        let more = if snap.has_next_page { " (more available)" } else { "" };
                        println!("{} of {}{}", snap.items.len(), total, more);
                    }
                    Output::Json => {
                        #[derive(serde::Serialize)]
                        struct ChatsOut<'a> {
                            items: &'a [parla_core::ChatItem],
                            has_next_page: bool,
                            total: Option<u64>,
                            pages_loaded: u32,
                        }
                        let out = ChatsOut {
                            items: &snap.items,
                            has_next_page: snap.has_next_page,
                            total: snap.total,
                            pages_loaded: snap.pages_loaded,
                        };
                        println!("{}", serde_json::to_string_pretty(&out)?);
                    }
                }
            }
        },
    }

    Ok(())
}

fn print_clients(out: &SearchOutcome, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<14} {:<26} LIVE", "ID", "NAME");
            for r in &out.records {
                let live = if r.channel_live { "yes" } else { "-" };
                println!("{:<14} {:<26} {}", r.id, r.display_name, live);
            }
            let more = if out.has_more { " (more available)" } else { "" };
            println!("{} of {}{}", out.records.len(), out.total_count, more);
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(out)?),
    }
    Ok(())
}

fn render_age(updated_ts: i64) -> String {
    if updated_ts <= 0 {
        return "-".to_string();
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let secs = (now - updated_ts).max(0) as u64;
    if secs >= 86_400 {
        format!("{}d", secs / 86_400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
