//! # Connection Viewer CLI
//!
//! Queries a running capture engine and renders the connection table.
//!
//! Usage:
//!   connection_viewer list [--host H] [--protocol P] [--sort COL] [--page N]
//!   connection_viewer show <id>
//!   connection_viewer favorite <id>
//!   connection_viewer favorites
//!   connection_viewer block <id>
//!   connection_viewer unblock <rule-id>
//!   connection_viewer blocked
//!   connection_viewer clear
//!   connection_viewer last-cleared

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use conn_monitor::firewall::{BlockRequest, CommandBlocker};
use conn_monitor::poller::{HttpTelemetrySource, TelemetrySource};
use conn_monitor::registry::{page_window, PAGE_WINDOW};
use conn_monitor::store::SqliteStore;
use conn_monitor::{
    format_bytes, ConnectionId, ConnectionRecord, ConnectionRegistry, FilterSpec, MonitorConfig,
    SortColumn, SortDirection, SortSpec,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "connection_viewer")]
#[command(about = "Inspect live connections reported by the capture engine", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long, env = "CONN_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Telemetry port of the capture engine
    #[arg(short, long)]
    port: Option<u16>,

    /// Path of the SQLite store for favorites and the history marker
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show one page of the connection table
    List {
        /// Substring of source, destination or domain
        #[arg(long)]
        host: Option<String>,

        /// Only favorited connections
        #[arg(long)]
        favorites: bool,

        /// Exact country code
        #[arg(long)]
        country: Option<String>,

        /// Substring of the AS description
        #[arg(long)]
        asn: Option<String>,

        /// Protocol name, "http" for HTTP/HTTPS services
        #[arg(long)]
        protocol: Option<String>,

        /// Sort column: source, sport, destination, dport, protocol, service, bytes, packets
        #[arg(short, long, default_value = "bytes")]
        sort: String,

        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long)]
        page_size: Option<usize>,

        /// Print the page as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every field of one connection
    Show { id: String },

    /// Toggle the favorite flag of a connection
    Favorite { id: String },

    /// List favorited connection ids
    Favorites,

    /// Block the flow of a connection through the firewall command
    Block { id: String },

    /// Remove a firewall rule
    Unblock { rule_id: String },

    /// List installed firewall rules
    Blocked,

    /// Record a history clear for the running monitor's status line
    Clear,

    /// Show when history was last cleared
    LastCleared,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    config.apply_env()?;
    if let Some(port) = cli.port {
        config.engine.port = port;
    }
    if let Some(db) = cli.db {
        config.store.path = db;
    }

    let store = Arc::new(
        SqliteStore::open(&config.store.path)
            .with_context(|| format!("opening store {}", config.store.path.display()))?,
    );
    let registry = ConnectionRegistry::new(store)?;

    match cli.command {
        Commands::List {
            host,
            favorites,
            country,
            asn,
            protocol,
            sort,
            asc,
            page,
            page_size,
            json,
        } => {
            load_snapshot(&config, &registry).await?;

            let column: SortColumn = sort.parse().map_err(anyhow::Error::msg)?;
            let direction = if asc {
                SortDirection::Asc
            } else {
                SortDirection::Desc
            };
            registry.apply_sort(SortSpec::new(column, direction));
            registry.apply_filter(FilterSpec {
                host_substring: host,
                favorites_only: favorites,
                country,
                asn_substring: asn,
                protocol_class: protocol,
            });

            let page = registry.page(page, page_size.unwrap_or(config.page_size));

            if json {
                println!("{}", serde_json::to_string_pretty(&page)?);
                return Ok(());
            }

            for record in &page.records {
                print_row(record, registry.is_favorite(&record.id));
            }
            if page.is_empty() {
                println!("No connections on page {}", page.number);
            } else {
                println!(
                    "\nShowing {}-{} of {} connections",
                    page.start, page.end, page.total
                );
            }
            let window: Vec<String> = page_window(page.number, page.total_pages, PAGE_WINDOW)
                .into_iter()
                .map(|n| if n == page.number { format!("[{}]", n) } else { n.to_string() })
                .collect();
            if !window.is_empty() {
                println!("Pages: {} (of {})", window.join(" "), page.total_pages);
            }
        }

        Commands::Show { id } => {
            load_snapshot(&config, &registry).await?;
            let id = parse_id(&id);
            match registry.record(&id) {
                Some(record) => print_detail(&record, registry.is_favorite(&id)),
                None => bail!("connection {} not found", id),
            }
        }

        Commands::Favorite { id } => {
            let id = parse_id(&id);
            if registry.toggle_favorite(&id)? {
                println!("★ {} added to favorites", id);
            } else {
                println!("☆ {} removed from favorites", id);
            }
        }

        Commands::Favorites => {
            let mut ids: Vec<ConnectionId> = registry.favorites().snapshot().into_iter().collect();
            ids.sort();
            if ids.is_empty() {
                println!("No favorites");
            }
            for id in ids {
                println!("★ {}", id);
            }
        }

        Commands::Block { id } => {
            load_snapshot(&config, &registry).await?;
            let id = parse_id(&id);
            let Some(record) = registry.record(&id) else {
                bail!("connection {} not found", id);
            };
            let blocker = CommandBlocker::new(config.firewall.clone());
            let result = blocker.block(&BlockRequest::from_record(&record)).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Unblock { rule_id } => {
            let blocker = CommandBlocker::new(config.firewall.clone());
            let result = blocker.unblock(&rule_id).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Blocked => {
            let blocker = CommandBlocker::new(config.firewall.clone());
            let rules = blocker.list().await.map_err(anyhow::Error::msg)?;
            if rules.is_empty() {
                println!("No blocked connections");
            }
            for rule in rules {
                println!(
                    "🚫 {} | {} {}:{} -> {}:{} | {}",
                    rule.id,
                    rule.protocol,
                    rule.source_ip,
                    rule.source_port,
                    rule.dest_ip,
                    rule.dest_port,
                    rule.created_at
                );
            }
        }

        Commands::Clear => {
            // The live connection set belongs to the daemon and the engine;
            // only the shared marker can be written from here.
            let at = registry.mark_cleared()?;
            println!("History marked cleared at {}", at.to_rfc3339());
        }

        Commands::LastCleared => match registry.last_cleared() {
            Some(at) => println!("Last cleared: {}", at.to_rfc3339()),
            None => println!("History has never been cleared"),
        },
    }

    Ok(())
}

async fn load_snapshot(
    config: &MonitorConfig,
    registry: &ConnectionRegistry,
) -> anyhow::Result<()> {
    let url = config.engine.telemetry_url();
    let source = HttpTelemetrySource::new(&url, config.poller.request_timeout)?;
    let payload = source
        .fetch()
        .await
        .with_context(|| format!("fetching {}", url))?;
    registry.ingest(payload.connections);
    Ok(())
}

fn parse_id(raw: &str) -> ConnectionId {
    match raw.parse() {
        Ok(id) => id,
        Err(never) => match never {},
    }
}

fn print_row(record: &ConnectionRecord, favorite: bool) {
    println!(
        "{} {:<22} {:<40} {:<5} {:<8} {:>10} {:>8}",
        if favorite { "★" } else { " " },
        format!("{}:{}", record.src_addr, record.src_port),
        format!(
            "{}:{}{}",
            record.dst_addr,
            record.dst_port,
            record
                .domain
                .as_deref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        ),
        record.protocol,
        record.service,
        format_bytes(record.bytes),
        record.packets
    );
}

fn print_detail(record: &ConnectionRecord, favorite: bool) {
    println!("═══════════════════════════════════════════════════════════");
    println!("Connection {}{}", record.id, if favorite { " ★" } else { "" });
    println!("═══════════════════════════════════════════════════════════\n");

    println!("Source:      {}:{}", record.src_addr, record.src_port);
    println!("Destination: {}:{}", record.dst_addr, record.dst_port);
    println!("Protocol:    {}", record.protocol);
    println!("Service:     {}", record.service);
    println!("Domain:      {}", record.domain.as_deref().unwrap_or("-"));
    println!("Country:     {}", record.country.as_deref().unwrap_or("-"));
    println!("ASN:         {}", record.asn.as_deref().unwrap_or("-"));
    println!("Traffic:     {} in {} packets", format_bytes(record.bytes), record.packets);
    println!("First seen:  {}", record.first_seen.to_rfc3339());
    println!("Last seen:   {}", record.last_seen.to_rfc3339());
    println!("Status:      {}", if record.active { "active" } else { "inactive" });
}
