use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kbrowse_api::{HttpApi, ListApi};
use kbrowse_core::{BrowseConfig, ListPage, ListQuery, Pagination, Row};
use kbrowse_search::{SearchOrchestrator, SearchPhase};
use kbrowse_store::SharedCache;
use tracing::{error, info};

mod browse;

#[derive(Parser, Debug)]
#[command(name = "kbrowsectl", version, about = "Browse and search dashboard resource tables")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Dashboard API base URL
    #[arg(long = "base-url", env = "KBROWSE_BASE_URL", global = true, default_value = "http://localhost:8080")]
    base_url: String,

    /// Bearer token sent with every request
    #[arg(long = "token", env = "KBROWSE_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Namespace filter (default: all namespaces)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one page of a resource table
    Ls {
        /// List endpoint, e.g. "/api/pods"
        endpoint: String,
        #[arg(long = "page", default_value_t = 1)]
        page: u32,
        /// Rows per page (default: KBROWSE_PAGE_SIZE or 20)
        #[arg(long = "page-size")]
        page_size: Option<u32>,
    },
    /// Run one search against a resource table (debounce skipped, retries applied)
    Search {
        endpoint: String,
        term: String,
        /// Maximum rows requested (default: KBROWSE_SEARCH_LIMIT or 1000)
        #[arg(long = "limit")]
        limit: Option<u32>,
    },
    /// Interactive table: lines are search input, `:help` lists commands
    Browse {
        endpoint: String,
        /// Table is cluster-scoped; namespace changes are ignored
        #[arg(long = "cluster", action = ArgAction::SetTrue)]
        cluster: bool,
    },
    /// Print the effective configuration
    Config,
}

fn init_tracing() {
    let env = std::env::var("KBROWSE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KBROWSE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KBROWSE_METRICS_ADDR; expected host:port");
        }
    }
}

/// Display label for a row: `name`, then `metadata.name`, then compact JSON.
pub(crate) fn row_label(row: &Row) -> String {
    row.get("name")
        .or_else(|| row.get("metadata").and_then(|m| m.get("name")))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| row.to_string())
}

fn print_page(output: Output, page: &ListPage, empty_text: &str) -> Result<()> {
    match output {
        Output::Human => {
            if page.rows.is_empty() {
                println!("{}", empty_text);
            }
            for row in &page.rows {
                println!("{}", row_label(row));
            }
            println!("total: {}", page.total);
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(page)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = BrowseConfig::from_env();
    let ns = cli.namespace.as_deref();

    match cli.command {
        Commands::Ls { endpoint, page, page_size } => {
            let api = HttpApi::new(&cli.base_url, cli.token.clone(), cfg.http_timeout)?;
            let mut pagination = Pagination::with_options(cfg.page_size, &cfg.page_size_options);
            if let Some(size) = page_size {
                pagination.set_page_size(size);
            }
            pagination.set_page(page);
            let query = ListQuery::page(pagination.page_size(), pagination.offset(), ns);
            info!(endpoint = %endpoint, page = pagination.page(), page_size = pagination.page_size(), "ls invoked");
            match api.list(&endpoint, &query).await {
                Ok(list) => {
                    print_page(cli.output, &list, &cfg.empty_text)?;
                    if cli.output == Output::Human {
                        println!("page {}/{}", pagination.page(), pagination.total_pages(list.total).max(1));
                    }
                }
                Err(e) => {
                    error!(error = %e, "ls failed");
                    eprintln!("ls error: {}", e);
                }
            }
        }
        Commands::Search { endpoint, term, limit } => {
            let mut search_cfg = cfg.search.clone();
            if let Some(limit) = limit {
                search_cfg.search_limit = limit.max(1);
            }
            let api: Arc<dyn ListApi> = Arc::new(HttpApi::new(&cli.base_url, cli.token.clone(), cfg.http_timeout)?);
            let cache = SharedCache::from_config(&cfg.cache);
            let mut search = SearchOrchestrator::new(api, endpoint, cache, search_cfg).with_namespace(ns);
            search.set_term(&term);
            if !search.submit() {
                anyhow::bail!("search term is empty");
            }
            while !matches!(search.phase(), SearchPhase::Settled(_) | SearchPhase::Failed { .. }) {
                search.next_update().await;
                if let SearchPhase::Retrying { attempt, error, .. } = search.phase() {
                    eprintln!("retry {} after error: {}", attempt, error);
                }
            }
            if let Some(err) = search.error() {
                eprintln!("search error: {} (after {} retries)", err, search.retry_count());
            } else {
                let page = ListPage::new(search.results().to_vec(), search.total());
                print_page(cli.output, &page, &format!("No results found for \"{}\"", term.trim()))?;
            }
        }
        Commands::Browse { endpoint, cluster } => {
            let api: Arc<dyn ListApi> = Arc::new(
                HttpApi::new(&cli.base_url, cli.token.clone(), cfg.http_timeout).context("building http client")?,
            );
            browse::run(api, &endpoint, !cluster, ns, &cfg, cli.output).await?;
        }
        Commands::Config => match cli.output {
            Output::Human => {
                println!("base_url: {}", cli.base_url);
                println!("page_size: {} (options {:?})", cfg.page_size, cfg.page_size_options.as_slice());
                println!("empty_text: {}", cfg.empty_text);
                println!("http_timeout: {:?}", cfg.http_timeout);
                println!("search.debounce: {:?}", cfg.search.debounce);
                println!("search.max_retries: {}", cfg.search.max_retries);
                println!("search.retry_base: {:?}", cfg.search.retry_base);
                println!("search.limit: {}", cfg.search.search_limit);
                println!("search.history_cap: {}", cfg.search.history_cap);
                println!("cache.ttl: {:?}", cfg.cache.ttl);
                println!("cache.max_entries: {}", cfg.cache.max_entries);
            }
            Output::Json => {
                let v = serde_json::json!({
                    "base_url": cli.base_url,
                    "page_size": cfg.page_size,
                    "page_size_options": cfg.page_size_options.as_slice(),
                    "empty_text": cfg.empty_text,
                    "http_timeout_secs": cfg.http_timeout.as_secs(),
                    "search": {
                        "debounce_ms": cfg.search.debounce.as_millis() as u64,
                        "max_retries": cfg.search.max_retries,
                        "retry_base_ms": cfg.search.retry_base.as_millis() as u64,
                        "limit": cfg.search.search_limit,
                        "history_cap": cfg.search.history_cap,
                    },
                    "cache": {
                        "ttl_secs": cfg.cache.ttl.as_secs(),
                        "max_entries": cfg.cache.max_entries,
                    },
                });
                println!("{}", serde_json::to_string_pretty(&v)?);
            }
        },
    }

    Ok(())
}
