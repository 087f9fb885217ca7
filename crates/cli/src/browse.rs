//! Interactive `browse` loop: stdin lines drive a display composer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kbrowse_api::ListApi;
use kbrowse_core::BrowseConfig;
use kbrowse_store::SharedCache;
use kbrowse_table::{DisplayComposer, TableSpec};
use metrics::counter;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::{row_label, Output};

const HELP: &str = "commands: :ns [name] | :page N | :size N | :refresh | :clear | :retry | :history | :quit\n\
                    any other line is search input; an empty line clears the search";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Namespace(Option<String>),
    Page(u32),
    Size(u32),
    Refresh,
    Clear,
    Retry,
    History,
    Help,
    Quit,
    Input(String),
    Invalid(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix(':') else {
        return Command::Input(line.to_string());
    };
    let mut parts = rest.split_whitespace();
    let cmd = parts.next().unwrap_or_default();
    let arg = parts.next();
    let number = |arg: Option<&str>| arg.and_then(|a| a.parse::<u32>().ok()).filter(|n| *n > 0);
    match cmd {
        "ns" => Command::Namespace(arg.map(|a| a.to_string())),
        "page" => number(arg).map(Command::Page).unwrap_or_else(|| Command::Invalid(line.to_string())),
        "size" => number(arg).map(Command::Size).unwrap_or_else(|| Command::Invalid(line.to_string())),
        "refresh" | "r" => Command::Refresh,
        "clear" => Command::Clear,
        "retry" => Command::Retry,
        "history" => Command::History,
        "help" | "h" => Command::Help,
        "quit" | "q" => Command::Quit,
        _ => Command::Invalid(line.to_string()),
    }
}

fn render(c: &DisplayComposer, output: Output) -> Result<()> {
    if output == Output::Json {
        let v = serde_json::json!({
            "namespace": c.namespace(),
            "page": c.pagination().page(),
            "page_size": c.pagination().page_size(),
            "search": c.search().term(),
            "search_active": c.search().is_active(),
            "loading": c.is_loading(),
            "error": c.search().error(),
            "total": c.total(),
            "rows": c.rows(),
        });
        println!("{}", serde_json::to_string(&v)?);
        return Ok(());
    }
    if let Some(banner) = c.status_banner() {
        println!("== {}", banner);
    }
    if let Some(err) = c.search().error() {
        println!("!! search error (retry {}): {}", c.search().retry_count(), err);
    }
    if c.rows().is_empty() && !c.is_loading() {
        println!("   {}", c.empty_message());
    }
    for row in c.rows() {
        println!("   {}", row_label(row));
    }
    let ns = c.namespace().unwrap_or("(all)");
    if c.show_pagination() {
        println!(
            "-- ns {} | page {}/{} | {} per page | total {}{}",
            ns,
            c.pagination().page(),
            c.total_pages().max(1),
            c.pagination().page_size(),
            c.total(),
            if c.is_loading() { " | loading" } else { "" }
        );
    } else {
        println!(
            "-- ns {} | search \"{}\" | total {}{}",
            ns,
            c.search().term().trim(),
            c.total(),
            if c.is_loading() { " | searching" } else { "" }
        );
    }
    Ok(())
}

/// Returns false when the loop should stop.
fn handle(c: &mut DisplayComposer, cmd: Command) -> bool {
    counter!("kbrowse_cli_commands_total", 1u64);
    match cmd {
        Command::Namespace(ns) => c.set_namespace(ns.as_deref()),
        Command::Page(n) => c.set_page(n),
        Command::Size(n) => c.set_page_size(n),
        Command::Refresh => c.refresh(),
        Command::Clear => c.on_search_clear(),
        Command::Retry => {
            if !c.retry_search() {
                println!("nothing to retry");
            }
        }
        Command::History => {
            for (i, term) in c.search().history().entries().enumerate() {
                println!("{:>3}  {}", i + 1, term);
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return false,
        Command::Input(text) => {
            c.on_search_change(&text);
            let hints = c.search().suggestions();
            if !hints.is_empty() {
                println!("   (history: {})", hints.join(", "));
            }
        }
        Command::Invalid(line) => println!("unknown command: {} (try :help)", line),
    }
    true
}

enum Event {
    Line(Option<String>),
    Update(bool),
    Interrupt,
}

pub(crate) async fn run(
    api: Arc<dyn ListApi>,
    endpoint: &str,
    namespaced: bool,
    namespace: Option<&str>,
    cfg: &BrowseConfig,
    output: Output,
) -> Result<()> {
    let cache = SharedCache::from_config(&cfg.cache);
    let sweeper = cache.spawn_sweeper(Duration::from_secs(60));
    let mut table = DisplayComposer::new(TableSpec::new(endpoint, namespaced), api, cache.clone(), cfg)
        .with_namespace(namespace);
    info!(endpoint = %endpoint, namespaced, "browse started");
    println!("{}", HELP);
    table.refresh();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let event = tokio::select! {
            line = lines.next_line() => match line {
                Ok(line) => Event::Line(line),
                Err(e) => {
                    warn!(error = %e, "browse: stdin read failed");
                    Event::Line(None)
                }
            },
            applied = table.next_update() => Event::Update(applied),
            _ = tokio::signal::ctrl_c() => Event::Interrupt,
        };
        match event {
            Event::Line(Some(line)) => {
                let cmd = parse_command(&line);
                let redraw = !matches!(cmd, Command::History | Command::Help | Command::Invalid(_));
                if !handle(&mut table, cmd) {
                    break;
                }
                if redraw {
                    render(&table, output)?;
                }
            }
            Event::Update(true) => {
                table.drain_updates();
                render(&table, output)?;
            }
            Event::Update(false) => {}
            Event::Line(None) | Event::Interrupt => break,
        }
    }

    let stats = cache.stats();
    info!(hits = stats.hits, misses = stats.misses, expired = stats.expired, evicted = stats.evicted, "browse finished");
    sweeper.stop().await;
    Ok(())
}
