//! Background search job: debounce wait, cache lookup, request with backoff retries.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use kbrowse_api::ListApi;
use kbrowse_core::{ListQuery, SearchConfig, SearchQuery};
use kbrowse_store::SharedCache;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::phase::SearchOverlay;

/// Progress reported by a job. Every update carries the generation of the
/// orchestrator state that spawned the job.
#[derive(Debug, Clone)]
pub enum SearchUpdate {
    Dispatched { generation: u64, attempt: u32 },
    Settled { generation: u64, overlay: SearchOverlay, cached: bool, took: Duration },
    RetryScheduled { generation: u64, attempt: u32, next_at: Instant, error: String },
    Failed { generation: u64, attempts: u32, error: String },
}

impl SearchUpdate {
    pub fn generation(&self) -> u64 {
        match self {
            SearchUpdate::Dispatched { generation, .. }
            | SearchUpdate::Settled { generation, .. }
            | SearchUpdate::RetryScheduled { generation, .. }
            | SearchUpdate::Failed { generation, .. } => *generation,
        }
    }
}

pub(crate) struct JobSpec {
    pub generation: u64,
    pub endpoint: String,
    pub query: SearchQuery,
    pub delay: Option<Duration>,
    pub use_cache: bool,
    pub cfg: SearchConfig,
}

pub(crate) async fn run_search_job(
    spec: JobSpec,
    api: Arc<dyn ListApi>,
    cache: SharedCache,
    tx: mpsc::UnboundedSender<SearchUpdate>,
) {
    let JobSpec { generation, endpoint, query, delay, use_cache, cfg } = spec;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if use_cache {
        if let Some(hit) = cache.get(&query) {
            info!(key = %query.cache_key(), rows = hit.results.len(), "search: served from cache");
            let overlay = SearchOverlay::from(hit.to_page());
            let _ = tx.send(SearchUpdate::Settled { generation, overlay, cached: true, took: Duration::ZERO });
            return;
        }
    }
    let list_query = ListQuery::search(&query, cfg.search_limit);
    let mut attempt = 0u32;
    loop {
        if tx.send(SearchUpdate::Dispatched { generation, attempt }).is_err() {
            return;
        }
        counter!("kbrowse_search_dispatch_total", 1u64);
        let t0 = Instant::now();
        info!(endpoint = %endpoint, key = %query.cache_key(), attempt, "search: dispatch");
        match api.list(&endpoint, &list_query).await {
            Ok(page) => {
                let took = t0.elapsed();
                histogram!("kbrowse_search_ms", took.as_secs_f64() * 1000.0);
                cache.put(query.clone(), &page);
                info!(key = %query.cache_key(), rows = page.rows.len(), total = page.total, took_ms = %took.as_millis(), "search: ok");
                let _ = tx.send(SearchUpdate::Settled { generation, overlay: page.into(), cached: false, took });
                return;
            }
            Err(e) => {
                warn!(key = %query.cache_key(), attempt, error = %e, "search: request failed");
                if attempt < cfg.max_retries {
                    let delay = cfg.backoff(attempt);
                    attempt += 1;
                    counter!("kbrowse_search_retry_total", 1u64);
                    let next_at = Instant::now() + delay;
                    info!(attempt, delay_ms = %delay.as_millis(), "search: retry scheduled");
                    let update = SearchUpdate::RetryScheduled { generation, attempt, next_at, error: e.to_string() };
                    if tx.send(update).is_err() {
                        return;
                    }
                    tokio::time::sleep_until(next_at).await;
                } else {
                    counter!("kbrowse_search_failed_total", 1u64);
                    let _ = tx.send(SearchUpdate::Failed { generation, attempts: attempt, error: e.to_string() });
                    return;
                }
            }
        }
    }
}
