//! kbrowse search: the search overlay orchestrator.
//!
//! A [`SearchOrchestrator`] owns the search box of one resource table. Input
//! is debounced, dispatched through the shared response cache, retried with
//! exponential backoff, and reported back as [`SearchUpdate`]s which the owner
//! applies with [`SearchOrchestrator::drain_updates`] or
//! [`SearchOrchestrator::next_update`].
//!
//! Every background task is tagged with the generation that spawned it. Any
//! input, clear or namespace change bumps the generation and aborts the
//! previous task, and updates from an older generation are dropped before
//! they touch state.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kbrowse_api::ListApi;
use kbrowse_core::{Row, SearchConfig, SearchQuery};
use kbrowse_store::SharedCache;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod history;
mod job;
mod phase;

pub use history::{SearchHistory, SUGGESTION_LIMIT};
pub use job::SearchUpdate;
pub use phase::{SearchOverlay, SearchPhase};

use job::{run_search_job, JobSpec};

/// Outcome of [`SearchOrchestrator::set_term`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermChange {
    /// The input is empty: search state is cleared and the base dataset should be shown.
    Cleared,
    /// A dispatch is scheduled once input settles.
    Debouncing,
}

pub struct SearchOrchestrator {
    api: Arc<dyn ListApi>,
    endpoint: String,
    cache: SharedCache,
    cfg: SearchConfig,
    namespace: Option<String>,
    term: String,
    phase: SearchPhase,
    history: SearchHistory,
    generation: u64,
    task: Option<JoinHandle<()>>,
    updates_tx: mpsc::UnboundedSender<SearchUpdate>,
    updates_rx: mpsc::UnboundedReceiver<SearchUpdate>,
}

impl SearchOrchestrator {
    pub fn new(api: Arc<dyn ListApi>, endpoint: impl Into<String>, cache: SharedCache, cfg: SearchConfig) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let history = SearchHistory::new(cfg.history_cap);
        Self {
            api,
            endpoint: endpoint.into(),
            cache,
            cfg,
            namespace: None,
            term: String::new(),
            phase: SearchPhase::Idle,
            history,
            generation: 0,
            task: None,
            updates_tx,
            updates_rx,
        }
    }

    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string());
        self
    }

    pub fn endpoint(&self) -> &str { &self.endpoint }
    pub fn term(&self) -> &str { &self.term }
    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }
    pub fn phase(&self) -> &SearchPhase { &self.phase }
    pub fn config(&self) -> &SearchConfig { &self.cfg }
    pub fn history(&self) -> &SearchHistory { &self.history }

    pub fn results(&self) -> &[Row] {
        self.phase.overlay().map(|o| o.rows()).unwrap_or(&[])
    }

    pub fn total(&self) -> u64 {
        self.phase.overlay().map(|o| o.total).unwrap_or(0)
    }

    /// True only between dispatch and settlement of a request.
    pub fn is_searching(&self) -> bool {
        matches!(self.phase, SearchPhase::InFlight { .. })
    }

    pub fn error(&self) -> Option<&str> { self.phase.error() }
    pub fn has_error(&self) -> bool { self.phase.error().is_some() }
    pub fn retry_count(&self) -> u32 { self.phase.retry_count() }
    pub fn has_searched(&self) -> bool { self.phase.has_dispatched() }
    pub fn has_results(&self) -> bool { !self.results().is_empty() }

    /// A non-empty term for which a dispatch already happened.
    pub fn is_active(&self) -> bool {
        !self.term.trim().is_empty() && self.has_searched()
    }

    /// A debounce timer, request or backoff wait is outstanding.
    pub fn is_pending(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// History entries matching the current input.
    pub fn suggestions(&self) -> Vec<&str> {
        self.history.suggestions(&self.term)
    }

    pub fn clear_cache(&self) { self.cache.clear(); }
    pub fn cache_len(&self) -> usize { self.cache.len() }

    fn query(&self) -> SearchQuery {
        SearchQuery::new(&self.term, self.namespace.as_deref())
    }

    /// Handle a keystroke. Empty input clears immediately, anything else
    /// restarts the debounce timer.
    pub fn set_term(&mut self, value: &str) -> TermChange {
        self.term = value.to_string();
        if self.term.trim().is_empty() {
            self.reset();
            return TermChange::Cleared;
        }
        self.cancel_pending();
        self.phase = SearchPhase::Debouncing { shown: self.phase.carry() };
        self.spawn_job(Some(self.cfg.debounce), true);
        debug!(term = %self.term, debounce_ms = %self.cfg.debounce.as_millis(), "search: debouncing");
        TermChange::Debouncing
    }

    /// Dispatch the current term now, skipping the debounce. A cache hit
    /// settles before this returns. Returns false for an empty term.
    pub fn submit(&mut self) -> bool {
        if self.term.trim().is_empty() {
            return false;
        }
        self.cancel_pending();
        let query = self.query();
        if let Some(hit) = self.cache.get(&query) {
            info!(key = %query.cache_key(), rows = hit.results.len(), "search: served from cache");
            self.phase = SearchPhase::Settled(SearchOverlay::from(hit.to_page()));
            return true;
        }
        self.phase = SearchPhase::InFlight { attempt: 0, shown: self.phase.carry() };
        self.spawn_job(None, false);
        true
    }

    /// Restart the request for the current term from scratch (no debounce, no cache).
    pub fn retry(&mut self) -> bool {
        if self.term.trim().is_empty() {
            return false;
        }
        self.cancel_pending();
        info!(term = %self.term, "search: manual retry");
        self.phase = SearchPhase::InFlight { attempt: 0, shown: self.phase.carry() };
        self.spawn_job(None, false);
        true
    }

    /// Empty the search box and drop any outstanding work.
    pub fn clear(&mut self) {
        self.term.clear();
        self.reset();
    }

    /// Switch namespace. A present term is cleared so results scoped to the
    /// old namespace are never shown under the new one. Returns true when the
    /// search was cleared.
    pub fn set_namespace(&mut self, namespace: Option<&str>) -> bool {
        let next = namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string());
        if next == self.namespace {
            return false;
        }
        info!(from = %self.namespace.as_deref().unwrap_or("(all)"), to = %next.as_deref().unwrap_or("(all)"), "search: namespace changed");
        self.namespace = next;
        if self.term.is_empty() {
            self.cancel_pending();
            return false;
        }
        self.clear();
        true
    }

    fn reset(&mut self) {
        self.cancel_pending();
        if !matches!(self.phase, SearchPhase::Idle) {
            debug!(from = self.phase.name(), "search: reset to idle");
        }
        self.phase = SearchPhase::Idle;
    }

    fn cancel_pending(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn spawn_job(&mut self, delay: Option<std::time::Duration>, use_cache: bool) {
        let spec = JobSpec {
            generation: self.generation,
            endpoint: self.endpoint.clone(),
            query: self.query(),
            delay,
            use_cache,
            cfg: self.cfg.clone(),
        };
        let task = tokio::spawn(run_search_job(spec, self.api.clone(), self.cache.clone(), self.updates_tx.clone()));
        self.task = Some(task);
    }

    /// Apply one update. Returns false when it belonged to a superseded generation.
    pub fn apply(&mut self, update: SearchUpdate) -> bool {
        if update.generation() != self.generation {
            counter!("kbrowse_search_stale_updates_total", 1u64);
            debug!(update_gen = update.generation(), current_gen = self.generation, "search: dropping stale update");
            return false;
        }
        match update {
            SearchUpdate::Dispatched { attempt, .. } => {
                self.phase = SearchPhase::InFlight { attempt, shown: self.phase.carry() };
            }
            SearchUpdate::Settled { overlay, cached, took, .. } => {
                if !cached {
                    self.history.record(&self.term);
                }
                debug!(rows = overlay.rows.len(), total = overlay.total, cached, took_ms = %took.as_millis(), "search: settled");
                self.phase = SearchPhase::Settled(overlay);
            }
            SearchUpdate::RetryScheduled { attempt, next_at, error, .. } => {
                self.phase = SearchPhase::Retrying {
                    attempt,
                    next_at,
                    error,
                    shown: self.phase.carry(),
                };
            }
            SearchUpdate::Failed { attempts, error, .. } => {
                warn!(term = %self.term, attempts, error = %error, "search: giving up");
                self.phase = SearchPhase::Failed { attempts, error };
            }
        }
        true
    }

    /// Apply every update that is already queued (bounded per call, like a UI frame).
    pub fn drain_updates(&mut self) -> usize {
        let mut applied = 0usize;
        let mut seen = 0usize;
        while seen < 256 {
            match self.updates_rx.try_recv() {
                Ok(update) => {
                    seen += 1;
                    if self.apply(update) {
                        applied += 1;
                    }
                }
                Err(_) => break,
            }
        }
        applied
    }

    /// Wait for the next update from a background task without applying it.
    pub async fn recv_update(&mut self) -> Option<SearchUpdate> {
        self.updates_rx.recv().await
    }

    /// Wait for the next update and apply it. Returns whether it was current.
    pub async fn next_update(&mut self) -> bool {
        match self.updates_rx.recv().await {
            Some(update) => self.apply(update),
            None => false,
        }
    }
}

impl Drop for SearchOrchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
