//! kbrowse table: the display composer for one resource table.
//!
//! A [`DisplayComposer`] decides what a table shows. While a search is active
//! the search overlay wins and pagination is hidden; otherwise the paginated
//! base dataset for the current page, page size and namespace is shown.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kbrowse_api::ListApi;
use kbrowse_core::{BrowseConfig, ListPage, ListQuery, Pagination, Row};
use kbrowse_search::{SearchOrchestrator, SearchUpdate, TermChange};
use kbrowse_store::SharedCache;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod base;

pub use base::BaseUpdate;

use base::spawn_base_fetch;

/// Static description of a resource table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub endpoint: String,
    /// Cluster-scoped tables ignore namespace changes.
    pub namespaced: bool,
}

impl TableSpec {
    pub fn new(endpoint: impl Into<String>, namespaced: bool) -> Self {
        Self { endpoint: endpoint.into(), namespaced }
    }
}

enum Next {
    Base(BaseUpdate),
    Search(SearchUpdate),
    Closed,
}

pub struct DisplayComposer {
    spec: TableSpec,
    api: Arc<dyn ListApi>,
    pagination: Pagination,
    search: SearchOrchestrator,
    namespace: Option<String>,
    empty_text: String,
    base: ListPage,
    loading: bool,
    base_generation: u64,
    base_tx: mpsc::UnboundedSender<BaseUpdate>,
    base_rx: mpsc::UnboundedReceiver<BaseUpdate>,
}

impl DisplayComposer {
    pub fn new(spec: TableSpec, api: Arc<dyn ListApi>, cache: SharedCache, cfg: &BrowseConfig) -> Self {
        let (base_tx, base_rx) = mpsc::unbounded_channel();
        let search = SearchOrchestrator::new(api.clone(), spec.endpoint.clone(), cache, cfg.search.clone());
        Self {
            spec,
            api,
            pagination: Pagination::with_options(cfg.page_size, &cfg.page_size_options),
            search,
            namespace: None,
            empty_text: cfg.empty_text.clone(),
            base: ListPage::empty(),
            loading: false,
            base_generation: 0,
            base_tx,
            base_rx,
        }
    }

    /// Start in a namespace. Ignored for cluster-scoped tables.
    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        if self.spec.namespaced {
            self.namespace = namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string());
            self.search = self.search.with_namespace(self.namespace.as_deref());
        }
        self
    }

    pub fn spec(&self) -> &TableSpec { &self.spec }
    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }
    pub fn pagination(&self) -> &Pagination { &self.pagination }
    pub fn search(&self) -> &SearchOrchestrator { &self.search }
    pub fn base_rows(&self) -> &[Row] { &self.base.rows }

    pub fn rows(&self) -> &[Row] {
        if self.search.is_active() {
            self.search.results()
        } else {
            &self.base.rows
        }
    }

    pub fn total(&self) -> u64 {
        if self.search.is_active() {
            self.search.total()
        } else {
            self.base.total
        }
    }

    pub fn empty_message(&self) -> String {
        if self.search.is_active() {
            format!("No results found for \"{}\"", self.search.term().trim())
        } else {
            self.empty_text.clone()
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading || self.search.is_searching()
    }

    /// Pagination controls are hidden while the search overlay is shown.
    pub fn show_pagination(&self) -> bool {
        !self.search.is_active()
    }

    pub fn total_pages(&self) -> u64 {
        self.pagination.total_pages(self.base.total)
    }

    /// Summary line for an active search once it has an answer.
    pub fn status_banner(&self) -> Option<String> {
        if !self.search.is_active() || self.search.is_searching() {
            return None;
        }
        let total = self.search.total();
        if total > 0 {
            Some(format!("Found {} matching resource(s)", total))
        } else {
            Some("No matching resources found".to_string())
        }
    }

    /// Re-fetch the base dataset. An active search is kept and retried too.
    pub fn refresh(&mut self) {
        self.fetch_base();
        if self.search.is_active() {
            self.search.retry();
        }
    }

    fn fetch_base(&mut self) {
        self.base_generation = self.base_generation.wrapping_add(1);
        self.loading = true;
        let ns = if self.spec.namespaced { self.namespace.as_deref() } else { None };
        let query = ListQuery::page(self.pagination.page_size(), self.pagination.offset(), ns);
        spawn_base_fetch(self.api.clone(), self.spec.endpoint.clone(), query, self.base_generation, self.base_tx.clone());
    }

    pub fn on_search_change(&mut self, value: &str) {
        if self.search.set_term(value) == TermChange::Cleared {
            self.refresh();
        }
    }

    pub fn on_search_submit(&mut self) -> bool {
        self.search.submit()
    }

    pub fn on_search_clear(&mut self) {
        self.search.clear();
        self.refresh();
    }

    pub fn retry_search(&mut self) -> bool {
        self.search.retry()
    }

    pub fn set_namespace(&mut self, namespace: Option<&str>) {
        if !self.spec.namespaced {
            debug!(endpoint = %self.spec.endpoint, "table: namespace ignored for cluster-scoped table");
            return;
        }
        let next = namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string());
        if next == self.namespace {
            return;
        }
        info!(endpoint = %self.spec.endpoint, namespace = %next.as_deref().unwrap_or("(all)"), "table: namespace changed");
        self.namespace = next;
        self.pagination.reset();
        self.search.set_namespace(self.namespace.as_deref());
        self.fetch_base();
    }

    pub fn set_page(&mut self, page: u32) {
        self.pagination.set_page(page);
        self.fetch_base();
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        self.pagination.set_page_size(page_size);
        self.fetch_base();
    }

    /// Apply one base fetch result. Returns false for a superseded fetch.
    pub fn apply_base(&mut self, update: BaseUpdate) -> bool {
        if update.generation() != self.base_generation {
            counter!("kbrowse_table_stale_fetches_total", 1u64);
            debug!(update_gen = update.generation(), current_gen = self.base_generation, "table: dropping stale base fetch");
            return false;
        }
        self.loading = false;
        match update {
            BaseUpdate::Loaded { page, took, .. } => {
                info!(endpoint = %self.spec.endpoint, rows = page.rows.len(), total = page.total, took_ms = %took.as_millis(), "table: base loaded");
                self.base = page;
            }
            BaseUpdate::Failed { error, .. } => {
                warn!(endpoint = %self.spec.endpoint, error = %error, "table: base fetch failed");
                self.base = ListPage::empty();
            }
        }
        true
    }

    /// Apply everything already queued by base fetches and search jobs.
    pub fn drain_updates(&mut self) -> usize {
        let mut applied = 0usize;
        let mut seen = 0usize;
        while seen < 256 {
            match self.base_rx.try_recv() {
                Ok(update) => {
                    seen += 1;
                    if self.apply_base(update) {
                        applied += 1;
                    }
                }
                Err(_) => break,
            }
        }
        applied + self.search.drain_updates()
    }

    /// Wait for the next base or search update and apply it. Returns whether it was current.
    pub async fn next_update(&mut self) -> bool {
        let next = tokio::select! {
            Some(update) = self.base_rx.recv() => Next::Base(update),
            Some(update) = self.search.recv_update() => Next::Search(update),
            else => Next::Closed,
        };
        match next {
            Next::Base(update) => self.apply_base(update),
            Next::Search(update) => self.search.apply(update),
            Next::Closed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbrowse_api::{named_rows, MockApi};
    use kbrowse_core::CacheConfig;

    fn composer(spec: TableSpec) -> DisplayComposer {
        let api = Arc::new(MockApi::with_page(ListPage::new(named_rows(&["a"]), 1)));
        DisplayComposer::new(spec, api, SharedCache::from_config(&CacheConfig::default()), &BrowseConfig::default())
    }

    #[tokio::test]
    async fn idle_table_shows_base_and_default_empty_text() {
        let c = composer(TableSpec::new("/api/pods", true));
        assert!(c.rows().is_empty());
        assert_eq!(c.total(), 0);
        assert_eq!(c.empty_message(), "No data");
        assert!(c.show_pagination());
        assert_eq!(c.status_banner(), None);
        assert!(!c.is_loading());
    }

    #[tokio::test]
    async fn cluster_scoped_table_ignores_namespace() {
        let mut c = composer(TableSpec::new("/api/nodes", false)).with_namespace(Some("kube-system"));
        assert_eq!(c.namespace(), None);
        c.set_namespace(Some("default"));
        assert_eq!(c.namespace(), None);
        assert!(!c.is_loading());
    }

    #[tokio::test]
    async fn stale_base_generation_is_rejected() {
        let mut c = composer(TableSpec::new("/api/pods", true));
        c.refresh();
        c.refresh();
        let stale = BaseUpdate::Loaded { generation: 1, page: ListPage::new(named_rows(&["old"]), 1), took: Default::default() };
        assert!(!c.apply_base(stale));
        assert!(c.is_loading());
        assert!(c.rows().is_empty());
    }
}
