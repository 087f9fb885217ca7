//! kbrowse list endpoint façade.
//!
//! Every resource table talks to its REST endpoint through [`ListApi`]. The
//! browse path and the search path use the same endpoint and response shape,
//! only the query parameters differ. [`HttpApi`] is the real client,
//! [`MockApi`] scripts responses for tests.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use kbrowse_core::{normalize_response, BrowseError, BrowseResult, ListPage, ListQuery, Row};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use kbrowse_core::SearchQuery;

/// Paginated list collaborator: `GET {endpoint}?limit=&offset=&namespace=&search=`.
#[async_trait::async_trait]
pub trait ListApi: Send + Sync {
    async fn list(&self, endpoint: &str, query: &ListQuery) -> BrowseResult<ListPage>;
}

// ----------------- HTTP implementation -----------------

/// reqwest-backed client for the dashboard REST API.
pub struct HttpApi {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> BrowseResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrowseError::Config(format!("building http client: {}", e)))?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), token, client })
    }

    /// Absolute URL for an endpoint; absolute endpoints are used as-is.
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }
}

#[async_trait::async_trait]
impl ListApi for HttpApi {
    async fn list(&self, endpoint: &str, query: &ListQuery) -> BrowseResult<ListPage> {
        let t0 = Instant::now();
        let url = self.url(endpoint);
        let pairs = query.to_pairs();
        debug!(url = %url, query = ?pairs, "api: list start");
        let mut req = self.client.get(&url).query(&pairs);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| {
            counter!("kbrowse_api_errors_total", 1u64);
            warn!(url = %url, error = %e, "api: request failed");
            BrowseError::Transport(e.to_string())
        })?;
        let status = resp.status();
        if !status.is_success() {
            counter!("kbrowse_api_errors_total", 1u64);
            warn!(url = %url, status = status.as_u16(), "api: non-success status");
            return Err(BrowseError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }
        let body: serde_json::Value = resp.json().await.map_err(|e| BrowseError::Decode(e.to_string()))?;
        let page = normalize_response(&body);
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        histogram!("kbrowse_api_list_ms", ms);
        info!(url = %url, rows = page.rows.len(), total = page.total, took_ms = %t0.elapsed().as_millis(), "api: list ok");
        Ok(page)
    }
}

// ----------------- Mock implementation -----------------

type Responder = Box<dyn Fn(&str, &ListQuery) -> BrowseResult<ListPage> + Send + Sync>;

/// One request observed by [`MockApi`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: String,
    pub query: ListQuery,
    pub at: Instant,
}

impl RecordedCall {
    pub fn is_search(&self) -> bool {
        self.query.search.is_some()
    }
}

/// Scripted in-memory implementation for tests.
pub struct MockApi {
    responder: Responder,
    latency: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockApi {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &ListQuery) -> BrowseResult<ListPage> + Send + Sync + 'static,
    {
        Self { responder: Box::new(responder), latency: None, calls: Mutex::new(Vec::new()) }
    }

    /// Always answer with the same page.
    pub fn with_page(page: ListPage) -> Self {
        Self::new(move |_, _| Ok(page.clone()))
    }

    /// Always fail with the given error.
    pub fn failing(err: BrowseError) -> Self {
        Self::new(move |_, _| Err(err.clone()))
    }

    /// Delay every response by `latency` (measured on the tokio clock).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn guard(&self) -> MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.guard().clone()
    }

    pub fn call_count(&self) -> usize {
        self.guard().len()
    }

    pub fn search_calls(&self) -> Vec<RecordedCall> {
        self.guard().iter().filter(|c| c.is_search()).cloned().collect()
    }

    pub fn browse_calls(&self) -> Vec<RecordedCall> {
        self.guard().iter().filter(|c| !c.is_search()).cloned().collect()
    }
}

#[async_trait::async_trait]
impl ListApi for MockApi {
    async fn list(&self, endpoint: &str, query: &ListQuery) -> BrowseResult<ListPage> {
        self.guard().push(RecordedCall { endpoint: endpoint.to_string(), query: query.clone(), at: Instant::now() });
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.responder)(endpoint, query)
    }
}

/// Rows of the form `{"name": <name>}`; handy for fixtures.
pub fn named_rows(names: &[&str]) -> Vec<Row> {
    names.iter().map(|n| serde_json::json!({ "name": n })).collect()
}
