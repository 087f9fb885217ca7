//! kbrowse core types: rows, list pages, queries and the error taxonomy.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod config;
pub mod pagination;

pub use config::{BrowseConfig, CacheConfig, SearchConfig};
pub use pagination::Pagination;

/// A single resource row. The shape is resource-type specific and opaque here.
pub type Row = serde_json::Value;

/// Normalized list response: the rows of one request plus the server-reported total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub rows: Vec<Row>,
    pub total: u64,
}

impl ListPage {
    pub fn new(rows: Vec<Row>, total: u64) -> Self {
        Self { rows, total }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Query parameters for one list request. Unset or empty values are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: u32,
    pub offset: Option<u64>,
    pub namespace: Option<String>,
    pub search: Option<String>,
}

impl ListQuery {
    /// Paginated browse request.
    pub fn page(limit: u32, offset: u64, namespace: Option<&str>) -> Self {
        Self { limit, offset: Some(offset), namespace: non_empty(namespace), search: None }
    }

    /// Search overlay request; the term is trimmed before it is sent.
    pub fn search(query: &SearchQuery, limit: u32) -> Self {
        Self {
            limit,
            offset: None,
            namespace: non_empty(query.namespace.as_deref()),
            search: non_empty(Some(query.term.trim())),
        }
    }

    /// Render as `(key, value)` pairs in a stable order: search, limit, offset, namespace.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::with_capacity(4);
        if let Some(s) = &self.search {
            out.push(("search", s.clone()));
        }
        out.push(("limit", self.limit.to_string()));
        if let Some(o) = self.offset {
            out.push(("offset", o.to_string()));
        }
        if let Some(ns) = &self.namespace {
            out.push(("namespace", ns.clone()));
        }
        out
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.filter(|v| !v.is_empty()).map(|v| v.to_string())
}

/// Cache identity of a search: `(term, namespace)`, term compared trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    pub term: String,
    pub namespace: Option<String>,
}

impl SearchQuery {
    pub fn new(term: &str, namespace: Option<&str>) -> Self {
        Self { term: term.trim().to_string(), namespace: non_empty(namespace) }
    }

    /// Human-readable key used in logs, e.g. `web:default` or `web:*`.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.term, self.namespace.as_deref().unwrap_or("*"))
    }
}

/// Normalize a raw list response body.
///
/// Missing or ill-typed `data` becomes an empty row set. The total is
/// `page.total` when present and non-zero, otherwise the number of rows.
pub fn normalize_response(body: &serde_json::Value) -> ListPage {
    let rows: Vec<Row> = body
        .get("data")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let total = body
        .get("page")
        .and_then(|p| p.get("total"))
        .and_then(|t| t.as_u64())
        .filter(|t| *t > 0)
        .unwrap_or(rows.len() as u64);
    ListPage { rows, total }
}

/// Errors produced while talking to a list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum BrowseError {
    #[error("http {status}: {reason}")]
    Http { status: u16, reason: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("config: {0}")]
    Config(String),
}

pub type BrowseResult<T> = Result<T, BrowseError>;
