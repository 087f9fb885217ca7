//! Runtime configuration: defaults overridden by `KBROWSE_*` environment variables.

#![forbid(unsafe_code)]

use std::str::FromStr;
use std::time::Duration;

use smallvec::SmallVec;
use tracing::warn;

use crate::pagination::{DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE_OPTIONS};

/// Upper bound accepted for `KBROWSE_HISTORY_CAP`.
pub const MAX_HISTORY_CAP: usize = 1000;

/// Search orchestration knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub debounce: Duration,
    pub max_retries: u32,
    /// Backoff before retry `n` is `retry_base * 2^n`.
    pub retry_base: Duration,
    pub search_limit: u32,
    pub history_cap: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            max_retries: 3,
            retry_base: Duration::from_millis(1000),
            search_limit: 1000,
            history_cap: 20,
        }
    }
}

impl SearchConfig {
    pub fn backoff(&self, retry_count: u32) -> Duration {
        self.retry_base.saturating_mul(2u32.saturating_pow(retry_count))
    }
}

/// Response cache bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(300), max_entries: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseConfig {
    pub page_size: u32,
    pub page_size_options: SmallVec<[u32; 4]>,
    pub empty_text: String,
    pub http_timeout: Duration,
    pub search: SearchConfig,
    pub cache: CacheConfig,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_size_options: SmallVec::from_slice(&DEFAULT_PAGE_SIZE_OPTIONS),
            empty_text: "No data".to_string(),
            http_timeout: Duration::from_secs(30),
            search: SearchConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl BrowseConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unparsable values keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = parse::<u32, _>(&lookup, "KBROWSE_PAGE_SIZE").filter(|v| *v > 0) {
            cfg.page_size = v;
        }
        if let Some(v) = lookup("KBROWSE_EMPTY_TEXT").filter(|v| !v.is_empty()) {
            cfg.empty_text = v;
        }
        if let Some(v) = parse::<u64, _>(&lookup, "KBROWSE_HTTP_TIMEOUT_SECS") {
            cfg.http_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse::<u64, _>(&lookup, "KBROWSE_DEBOUNCE_MS") {
            cfg.search.debounce = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u32, _>(&lookup, "KBROWSE_MAX_RETRIES") {
            cfg.search.max_retries = v;
        }
        if let Some(v) = parse::<u64, _>(&lookup, "KBROWSE_RETRY_BASE_MS") {
            cfg.search.retry_base = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u32, _>(&lookup, "KBROWSE_SEARCH_LIMIT").filter(|v| *v > 0) {
            cfg.search.search_limit = v;
        }
        if let Some(v) = parse::<usize, _>(&lookup, "KBROWSE_HISTORY_CAP").filter(|v| *v <= MAX_HISTORY_CAP) {
            cfg.search.history_cap = v;
        }
        if let Some(v) = parse::<u64, _>(&lookup, "KBROWSE_CACHE_TTL_SECS") {
            cfg.cache.ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse::<usize, _>(&lookup, "KBROWSE_CACHE_MAX_ENTRIES").filter(|v| *v > 0) {
            cfg.cache.max_entries = v;
        }
        cfg
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "config: ignoring invalid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_dashboard_behavior() {
        let cfg = BrowseConfig::default();
        assert_eq!(cfg.page_size, 20);
        assert_eq!(cfg.search.debounce, Duration::from_millis(300));
        assert_eq!(cfg.search.max_retries, 3);
        assert_eq!(cfg.search.search_limit, 1000);
        assert_eq!(cfg.cache.ttl, Duration::from_secs(300));
        assert_eq!(cfg.cache.max_entries, 100);
    }

    #[test]
    fn env_overrides_and_ignores_garbage() {
        let cfg = BrowseConfig::from_lookup(lookup(&[
            ("KBROWSE_DEBOUNCE_MS", "150"),
            ("KBROWSE_CACHE_MAX_ENTRIES", "8"),
            ("KBROWSE_MAX_RETRIES", "many"),
            ("KBROWSE_PAGE_SIZE", "0"),
        ]));
        assert_eq!(cfg.search.debounce, Duration::from_millis(150));
        assert_eq!(cfg.cache.max_entries, 8);
        assert_eq!(cfg.search.max_retries, 3);
        assert_eq!(cfg.page_size, 20);
    }

    #[test]
    fn absurd_history_cap_keeps_default() {
        let huge = usize::MAX.to_string();
        let cfg = BrowseConfig::from_lookup(|k| (k == "KBROWSE_HISTORY_CAP").then(|| huge.clone()));
        assert_eq!(cfg.search.history_cap, 20);
        let cfg = BrowseConfig::from_lookup(lookup(&[("KBROWSE_HISTORY_CAP", "1000000000000")]));
        assert_eq!(cfg.search.history_cap, 20);
        let cfg = BrowseConfig::from_lookup(lookup(&[("KBROWSE_HISTORY_CAP", "50")]));
        assert_eq!(cfg.search.history_cap, 50);
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let s = SearchConfig::default();
        assert_eq!(s.backoff(0), Duration::from_millis(1000));
        assert_eq!(s.backoff(1), Duration::from_millis(2000));
        assert_eq!(s.backoff(2), Duration::from_millis(4000));
    }
}
