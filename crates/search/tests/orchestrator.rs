#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kbrowse_api::{named_rows, MockApi};
use kbrowse_core::{BrowseError, CacheConfig, ListPage, SearchConfig, SearchQuery};
use kbrowse_search::{SearchOrchestrator, SearchOverlay, SearchPhase, SearchUpdate, TermChange};
use kbrowse_store::SharedCache;
use tokio::time::sleep;

fn cache() -> SharedCache { SharedCache::from_config(&CacheConfig::default()) }

fn orchestrator(api: &Arc<MockApi>, cache: SharedCache) -> SearchOrchestrator {
    SearchOrchestrator::new(api.clone(), "/api/pods", cache, SearchConfig::default())
}

fn web_page() -> ListPage { ListPage::new(named_rows(&["web-1", "web-2", "web-3"]), 3) }

fn assert_near(actual: Duration, expected_ms: u64) {
    let ms = actual.as_millis() as u64;
    assert!(ms >= expected_ms && ms < expected_ms + 5, "expected ~{}ms, got {}ms", expected_ms, ms);
}

#[tokio::test(start_paused = true)]
async fn keystrokes_within_debounce_dispatch_once_with_final_term() {
    let api = Arc::new(MockApi::with_page(web_page()));
    let mut s = orchestrator(&api, cache());
    for partial in ["w", "we", "web"] {
        assert_eq!(s.set_term(partial), TermChange::Debouncing);
        sleep(Duration::from_millis(100)).await;
    }
    // still inside the window of the last keystroke
    assert_eq!(api.call_count(), 0);
    assert!(!s.is_active());
    assert!(s.is_pending());

    sleep(Duration::from_millis(300)).await;
    s.drain_updates();
    let calls = api.search_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].query.search.as_deref(), Some("web"));
    assert_eq!(calls[0].query.limit, 1000);
    assert!(s.is_active());
    assert_eq!(s.total(), 3);
    assert_eq!(s.history().entries().collect::<Vec<_>>(), vec!["web"]);
}

#[tokio::test(start_paused = true)]
async fn submit_served_from_cache_settles_in_the_same_call() {
    let api = Arc::new(MockApi::with_page(web_page()));
    let shared = cache();
    shared.put(SearchQuery::new("db", Some("data")), &ListPage::new(named_rows(&["db-0", "db-1"]), 2));
    let mut s = orchestrator(&api, shared).with_namespace(Some("data"));

    s.set_term("db");
    assert!(s.submit());
    assert!(matches!(s.phase(), SearchPhase::Settled(_)));
    assert_eq!(s.results().len(), 2);
    assert!(s.is_active());

    sleep(Duration::from_secs(2)).await;
    s.drain_updates();
    assert_eq!(api.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn debounced_repeat_of_a_cached_term_skips_network() {
    let api = Arc::new(MockApi::with_page(web_page()));
    let mut s = orchestrator(&api, cache());
    s.set_term("web");
    sleep(Duration::from_millis(400)).await;
    s.drain_updates();
    assert_eq!(api.call_count(), 1);

    s.clear();
    s.set_term("web");
    sleep(Duration::from_millis(400)).await;
    s.drain_updates();
    assert_eq!(api.call_count(), 1);
    assert_eq!(s.total(), 3);
    assert_eq!(s.cache_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_exponentially_then_give_up() {
    let api = Arc::new(MockApi::failing(BrowseError::Http { status: 503, reason: "Service Unavailable".into() }));
    let mut s = orchestrator(&api, cache());
    s.set_term("web");
    assert!(s.submit());

    sleep(Duration::from_millis(10)).await;
    s.drain_updates();
    assert!(matches!(s.phase(), SearchPhase::Retrying { attempt: 1, .. }));
    assert_eq!(s.retry_count(), 1);
    assert!(!s.is_searching());
    assert!(s.error().is_some_and(|e| e.contains("503")));

    sleep(Duration::from_secs(30)).await;
    s.drain_updates();
    let calls = api.calls();
    assert_eq!(calls.len(), 4);
    assert_near(calls[1].at - calls[0].at, 1000);
    assert_near(calls[2].at - calls[0].at, 3000);
    assert_near(calls[3].at - calls[0].at, 7000);
    assert!(matches!(s.phase(), SearchPhase::Failed { attempts: 3, .. }));
    assert!(s.results().is_empty());
    assert_eq!(s.total(), 0);
    assert!(s.has_error());
    assert!(s.is_active());

    sleep(Duration::from_secs(60)).await;
    s.drain_updates();
    assert_eq!(api.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn manual_retry_restarts_after_failure() {
    let failures_left = Arc::new(AtomicUsize::new(4));
    let left = failures_left.clone();
    let api = Arc::new(MockApi::new(move |_, _| {
        if left.load(Ordering::SeqCst) > 0 {
            left.fetch_sub(1, Ordering::SeqCst);
            Err(BrowseError::Transport("connection refused".into()))
        } else {
            Ok(ListPage::new(named_rows(&["api-0"]), 1))
        }
    }));
    let mut s = orchestrator(&api, cache());
    s.set_term("api");
    s.submit();
    sleep(Duration::from_secs(10)).await;
    s.drain_updates();
    assert!(matches!(s.phase(), SearchPhase::Failed { .. }));
    assert!(s.history().is_empty());

    assert!(s.retry());
    assert!(s.is_searching());
    sleep(Duration::from_millis(10)).await;
    s.drain_updates();
    assert!(matches!(s.phase(), SearchPhase::Settled(_)));
    assert_eq!(s.results().len(), 1);
    assert!(s.error().is_none());
    assert_eq!(api.call_count(), 5);
    assert_eq!(failures_left.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn clear_cancels_a_pending_retry() {
    let api = Arc::new(MockApi::failing(BrowseError::Transport("reset".into())));
    let mut s = orchestrator(&api, cache());
    s.set_term("web");
    s.submit();
    sleep(Duration::from_millis(100)).await;
    s.drain_updates();
    assert!(matches!(s.phase(), SearchPhase::Retrying { .. }));

    s.clear();
    assert!(!s.is_pending());
    sleep(Duration::from_secs(10)).await;
    s.drain_updates();
    assert_eq!(api.call_count(), 1);
    assert_eq!(s.phase(), &SearchPhase::Idle);
    assert_eq!(s.retry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn namespace_switch_clears_active_search() {
    let api = Arc::new(MockApi::with_page(web_page()));
    let mut s = orchestrator(&api, cache()).with_namespace(Some("ns1"));
    s.set_term("web");
    s.submit();
    sleep(Duration::from_millis(10)).await;
    s.drain_updates();
    assert!(s.is_active());

    assert!(s.set_namespace(Some("ns2")));
    assert!(!s.is_active());
    assert_eq!(s.term(), "");
    assert!(s.results().is_empty());
    assert_eq!(s.namespace(), Some("ns2"));

    // same namespace again, or no term: nothing to clear
    assert!(!s.set_namespace(Some("ns2")));
    assert!(!s.set_namespace(None));
}

#[tokio::test(start_paused = true)]
async fn namespace_switch_while_debouncing_prevents_dispatch() {
    let api = Arc::new(MockApi::with_page(web_page()));
    let mut s = orchestrator(&api, cache()).with_namespace(Some("ns1"));
    s.set_term("web");
    sleep(Duration::from_millis(100)).await;
    s.set_namespace(Some("ns2"));
    sleep(Duration::from_secs(1)).await;
    s.drain_updates();
    assert_eq!(api.call_count(), 0);
    assert_eq!(s.phase(), &SearchPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn emptying_the_input_clears_results_immediately() {
    let api = Arc::new(MockApi::with_page(web_page()));
    let mut s = orchestrator(&api, cache());
    s.set_term("web");
    sleep(Duration::from_millis(400)).await;
    s.drain_updates();
    assert_eq!(s.results().len(), 3);

    assert_eq!(s.set_term("   "), TermChange::Cleared);
    assert!(!s.is_active());
    assert!(s.results().is_empty());
    assert_eq!(s.total(), 0);
    assert!(!s.is_pending());
}

#[tokio::test(start_paused = true)]
async fn typing_after_settle_keeps_previous_overlay_until_next_result() {
    let api = Arc::new(MockApi::new(|_, q| {
        let term = q.search.clone().unwrap_or_default();
        let rows = if term == "web" { named_rows(&["web-1", "web-2", "web-3"]) } else { named_rows(&["web-1"]) };
        let total = rows.len() as u64;
        Ok(ListPage::new(rows, total))
    }));
    let mut s = orchestrator(&api, cache());
    s.set_term("web");
    sleep(Duration::from_millis(400)).await;
    s.drain_updates();

    s.set_term("web-1");
    assert!(s.is_active());
    assert!(!s.is_searching());
    assert_eq!(s.results().len(), 3);

    sleep(Duration::from_millis(400)).await;
    s.drain_updates();
    assert_eq!(s.results().len(), 1);
    assert_eq!(s.history().entries().collect::<Vec<_>>(), vec!["web-1", "web"]);
    assert_eq!(s.suggestions(), vec!["web-1"]);
}

#[tokio::test(start_paused = true)]
async fn in_flight_is_the_only_searching_phase() {
    let api = Arc::new(MockApi::with_page(web_page()).with_latency(Duration::from_millis(200)));
    let mut s = orchestrator(&api, cache());
    s.set_term("web");
    assert!(!s.is_searching());
    sleep(Duration::from_millis(350)).await;
    s.drain_updates();
    assert!(s.is_searching());
    assert!(s.is_active());
    assert!(s.error().is_none());

    sleep(Duration::from_millis(200)).await;
    s.drain_updates();
    assert!(!s.is_searching());
    assert!(s.has_results());
}

#[tokio::test]
async fn updates_from_superseded_generation_are_ignored() {
    let api = Arc::new(MockApi::with_page(web_page()));
    let mut s = orchestrator(&api, cache());
    s.set_term("web");
    let stale = SearchUpdate::Settled {
        generation: 0,
        overlay: SearchOverlay::default(),
        cached: false,
        took: Duration::ZERO,
    };
    assert!(!s.apply(stale));
    assert!(matches!(s.phase(), SearchPhase::Debouncing { shown: None }));
    assert!(s.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn namespace_switch_cancels_a_pending_retry() {
    let api = Arc::new(MockApi::failing(BrowseError::Transport("reset".into())));
    let mut s = orchestrator(&api, cache()).with_namespace(Some("ns1"));
    s.set_term("web");
    s.submit();
    sleep(Duration::from_millis(100)).await;
    s.drain_updates();
    assert!(matches!(s.phase(), SearchPhase::Retrying { .. }));

    assert!(s.set_namespace(Some("ns2")));
    sleep(Duration::from_secs(10)).await;
    s.drain_updates();
    assert_eq!(api.call_count(), 1);
    assert_eq!(s.phase(), &SearchPhase::Idle);
    assert!(!s.is_pending());
}

#[tokio::test(start_paused = true)]
async fn retry_deadline_is_fixed_when_scheduled_not_when_drained() {
    let api = Arc::new(MockApi::failing(BrowseError::Transport("reset".into())));
    let mut s = orchestrator(&api, cache());
    s.set_term("web");
    s.submit();
    // owner drains well after the failure
    sleep(Duration::from_millis(600)).await;
    s.drain_updates();
    let first = api.calls()[0].at;
    match s.phase() {
        SearchPhase::Retrying { attempt: 1, next_at, .. } => assert_near(*next_at - first, 1000),
        other => panic!("expected first retry, got {:?}", other),
    }
}
