#![forbid(unsafe_code)]

use std::sync::Arc;

use kbrowse_core::{ListPage, Row};
use tokio::time::Instant;

/// Rows and total currently offered by the search overlay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOverlay {
    pub rows: Arc<Vec<Row>>,
    pub total: u64,
}

impl SearchOverlay {
    pub fn rows(&self) -> &[Row] {
        self.rows.as_slice()
    }
}

impl From<ListPage> for SearchOverlay {
    fn from(page: ListPage) -> Self {
        Self { rows: Arc::new(page.rows), total: page.total }
    }
}

/// Search lifecycle for the current input.
///
/// `shown` is the overlay left on screen by an earlier dispatch of the same
/// input session; `None` means nothing has been dispatched yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SearchPhase {
    #[default]
    Idle,
    Debouncing { shown: Option<SearchOverlay> },
    InFlight { attempt: u32, shown: Option<SearchOverlay> },
    Settled(SearchOverlay),
    Retrying { attempt: u32, next_at: Instant, error: String, shown: Option<SearchOverlay> },
    Failed { attempts: u32, error: String },
}

impl SearchPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SearchPhase::Idle => "idle",
            SearchPhase::Debouncing { .. } => "debouncing",
            SearchPhase::InFlight { .. } => "in_flight",
            SearchPhase::Settled(_) => "settled",
            SearchPhase::Retrying { .. } => "retrying",
            SearchPhase::Failed { .. } => "failed",
        }
    }

    /// A request was dispatched for the current input session.
    pub fn has_dispatched(&self) -> bool {
        match self {
            SearchPhase::Idle => false,
            SearchPhase::Debouncing { shown } => shown.is_some(),
            _ => true,
        }
    }

    pub fn overlay(&self) -> Option<&SearchOverlay> {
        match self {
            SearchPhase::Settled(o) => Some(o),
            SearchPhase::Debouncing { shown }
            | SearchPhase::InFlight { shown, .. }
            | SearchPhase::Retrying { shown, .. } => shown.as_ref(),
            SearchPhase::Idle | SearchPhase::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SearchPhase::Retrying { error, .. } | SearchPhase::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn retry_count(&self) -> u32 {
        match self {
            SearchPhase::InFlight { attempt, .. } | SearchPhase::Retrying { attempt, .. } => *attempt,
            SearchPhase::Failed { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// What stays on screen when the phase moves on within the same session.
    pub(crate) fn carry(&self) -> Option<SearchOverlay> {
        if self.has_dispatched() {
            Some(self.overlay().cloned().unwrap_or_default())
        } else {
            None
        }
    }
}
