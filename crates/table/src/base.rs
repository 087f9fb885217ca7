#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use kbrowse_api::ListApi;
use kbrowse_core::{BrowseError, ListPage, ListQuery};
use metrics::histogram;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of one base dataset fetch, tagged with the fetch generation.
#[derive(Debug, Clone)]
pub enum BaseUpdate {
    Loaded { generation: u64, page: ListPage, took: Duration },
    Failed { generation: u64, error: BrowseError },
}

impl BaseUpdate {
    pub fn generation(&self) -> u64 {
        match self {
            BaseUpdate::Loaded { generation, .. } | BaseUpdate::Failed { generation, .. } => *generation,
        }
    }
}

pub(crate) fn spawn_base_fetch(
    api: Arc<dyn ListApi>,
    endpoint: String,
    query: ListQuery,
    generation: u64,
    tx: mpsc::UnboundedSender<BaseUpdate>,
) {
    // Not aborted when superseded; the owner drops the stale result instead.
    tokio::spawn(async move {
        let t0 = Instant::now();
        debug!(endpoint = %endpoint, generation, offset = ?query.offset, limit = query.limit, "table: base fetch");
        let update = match api.list(&endpoint, &query).await {
            Ok(page) => {
                let took = t0.elapsed();
                histogram!("kbrowse_table_fetch_ms", took.as_secs_f64() * 1000.0);
                BaseUpdate::Loaded { generation, page, took }
            }
            Err(error) => BaseUpdate::Failed { generation, error },
        };
        let _ = tx.send(update);
    });
}
