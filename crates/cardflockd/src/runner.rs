use std::path::Path;

use anyhow::{Context, Result};
use cardflock_config::DetectionParams;
use cardflock_core::WindowMeta;
use cardflock_detect::{CancelFlag, MultiCardDetector};
use cardflock_store::{GroupSink, SqliteStore, VisitSource};
use chrono::{NaiveDate, Utc};
use tracing::info;

#[derive(Debug, Clone)]
pub struct WindowRequest {
    pub begin: NaiveDate,
    pub end: NaiveDate,
    pub admdvs: Option<String>,
    pub model_no: String,
}

/// Fetch, detect and persist one window. Each call opens its own database
/// connection so windows can run on separate worker threads. Returns the
/// number of persisted rows; zero means nothing survived the pipeline.
pub fn run_window(
    db_path: &Path,
    params: &DetectionParams,
    request: &WindowRequest,
    cancel: &CancelFlag,
) -> Result<u64> {
    let store = SqliteStore::open(db_path).context("open database")?;
    let visits = store
        .fetch_visits(request.begin, request.end, request.admdvs.as_deref())
        .context("fetch visits")?;
    info!(
        begin = %request.begin,
        end = %request.end,
        visits = visits.len(),
        "window loaded"
    );

    let detector = MultiCardDetector::new(params.clone());
    let Some(rows) = detector.run(&visits, cancel)? else {
        return Ok(0);
    };

    let meta = WindowMeta {
        model_no: request.model_no.clone(),
        begin_date: request.begin,
        end_date: request.end,
        admdvs: request.admdvs.clone(),
        run_time: Utc::now().naive_utc(),
    };
    store.persist_groups(&meta, &rows).context("persist groups")?;
    Ok(rows.len() as u64)
}
