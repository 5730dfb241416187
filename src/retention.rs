use crate::event_log::EventLogger;
use crate::models::now_ms;
use crate::store::EventStore;
use serde::Serialize;
use std::sync::Arc;

/// Interval between retention sweeps.
const SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Result of one retention sweep across the store and the archive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionResult {
    pub events_removed: usize,
    pub archive_files_removed: usize,
}

/// Spawns a background task that evicts store rows past the retention
/// horizon and unlinks archive files past theirs, once a day.
pub fn spawn_retention_task(
    store: Arc<EventStore>,
    logger: Arc<EventLogger>,
    store_retention_days: i64,
    log_retention_days: i64,
) {
    tokio::spawn(async move {
        // Initial delay: let the server start up before the first sweep
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        loop {
            run_retention(&store, &logger, store_retention_days, log_retention_days);
            tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
        }
    });
}

/// Execute one sweep. Returns structured results for the admin endpoint.
pub fn run_retention(
    store: &EventStore,
    logger: &EventLogger,
    store_retention_days: i64,
    log_retention_days: i64,
) -> RetentionResult {
    let cutoff = now_ms() - store_retention_days * 24 * 60 * 60 * 1000;
    let events_removed = match store.evict_older_than(cutoff) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("⚠️ Retention: store eviction failed: {e}");
            0
        }
    };
    let archive_files_removed = logger.clean_old_files(log_retention_days);

    if events_removed > 0 {
        eprintln!("🧹 Retention: evicted {events_removed} events past {store_retention_days} days");
    }

    RetentionResult {
        events_removed,
        archive_files_removed,
    }
}
