use crate::broadcast::SseBroadcaster;
use crate::cache::SessionCache;
use crate::config::HubConfig;
use crate::event_log::EventLogger;
use crate::models::now_ms;
use crate::poller::{PollerStatus, PollingReconciler};
use crate::queue::{DeadLetter, MessageQueue};
use crate::retention;
use crate::retention::RetentionResult;
use crate::store::EventStore;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use std::sync::Arc;

#[get("/api/v1/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Operational rollup across the pipeline.
#[get("/api/v1/stats")]
pub fn stats(
    store: &State<Arc<EventStore>>,
    queue: &State<Arc<MessageQueue>>,
    broadcaster: &State<Arc<SseBroadcaster>>,
    poller: &State<Arc<PollingReconciler>>,
    cache: &State<Arc<SessionCache>>,
) -> Json<serde_json::Value> {
    let total_events = store.total_count().unwrap_or(0);
    let last_day = store.count_since(now_ms() - 24 * 60 * 60 * 1000).unwrap_or(0);

    Json(serde_json::json!({
        "store": {
            "totalEvents": total_events,
            "last24h": last_day,
        },
        "queue": queue.stats(),
        "sse": broadcaster.stats(),
        "poller": poller.status(),
        "cache": cache.stats(),
    }))
}

// --- Poller control ---

#[get("/api/v1/poller")]
pub fn poller_status(poller: &State<Arc<PollingReconciler>>) -> Json<PollerStatus> {
    Json(poller.status())
}

#[post("/api/v1/poller/start")]
pub fn poller_start(poller: &State<Arc<PollingReconciler>>) -> Json<PollerStatus> {
    poller.start();
    Json(poller.status())
}

#[post("/api/v1/poller/stop")]
pub fn poller_stop(poller: &State<Arc<PollingReconciler>>) -> Json<PollerStatus> {
    poller.stop();
    Json(poller.status())
}

// --- Diagnostics & maintenance ---

/// Items that exhausted their retry budget, newest last.
#[get("/api/v1/queue/dead-letters")]
pub fn dead_letters(queue: &State<Arc<MessageQueue>>) -> Json<Vec<DeadLetter>> {
    Json(queue.dead_letters())
}

/// Run the retention sweep immediately instead of waiting for the daily task.
#[post("/api/v1/admin/retention")]
pub fn run_retention_now(
    store: &State<Arc<EventStore>>,
    logger: &State<Arc<EventLogger>>,
    config: &State<HubConfig>,
) -> Json<RetentionResult> {
    Json(retention::run_retention(
        store,
        logger,
        config.store_retention_days,
        config.log_retention_days,
    ))
}
