use crate::models::{EventQuery, EventSource, EventType, EventsResponse, now_ms};
use crate::store::EventStore;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get};
use std::sync::Arc;

/// Query the event store, newest first. `types` and `sources` are
/// comma-separated lists; `since`/`until` are epoch milliseconds.
#[get("/api/v1/events?<types>&<sources>&<device_id>&<since>&<until>&<limit>&<offset>")]
#[allow(clippy::too_many_arguments)]
pub fn list_events(
    store: &State<Arc<EventStore>>,
    types: Option<&str>,
    sources: Option<&str>,
    device_id: Option<&str>,
    since: Option<i64>,
    until: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Json<EventsResponse>, (Status, Json<serde_json::Value>)> {
    let mut query = EventQuery {
        device_id: device_id.map(String::from),
        since,
        until,
        limit: limit.unwrap_or(0),
        offset: offset.unwrap_or(0),
        ..Default::default()
    };

    for name in split_list(types) {
        match EventType::parse(&name) {
            Some(t) => query.types.push(t),
            None => {
                return Err((
                    Status::BadRequest,
                    Json(serde_json::json!({"error": format!("Unknown event type: {name}")})),
                ));
            }
        }
    }
    for name in split_list(sources) {
        match EventSource::parse(&name) {
            Some(s) => query.sources.push(s),
            None => {
                return Err((
                    Status::BadRequest,
                    Json(serde_json::json!({"error": format!("Unknown event source: {name}")})),
                ));
            }
        }
    }

    let events = store.query(&query).map_err(|e| {
        (
            Status::InternalServerError,
            Json(serde_json::json!({"error": e.to_string()})),
        )
    })?;
    let count = events.len();
    Ok(Json(EventsResponse { events, count }))
}

/// Rolling counters over the store.
#[get("/api/v1/events/stats")]
pub fn event_stats(
    store: &State<Arc<EventStore>>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    let now = now_ms();
    let total = store.total_count();
    let last_hour = store.count_since(now - 60 * 60 * 1000);
    let last_day = store.count_since(now - 24 * 60 * 60 * 1000);
    match (total, last_hour, last_day) {
        (Ok(total), Ok(last_hour), Ok(last_day)) => Ok(Json(serde_json::json!({
            "total": total,
            "lastHour": last_hour,
            "last24h": last_day,
        }))),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Err((
            Status::InternalServerError,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
