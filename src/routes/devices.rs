use crate::cache::{DEVICES_KEY, ROOMS_KEY, SessionCache};
use crate::config::HubConfig;
use crate::poller::PollingReconciler;
use crate::upstream::{DeviceSource, UpstreamError};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get};
use std::sync::Arc;

/// Device listing for the dashboard. Cache-first: a fresh cache entry skips
/// the upstream round trip entirely, and live state deltas are merged into
/// the cached copy by the event pipeline.
#[get("/api/v1/devices")]
pub async fn list_devices(
    cache: &State<Arc<SessionCache>>,
    source: &State<Arc<dyn DeviceSource>>,
    poller: &State<Arc<PollingReconciler>>,
    config: &State<HubConfig>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    if let Some(cached) = cache.get(DEVICES_KEY, config.cache_ttl_ms) {
        return Ok(Json(serde_json::json!({"devices": cached, "cached": true})));
    }

    let devices = source
        .list_devices(&[])
        .await
        .map_err(upstream_envelope)?;

    // Enrich with last-known state so the dashboard renders without a
    // per-device status fetch.
    let snapshots = poller.snapshots();
    let items: Vec<serde_json::Value> = devices
        .iter()
        .map(|device| {
            let state = snapshots
                .iter()
                .find(|s| s.device_id == device.device_id)
                .map(|s| serde_json::to_value(&s.state).unwrap_or(serde_json::json!({})))
                .unwrap_or(serde_json::json!({}));
            serde_json::json!({
                "deviceId": device.device_id,
                "name": device.name,
                "roomId": device.room_id,
                "capabilities": device.capabilities,
                "state": state,
            })
        })
        .collect();

    let payload = serde_json::Value::Array(items);
    cache.set(DEVICES_KEY, &payload, config.cache_ttl_ms);
    Ok(Json(serde_json::json!({"devices": payload, "cached": false})))
}

/// Room listing, passed through from the platform unchanged.
#[get("/api/v1/rooms")]
pub async fn list_rooms(
    cache: &State<Arc<SessionCache>>,
    source: &State<Arc<dyn DeviceSource>>,
    config: &State<HubConfig>,
) -> Result<Json<serde_json::Value>, (Status, Json<serde_json::Value>)> {
    if let Some(cached) = cache.get(ROOMS_KEY, config.cache_ttl_ms) {
        return Ok(Json(serde_json::json!({"rooms": cached, "cached": true})));
    }

    let rooms = source.list_rooms().await.map_err(upstream_envelope)?;
    cache.set(ROOMS_KEY, &rooms, config.cache_ttl_ms);
    Ok(Json(serde_json::json!({"rooms": rooms, "cached": false})))
}

/// Upstream failures pass through in a stable envelope.
fn upstream_envelope(e: UpstreamError) -> (Status, Json<serde_json::Value>) {
    let status = match &e {
        UpstreamError::NotConfigured => Status::ServiceUnavailable,
        UpstreamError::Status(code, _) => {
            Status::from_code(*code).unwrap_or(Status::BadGateway)
        }
        UpstreamError::Network(_) | UpstreamError::Schema(_) => Status::BadGateway,
    };
    (status, Json(serde_json::json!({"error": e.to_string()})))
}
