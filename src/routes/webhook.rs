use crate::broadcast::SseBroadcaster;
use crate::config::HubConfig;
use crate::models::Event;
use crate::queue::{MessageQueue, QueueError};
use crate::store::{EventStore, StoreError};
use crate::webhook::{Lifecycle, PayloadError, parse_payload, verify_signature};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, post};
use std::sync::Arc;

use super::{ClientIp, SignatureHeader};

/// Inbound webhook from a device platform. Authenticates, acks fast, and
/// hands all real work to the queue; the response never depends on
/// downstream success.
#[post("/webhook/<platform>", data = "<body>")]
pub async fn receive_webhook(
    config: &State<HubConfig>,
    store: &State<Arc<EventStore>>,
    queue: &State<Arc<MessageQueue>>,
    broadcaster: &State<Arc<SseBroadcaster>>,
    sig: SignatureHeader,
    ip: ClientIp,
    platform: &str,
    body: String,
) -> (Status, Json<serde_json::Value>) {
    let request_id = uuid::Uuid::new_v4()
        .to_string()
        .split('-')
        .next()
        .unwrap_or("req")
        .to_string();

    let Some(signature) = sig.0 else {
        eprintln!("🚫 [{request_id}] Webhook from {} rejected: no signature header", ip.0);
        return (
            Status::Unauthorized,
            Json(serde_json::json!({"error": "Missing signature"})),
        );
    };
    if !verify_signature(&config.webhook_shared_secret, body.as_bytes(), &signature) {
        eprintln!("🚫 [{request_id}] Webhook from {} rejected: signature mismatch", ip.0);
        return (
            Status::Unauthorized,
            Json(serde_json::json!({"error": "Invalid signature"})),
        );
    }

    let lifecycle = match parse_payload(&body) {
        Ok(lifecycle) => lifecycle,
        Err(PayloadError::InvalidJson) => {
            return (
                Status::BadRequest,
                Json(serde_json::json!({"error": "Body is not valid JSON"})),
            );
        }
        Err(PayloadError::MissingLifecycle) => {
            return (
                Status::BadRequest,
                Json(serde_json::json!({"error": "Missing lifecycle"})),
            );
        }
    };

    match lifecycle {
        Lifecycle::Ping { challenge } => (
            Status::Ok,
            Json(serde_json::json!({"pingData": {"challenge": challenge}})),
        ),
        Lifecycle::Confirmation { confirmation_url } => {
            confirm_registration(&request_id, confirmation_url);
            (Status::Ok, Json(serde_json::json!({"ok": true})))
        }
        Lifecycle::Event { events } => {
            let received = events.len();
            for event in events {
                ingest_event(&request_id, store, queue, broadcaster, event);
            }
            (
                Status::Ok,
                Json(serde_json::json!({"ok": true, "received": received})),
            )
        }
        Lifecycle::Unknown(name) => {
            eprintln!("⚠️ [{request_id}] Webhook for {platform}: unknown lifecycle {name:?}, ignoring");
            (Status::Ok, Json(serde_json::json!({"ok": true})))
        }
    }
}

/// Persist and enqueue one verified event. Failures stay off the ack path.
fn ingest_event(
    request_id: &str,
    store: &EventStore,
    queue: &MessageQueue,
    broadcaster: &SseBroadcaster,
    event: Event,
) {
    match store.save(&event) {
        Ok(()) => {}
        Err(StoreError::DuplicateId) => {
            crate::debug_log(&format!("[{request_id}] duplicate event id {}, ignoring", event.id));
        }
        Err(e) => {
            // surfaced only; the queue handler will retry the persist
            eprintln!("⚠️ [{request_id}] Event store save failed for {}: {e}", event.id);
        }
    }

    // Fan-out to live clients stays valuable even for duplicates.
    match queue.enqueue(event.clone()) {
        Ok(()) => {}
        Err(QueueError::Full) => {
            eprintln!("❌ [{request_id}] Queue full, dropping event {}", event.id);
            let alert = Event::system(
                "queue.saturated",
                serde_json::json!({
                    "severity": "critical",
                    "droppedEventId": event.id,
                }),
            );
            crate::record_system_event(store, broadcaster, alert);
        }
        Err(e) => {
            eprintln!("⚠️ [{request_id}] Enqueue failed for {}: {e}", event.id);
        }
    }
}

/// Fire-and-forget fetch of the registration confirmation URL. The 200 to
/// the provider does not wait for this.
fn confirm_registration(request_id: &str, url: String) {
    if url.is_empty() {
        eprintln!("⚠️ [{request_id}] CONFIRMATION lifecycle without a confirmationUrl");
        return;
    }
    let request_id = request_id.to_string();
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                eprintln!("⚠️ [{request_id}] Confirmation client build failed: {e}");
                return;
            }
        };
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                println!("🔗 [{request_id}] Webhook registration confirmed");
            }
            Ok(resp) => {
                eprintln!("⚠️ [{request_id}] Confirmation fetch returned HTTP {}", resp.status());
            }
            Err(e) => {
                eprintln!("⚠️ [{request_id}] Confirmation fetch failed: {e}");
            }
        }
    });
}
