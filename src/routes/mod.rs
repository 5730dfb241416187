// Route module decomposition — each surface in its own file.
// Shared request guards and catchers live here; route functions in submodules.

mod devices;
mod events;
mod stream;
mod system;
mod webhook;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use devices::{list_devices, list_rooms};
pub use events::{event_stats, list_events};
pub use stream::event_stream;
pub use system::{
    dead_letters, health, poller_start, poller_status, poller_stop, run_retention_now, stats,
};
pub use webhook::receive_webhook;

// --- Shared request guards ---

use rocket::request::{FromRequest, Outcome, Request};

/// Client address for webhook audit logs, preferring X-Forwarded-For.
pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

/// Raw webhook signature header, if any. Providers disagree on the header
/// name, so the common ones are all accepted.
pub struct SignatureHeader(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SignatureHeader {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        for name in ["X-Hub-Signature-256", "X-Signature", "X-Webhook-Signature"] {
            if let Some(value) = req.headers().get_one(name) {
                return Outcome::Success(SignatureHeader(Some(value.to_string())));
            }
        }
        Outcome::Success(SignatureHeader(None))
    }
}

// --- Catchers ---

use rocket::serde::json::Json;

#[rocket::catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "Not found"}))
}
