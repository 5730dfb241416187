use crate::models::{Event, EventSource, EventType, now_ms};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify an HMAC-SHA256 signature header against the raw request body.
/// Accepts hex or base64 digests, with or without a `sha256=` prefix; the
/// comparison itself is constant-time. An empty secret never verifies.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let sig = header.trim();
    let sig = sig.strip_prefix("sha256=").unwrap_or(sig);
    let decoded = hex::decode(sig)
        .ok()
        .or_else(|| base64::engine::general_purpose::STANDARD.decode(sig).ok());
    let Some(expected) = decoded else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the outbound form of a signature (`sha256=<hex>`). Used by tests
/// and by operators wiring new providers.
pub fn sign(secret: &str, body: &[u8]) -> String {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(body);
            format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
        }
        Err(_) => String::new(),
    }
}

/// Webhook payload category, as declared by the upstream.
#[derive(Debug)]
pub enum Lifecycle {
    /// Handshake; echo the challenge back synchronously.
    Ping { challenge: String },
    /// Registration confirmation; fetch the URL out of band and ack.
    Confirmation { confirmation_url: String },
    /// One or more device events.
    Event { events: Vec<Event> },
    /// Recognized envelope, unrecognized lifecycle value.
    Unknown(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum PayloadError {
    InvalidJson,
    MissingLifecycle,
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::InvalidJson => write!(f, "body is not valid JSON"),
            PayloadError::MissingLifecycle => write!(f, "payload has no lifecycle field"),
        }
    }
}

/// Parse a verified webhook body into its lifecycle. Events that fail to
/// extract are skipped (counted by the caller's warn log), never fatal.
pub fn parse_payload(body: &str) -> Result<Lifecycle, PayloadError> {
    let payload: serde_json::Value =
        serde_json::from_str(body).map_err(|_| PayloadError::InvalidJson)?;
    let lifecycle = payload
        .get("lifecycle")
        .and_then(|v| v.as_str())
        .ok_or(PayloadError::MissingLifecycle)?;

    match lifecycle.to_uppercase().as_str() {
        "PING" => {
            let challenge = payload["pingData"]["challenge"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            Ok(Lifecycle::Ping { challenge })
        }
        "CONFIRMATION" => {
            let confirmation_url = payload["confirmationData"]["confirmationUrl"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            Ok(Lifecycle::Confirmation { confirmation_url })
        }
        "EVENT" => {
            let entries = payload["eventData"]["events"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            let events = entries.iter().filter_map(extract_event).collect();
            Ok(Lifecycle::Event { events })
        }
        other => Ok(Lifecycle::Unknown(other.to_string())),
    }
}

/// Build a canonical Event from one provider event entry. Providers differ
/// on nesting, so fields are read from the entry itself with a fallback into
/// a `deviceEvent` sub-object.
fn extract_event(entry: &serde_json::Value) -> Option<Event> {
    let body = entry.get("deviceEvent").unwrap_or(entry);

    let capability = body.get("capability").and_then(|v| v.as_str())?;
    let attribute = body.get("attribute").and_then(|v| v.as_str())?;
    let device_id = body
        .get("deviceId")
        .and_then(|v| v.as_str())
        .map(String::from);

    // The id is stamped before persistence: the upstream's own when present,
    // a local UUID otherwise.
    let id = body
        .get("eventId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let timestamp = entry
        .get("eventTime")
        .or_else(|| body.get("eventTime"))
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.timestamp_millis())
        .unwrap_or_else(now_ms);

    let mut metadata = serde_json::json!({
        "stateChange": body.get("stateChange").and_then(|v| v.as_bool()).unwrap_or(true),
        "channel": "webhook",
    });
    if let Some(component) = body.get("componentId").and_then(|v| v.as_str()) {
        metadata["componentId"] = serde_json::json!(component);
    }

    Some(Event {
        id,
        kind: EventType::DeviceEvent,
        source: EventSource::Webhook,
        device_id,
        device_name: body
            .get("deviceName")
            .or_else(|| body.get("deviceLabel"))
            .and_then(|v| v.as_str())
            .map(String::from),
        location_id: body
            .get("locationId")
            .and_then(|v| v.as_str())
            .map(String::from),
        event_type: format!("{capability}.{attribute}"),
        value: body.get("value").cloned().unwrap_or(serde_json::Value::Null),
        timestamp,
        metadata,
    })
}
