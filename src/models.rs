use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// --- Events ---

/// Category of an event flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DeviceEvent,
    UserCommand,
    AutomationTrigger,
    RuleExecution,
    SystemEvent,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::DeviceEvent,
        EventType::UserCommand,
        EventType::AutomationTrigger,
        EventType::RuleExecution,
        EventType::SystemEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DeviceEvent => "device_event",
            EventType::UserCommand => "user_command",
            EventType::AutomationTrigger => "automation_trigger",
            EventType::RuleExecution => "rule_execution",
            EventType::SystemEvent => "system_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

/// Channel an event arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Webhook,
    Polling,
    Mcp,
    Voice,
    Internal,
}

impl EventSource {
    pub const ALL: [EventSource; 5] = [
        EventSource::Webhook,
        EventSource::Polling,
        EventSource::Mcp,
        EventSource::Voice,
        EventSource::Internal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Webhook => "webhook",
            EventSource::Polling => "polling",
            EventSource::Mcp => "mcp",
            EventSource::Voice => "voice",
            EventSource::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

/// Canonical event record. `value` and `metadata` stay opaque JSON; the
/// capability normalization that gives them meaning lives outside this server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub source: EventSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    /// `<capability>.<attribute>`, e.g. `switch.switch`.
    pub event_type: String,
    pub value: serde_json::Value,
    /// When the change is believed to have occurred upstream (epoch ms),
    /// not when we received it.
    pub timestamp: i64,
    pub metadata: serde_json::Value,
}

impl Event {
    /// Internal system event (queue saturation, dead letters, lifecycle notices).
    pub fn system(event_type: &str, value: serde_json::Value) -> Self {
        Event {
            id: uuid::Uuid::new_v4().to_string(),
            kind: EventType::SystemEvent,
            source: EventSource::Internal,
            device_id: None,
            device_name: None,
            location_id: None,
            event_type: event_type.to_string(),
            value,
            timestamp: now_ms(),
            metadata: serde_json::json!({}),
        }
    }

    /// Split `event_type` into (capability, attribute) for the archive line.
    pub fn capability_attribute(&self) -> (&str, &str) {
        match self.event_type.split_once('.') {
            Some((c, a)) => (c, a),
            None => (self.event_type.as_str(), ""),
        }
    }
}

/// Filters for querying the event store.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub types: Vec<EventType>,
    pub sources: Vec<EventSource>,
    pub device_id: Option<String>,
    /// Inclusive lower bound, epoch ms.
    pub since: Option<i64>,
    /// Exclusive upper bound, epoch ms.
    pub until: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<Event>,
    pub count: usize,
}

// --- Devices ---

/// Device listing entry from the upstream platform.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Last-known state of a device. The polling reconciler exclusively owns the
/// in-memory snapshot table; devices that disappear are marked offline, never
/// deleted.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub platform: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub capabilities: Vec<String>,
    pub online: bool,
    /// Attribute map keyed `<capability>.<attribute>`.
    pub state: HashMap<String, serde_json::Value>,
    pub updated_at: i64,
}
