use crate::models::DeviceSummary;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug)]
pub enum UpstreamError {
    /// No token configured; nothing to talk to.
    NotConfigured,
    /// Network-level failure (connect, timeout, body read).
    Network(String),
    /// Non-2xx response from the platform.
    Status(u16, String),
    /// Response arrived but did not have the expected shape.
    Schema(String),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::NotConfigured => write!(f, "upstream token not configured"),
            UpstreamError::Network(e) => write!(f, "upstream network error: {e}"),
            UpstreamError::Status(code, body) => write!(f, "upstream HTTP {code}: {body}"),
            UpstreamError::Schema(e) => write!(f, "upstream schema error: {e}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl UpstreamError {
    /// Transient failures are retried (poller backoff); permanent ones mark
    /// the device unhealthy without retry.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Network(_) => true,
            UpstreamError::Status(code, _) => *code >= 500 || *code == 429,
            UpstreamError::NotConfigured | UpstreamError::Schema(_) => false,
        }
    }
}

/// Input edge to the device platform. The real REST client lives behind this
/// so the reconciler and the thin list endpoints never see HTTP details.
#[rocket::async_trait]
pub trait DeviceSource: Send + Sync {
    async fn list_devices(
        &self,
        capabilities: &[String],
    ) -> Result<Vec<DeviceSummary>, UpstreamError>;

    /// Current attribute values for one device, keyed `<capability>.<attribute>`.
    async fn device_status(
        &self,
        device_id: &str,
    ) -> Result<HashMap<String, serde_json::Value>, UpstreamError>;

    /// Raw room list, passed through unchanged to the dashboard.
    async fn list_rooms(&self) -> Result<serde_json::Value, UpstreamError>;
}

/// Thin authenticated client for the SmartThings-style REST surface.
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlatformClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        PlatformClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, UpstreamError> {
        if self.token.is_empty() {
            return Err(UpstreamError::NotConfigured);
        }
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status(status.as_u16(), body));
        }
        response
            .json()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))
    }
}

#[rocket::async_trait]
impl DeviceSource for PlatformClient {
    async fn list_devices(
        &self,
        capabilities: &[String],
    ) -> Result<Vec<DeviceSummary>, UpstreamError> {
        let query: String = capabilities
            .iter()
            .map(|c| format!("capability={c}"))
            .collect::<Vec<_>>()
            .join("&");
        let path = if query.is_empty() {
            "/devices".to_string()
        } else {
            format!("/devices?{query}")
        };
        let payload = self.get_json(&path).await?;
        let items = payload["items"]
            .as_array()
            .ok_or_else(|| UpstreamError::Schema("device list has no items array".to_string()))?;

        Ok(items
            .iter()
            .filter_map(|item| {
                let device_id = item["deviceId"].as_str()?;
                let name = item["label"]
                    .as_str()
                    .or_else(|| item["name"].as_str())
                    .unwrap_or(device_id);
                let capabilities = item["components"]
                    .as_array()
                    .map(|components| {
                        components
                            .iter()
                            .flat_map(|c| c["capabilities"].as_array().cloned().unwrap_or_default())
                            .filter_map(|c| c["id"].as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(DeviceSummary {
                    device_id: device_id.to_string(),
                    name: name.to_string(),
                    room_id: item["roomId"].as_str().map(String::from),
                    capabilities,
                })
            })
            .collect())
    }

    async fn device_status(
        &self,
        device_id: &str,
    ) -> Result<HashMap<String, serde_json::Value>, UpstreamError> {
        let payload = self.get_json(&format!("/devices/{device_id}/status")).await?;
        let components = payload["components"]
            .as_object()
            .ok_or_else(|| UpstreamError::Schema("status has no components".to_string()))?;

        let mut state = HashMap::new();
        for component in components.values() {
            let Some(caps) = component.as_object() else {
                continue;
            };
            for (capability, attributes) in caps {
                let Some(attributes) = attributes.as_object() else {
                    continue;
                };
                for (attribute, body) in attributes {
                    if let Some(value) = body.get("value") {
                        state.insert(format!("{capability}.{attribute}"), value.clone());
                    }
                }
            }
        }
        Ok(state)
    }

    async fn list_rooms(&self) -> Result<serde_json::Value, UpstreamError> {
        self.get_json("/rooms").await
    }
}
