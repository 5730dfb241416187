use std::env;

/// Server configuration. All values read from environment variables with
/// sensible defaults.
///
/// Environment variables:
/// - `WEBHOOK_SHARED_SECRET` — HMAC key for inbound webhook verification.
///   Empty disables the webhook endpoint (requests get 401).
/// - `EVENT_STORE_PATH` — SQLite event store path (default: ./data/events.db)
/// - `EVENT_STORE_RETENTION_DAYS` — store eviction horizon (default: 30)
/// - `EVENT_LOG_DIR` — JSONL archive directory (default: ./logs/events)
/// - `EVENT_LOG_RETENTION_DAYS` — archive file age horizon (default: 90)
/// - `EVENT_LOG_MAX_SIZE` — size-rotation ceiling, k/m/g suffix (default: 100m)
/// - `EVENT_LOG_COMPRESS` — gzip rotated files (default: true)
/// - `POLL_INTERVAL_MS` — reconciler tick interval (default: 5000)
/// - `POLL_CAPABILITIES` — comma-separated watched capabilities
/// - `AUTO_START_POLLING` — start the reconciler at liftoff (default: true)
/// - `QUEUE_CONCURRENCY` — queue worker count (default: 5)
/// - `QUEUE_MAX_DEPTH` — queue backlog ceiling (default: 10000)
/// - `QUEUE_MAX_ATTEMPTS` — handler attempts before dead-letter (default: 3)
/// - `SSE_HEARTBEAT_MS` — stream heartbeat interval (default: 30000)
/// - `CACHE_TTL_MS` — snapshot cache TTL (default: 300000)
/// - `UPSTREAM_BASE_URL` — device platform REST base (default: SmartThings v1)
/// - `UPSTREAM_TOKEN` — bearer token for the device platform
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub webhook_shared_secret: String,
    pub store_path: String,
    pub store_retention_days: i64,
    pub log_dir: String,
    pub log_retention_days: i64,
    pub log_max_bytes: u64,
    pub log_compress: bool,
    pub poll_interval_ms: u64,
    pub poll_capabilities: Vec<String>,
    pub auto_start_polling: bool,
    pub queue_concurrency: usize,
    pub queue_max_depth: usize,
    pub queue_max_attempts: u32,
    pub sse_heartbeat_ms: u64,
    pub cache_ttl_ms: u64,
    pub upstream_base_url: String,
    pub upstream_token: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            webhook_shared_secret: String::new(),
            store_path: "data/events.db".to_string(),
            store_retention_days: 30,
            log_dir: "logs/events".to_string(),
            log_retention_days: 90,
            log_max_bytes: 100 * 1024 * 1024,
            log_compress: true,
            poll_interval_ms: 5000,
            poll_capabilities: vec![
                "switch".to_string(),
                "motionSensor".to_string(),
                "contactSensor".to_string(),
                "temperatureMeasurement".to_string(),
            ],
            auto_start_polling: true,
            queue_concurrency: 5,
            queue_max_depth: 10_000,
            queue_max_attempts: 3,
            sse_heartbeat_ms: 30_000,
            cache_ttl_ms: 300_000,
            upstream_base_url: "https://api.smartthings.com/v1".to_string(),
            upstream_token: String::new(),
        }
    }
}

impl HubConfig {
    /// Create a HubConfig from environment variables, with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("WEBHOOK_SHARED_SECRET") {
            config.webhook_shared_secret = val;
        }
        if let Ok(val) = env::var("EVENT_STORE_PATH")
            && !val.is_empty()
        {
            config.store_path = val;
        }
        if let Ok(val) = env::var("EVENT_STORE_RETENTION_DAYS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.store_retention_days = n;
        }
        if let Ok(val) = env::var("EVENT_LOG_DIR")
            && !val.is_empty()
        {
            config.log_dir = val;
        }
        if let Ok(val) = env::var("EVENT_LOG_RETENTION_DAYS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.log_retention_days = n;
        }
        if let Ok(val) = env::var("EVENT_LOG_MAX_SIZE")
            && let Some(n) = parse_size(&val)
        {
            config.log_max_bytes = n;
        }
        if let Ok(val) = env::var("EVENT_LOG_COMPRESS") {
            config.log_compress = parse_bool(&val, true);
        }
        if let Ok(val) = env::var("POLL_INTERVAL_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.poll_interval_ms = n.max(250);
        }
        if let Ok(val) = env::var("POLL_CAPABILITIES")
            && !val.trim().is_empty()
        {
            config.poll_capabilities = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("AUTO_START_POLLING") {
            config.auto_start_polling = parse_bool(&val, true);
        }
        if let Ok(val) = env::var("QUEUE_CONCURRENCY")
            && let Ok(n) = val.parse::<usize>()
        {
            config.queue_concurrency = n.max(1);
        }
        if let Ok(val) = env::var("QUEUE_MAX_DEPTH")
            && let Ok(n) = val.parse::<usize>()
        {
            config.queue_max_depth = n;
        }
        if let Ok(val) = env::var("QUEUE_MAX_ATTEMPTS")
            && let Ok(n) = val.parse::<u32>()
        {
            config.queue_max_attempts = n.max(1);
        }
        if let Ok(val) = env::var("SSE_HEARTBEAT_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.sse_heartbeat_ms = n.max(1000);
        }
        if let Ok(val) = env::var("CACHE_TTL_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.cache_ttl_ms = n;
        }
        if let Ok(val) = env::var("UPSTREAM_BASE_URL")
            && !val.is_empty()
        {
            config.upstream_base_url = val.trim_end_matches('/').to_string();
        }
        if let Ok(val) = env::var("UPSTREAM_TOKEN") {
            config.upstream_token = val;
        }

        config
    }
}

/// Parse a size string like `100m`, `512k`, `1g`, or plain bytes.
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }
    let (digits, mult) = if let Some(d) = s.strip_suffix('k') {
        (d, 1024u64)
    } else if let Some(d) = s.strip_suffix('m') {
        (d, 1024 * 1024)
    } else if let Some(d) = s.strip_suffix('g') {
        (d, 1024 * 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * mult)
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
