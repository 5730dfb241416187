use crate::models::now_ms;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Bump on any schema change that is not backward compatible; older entries
/// silently invalidate.
pub const CACHE_VERSION: u32 = 1;

pub const DEVICES_KEY: &str = "smart:devices:v1";
pub const ROOMS_KEY: &str = "smart:rooms:v1";

/// Storage quota. Mirrors the budget a browser session store would give us;
/// overflow clears everything and retries once.
const DEFAULT_QUOTA_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKeyStats {
    pub item_count: usize,
    pub age_sec: u64,
    pub ttl_sec: u64,
    pub remaining_sec: i64,
    pub valid: bool,
}

struct StoredEntry {
    /// Serialized JSON; parsed on read so a corrupt blob degrades to a miss.
    data: String,
    timestamp_ms: i64,
    ttl_ms: u64,
    version: u32,
    item_count: usize,
}

struct Inner {
    entries: HashMap<String, StoredEntry>,
    used_bytes: usize,
}

/// TTL + version keyed snapshot cache for the interactive client path.
/// Load bearing: without it every dashboard transition would hit the
/// upstream platform.
pub struct SessionCache {
    inner: Mutex<Inner>,
    quota_bytes: usize,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        SessionCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                used_bytes: 0,
            }),
            quota_bytes,
        }
    }

    /// Cached value if fresh and version-current, else a miss (and the stale
    /// entry is evicted).
    pub fn get(&self, key: &str, ttl_ms: u64) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = inner.entries.get(key)?;

        let age = now_ms().saturating_sub(entry.timestamp_ms);
        if entry.version != CACHE_VERSION || age >= ttl_ms as i64 {
            Self::evict(&mut inner, key);
            return None;
        }
        match serde_json::from_str(&entry.data) {
            Ok(value) => Some(value),
            Err(_) => {
                Self::evict(&mut inner, key);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &serde_json::Value, ttl_ms: u64) {
        let data = value.to_string();
        let item_count = match value {
            serde_json::Value::Array(items) => items.len(),
            _ => 1,
        };
        let entry = StoredEntry {
            data,
            timestamp_ms: now_ms(),
            ttl_ms,
            version: CACHE_VERSION,
            item_count,
        };

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !Self::try_store(&mut inner, self.quota_bytes, key, &entry) {
            // Quota exceeded: clear everything, retry once, then give up
            // silently.
            inner.entries.clear();
            inner.used_bytes = 0;
            Self::try_store(&mut inner, self.quota_bytes, key, &entry);
        }
    }

    pub fn clear(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict(&mut inner, key);
    }

    pub fn clear_all(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
        inner.used_bytes = 0;
    }

    /// Merge an attribute change into a cached device list in place. State
    /// mutations ride along without invalidating; structural changes must
    /// `clear` instead.
    pub fn merge_device_state(
        &self,
        key: &str,
        device_id: &str,
        event_type: &str,
        value: &serde_json::Value,
    ) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let old_data = match inner.entries.get(key) {
            Some(entry) => entry.data.clone(),
            None => return,
        };
        let Ok(mut parsed) = serde_json::from_str::<serde_json::Value>(&old_data) else {
            return;
        };
        let Some(items) = parsed.as_array_mut() else {
            return;
        };
        let mut touched = false;
        for item in items.iter_mut() {
            if item["deviceId"] == device_id {
                item["state"][event_type] = value.clone();
                touched = true;
            }
        }
        if touched {
            // timestamp untouched: a merge keeps freshness, it does not extend it
            let data = parsed.to_string();
            inner.used_bytes = inner
                .used_bytes
                .saturating_sub(old_data.len())
                .saturating_add(data.len());
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.data = data;
            }
        }
    }

    pub fn stats(&self) -> HashMap<String, CacheKeyStats> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = now_ms();
        inner
            .entries
            .iter()
            .map(|(key, entry)| {
                let age_ms = now.saturating_sub(entry.timestamp_ms).max(0) as u64;
                let remaining = entry.ttl_ms as i64 - age_ms as i64;
                (
                    key.clone(),
                    CacheKeyStats {
                        item_count: entry.item_count,
                        age_sec: age_ms / 1000,
                        ttl_sec: entry.ttl_ms / 1000,
                        remaining_sec: remaining / 1000,
                        valid: entry.version == CACHE_VERSION && remaining > 0,
                    },
                )
            })
            .collect()
    }

    fn evict(inner: &mut Inner, key: &str) {
        if let Some(old) = inner.entries.remove(key) {
            inner.used_bytes = inner.used_bytes.saturating_sub(key.len() + old.data.len());
        }
    }

    fn try_store(inner: &mut Inner, quota: usize, key: &str, entry: &StoredEntry) -> bool {
        let size = key.len() + entry.data.len();
        let existing = inner
            .entries
            .get(key)
            .map(|e| key.len() + e.data.len())
            .unwrap_or(0);
        if inner.used_bytes - existing + size > quota {
            return false;
        }
        Self::evict(inner, key);
        inner.used_bytes += size;
        inner.entries.insert(
            key.to_string(),
            StoredEntry {
                data: entry.data.clone(),
                timestamp_ms: entry.timestamp_ms,
                ttl_ms: entry.ttl_ms,
                version: entry.version,
                item_count: entry.item_count,
            },
        );
        true
    }

    #[cfg(test)]
    fn corrupt(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.data = "{not json".to_string();
        }
    }

    #[cfg(test)]
    fn downgrade_version(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.version = CACHE_VERSION - 1;
        }
    }
}
