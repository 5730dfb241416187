use crate::models::{DeviceSnapshot, DeviceSummary, Event, EventSource, EventType, now_ms};
use crate::retry::POLL_BACKOFF_CAP;
use crate::upstream::DeviceSource;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Listener invoked for each synthetic event. Returning false aborts the
/// remainder of the tick's emissions (queue at ceiling).
pub type ChangeListener = Arc<dyn Fn(Event) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub capabilities: Vec<String>,
    /// Concurrent per-device status fetches.
    pub device_concurrency: usize,
    /// Consecutive failures before a device is polled on backoff.
    pub unhealthy_after: u32,
    pub backoff_cap: Duration,
    pub platform: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            interval: Duration::from_secs(5),
            capabilities: Vec::new(),
            device_concurrency: 5,
            unhealthy_after: 3,
            backoff_cap: POLL_BACKOFF_CAP,
            platform: "smartthings".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatus {
    pub running: bool,
    pub last_run_at: Option<String>,
    pub tracked_devices: usize,
}

#[derive(Default)]
struct FailureState {
    consecutive: u32,
    next_allowed_ms: i64,
}

/// Periodic sweep of device state. Diffs each observed attribute against the
/// last-known snapshot and emits a synthetic event per transition, so changes
/// the webhook channel missed still reach the pipeline exactly once.
pub struct PollingReconciler {
    inner: Arc<Inner>,
}

struct Inner {
    config: PollerConfig,
    source: Arc<dyn DeviceSource>,
    snapshots: Mutex<HashMap<String, DeviceSnapshot>>,
    failures: Mutex<HashMap<String, FailureState>>,
    listener: Mutex<Option<ChangeListener>>,
    running: AtomicBool,
    last_run_ms: AtomicI64,
}

impl PollingReconciler {
    pub fn new(source: Arc<dyn DeviceSource>, config: PollerConfig) -> Self {
        PollingReconciler {
            inner: Arc::new(Inner {
                config,
                source,
                snapshots: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
                listener: Mutex::new(None),
                running: AtomicBool::new(false),
                last_run_ms: AtomicI64::new(0),
            }),
        }
    }

    /// Wire the output edge. The supervisor points this at the queue.
    pub fn set_listener(&self, listener: ChangeListener) {
        *self
            .inner
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Start the tick loop. Idempotent while running.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(inner.config.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                inner.tick().await;
            }
        });
        println!(
            "🔄 Polling reconciler started (interval {:?}, {} capabilities)",
            self.inner.config.interval,
            self.inner.config.capabilities.len()
        );
    }

    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            println!("🔄 Polling reconciler stopped");
        }
    }

    pub fn status(&self) -> PollerStatus {
        let last = self.inner.last_run_ms.load(Ordering::SeqCst);
        PollerStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            last_run_at: (last > 0)
                .then(|| chrono::DateTime::from_timestamp_millis(last))
                .flatten()
                .map(|t| t.to_rfc3339()),
            tracked_devices: self
                .inner
                .snapshots
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
        }
    }

    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        self.inner
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// One reconciliation sweep. Exposed so tests drive ticks directly.
    pub async fn tick_once(&self) {
        self.inner.tick().await;
    }
}

impl Inner {
    async fn tick(&self) {
        let started = now_ms();
        self.last_run_ms.store(started, Ordering::SeqCst);

        let devices = match self.source.list_devices(&self.config.capabilities).await {
            Ok(devices) => devices,
            Err(e) => {
                // An entire-tick failure never stops the scheduler.
                eprintln!("⚠️ Poll tick: device list failed: {e}");
                return;
            }
        };

        self.mark_missing_offline(&devices);

        let semaphore = Arc::new(Semaphore::new(self.config.device_concurrency.max(1)));
        let mut handles = Vec::with_capacity(devices.len());
        for device in devices {
            if !self.may_poll(&device.device_id, started) {
                continue;
            }
            let semaphore = Arc::clone(&semaphore);
            let source = Arc::clone(&self.source);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let status = source.device_status(&device.device_id).await;
                (device, status)
            }));
        }

        let mut emitted: Vec<Event> = Vec::new();
        for handle in handles {
            let Ok((device, status)) = handle.await else {
                continue;
            };
            match status {
                Ok(state) => {
                    self.clear_failure(&device.device_id);
                    emitted.extend(self.diff_device(&device, state));
                }
                Err(e) => self.record_failure(&device.device_id, e.is_transient(), &e),
            }
        }

        if emitted.is_empty() {
            return;
        }
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(listener) = listener else {
            return;
        };
        let total = emitted.len();
        for (n, event) in emitted.into_iter().enumerate() {
            if !listener(event) {
                eprintln!("⚠️ Poll tick: queue rejected event, dropping {} remaining", total - n - 1);
                break;
            }
        }
    }

    /// Diff one device's observed attributes against its snapshot. First
    /// observation records a silent baseline; later observations emit one
    /// event per changed `(capability, attribute)`.
    fn diff_device(
        &self,
        device: &DeviceSummary,
        observed: HashMap<String, serde_json::Value>,
    ) -> Vec<Event> {
        let fetched_at = now_ms();
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());

        let Some(snapshot) = snapshots.get_mut(&device.device_id) else {
            snapshots.insert(
                device.device_id.clone(),
                DeviceSnapshot {
                    device_id: device.device_id.clone(),
                    platform: self.config.platform.clone(),
                    name: device.name.clone(),
                    room_id: device.room_id.clone(),
                    capabilities: device.capabilities.clone(),
                    online: true,
                    state: observed,
                    updated_at: fetched_at,
                },
            );
            return Vec::new();
        };

        let mut events = Vec::new();
        for (key, new_value) in &observed {
            let changed = snapshot
                .state
                .get(key)
                .map(|old| old != new_value)
                .unwrap_or(true);
            if !changed {
                continue;
            }
            let previous = snapshot.state.get(key).cloned();
            events.push(synthetic_event(
                device,
                key,
                new_value.clone(),
                previous,
                fetched_at,
            ));
        }

        // Attributes absent from this observation keep their last value.
        for (key, value) in observed {
            snapshot.state.insert(key, value);
        }
        snapshot.name = device.name.clone();
        snapshot.room_id = device.room_id.clone();
        snapshot.capabilities = device.capabilities.clone();
        snapshot.online = true;
        snapshot.updated_at = fetched_at;

        events
    }

    fn mark_missing_offline(&self, devices: &[DeviceSummary]) {
        let listed: std::collections::HashSet<&str> =
            devices.iter().map(|d| d.device_id.as_str()).collect();
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        for snapshot in snapshots.values_mut() {
            if !listed.contains(snapshot.device_id.as_str()) && snapshot.online {
                snapshot.online = false;
                eprintln!("⚠️ Device {} no longer listed, marked offline", snapshot.device_id);
            }
        }
    }

    fn may_poll(&self, device_id: &str, now: i64) -> bool {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match failures.get(device_id) {
            Some(state) => now >= state.next_allowed_ms,
            None => true,
        }
    }

    fn clear_failure(&self, device_id: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(device_id);
    }

    fn record_failure(
        &self,
        device_id: &str,
        transient: bool,
        error: &dyn std::fmt::Display,
    ) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let state = failures.entry(device_id.to_string()).or_default();
        state.consecutive += 1;
        // Permanent failures skip straight to the unhealthy cadence.
        if !transient {
            state.consecutive = state.consecutive.max(self.config.unhealthy_after);
        }
        if state.consecutive >= self.config.unhealthy_after {
            let schedule = crate::retry::Backoff::new(self.config.interval, self.config.backoff_cap);
            let backoff = schedule.delay(state.consecutive - self.config.unhealthy_after + 1);
            state.next_allowed_ms = now_ms() + backoff.as_millis() as i64;
            eprintln!(
                "⚠️ Device {device_id} unhealthy after {} failures ({error}); next poll in {backoff:?}",
                state.consecutive
            );
        } else {
            eprintln!("⚠️ Device {device_id} poll failed ({}/{}): {error}",
                state.consecutive, self.config.unhealthy_after);
        }
    }
}

/// Deterministic id for a polled transition, so repeated observations of the
/// same change collapse in the store. Distinct from the upstream's own ids
/// by the `poll-` prefix.
fn mint_event_id(device_id: &str, key: &str, value: &serde_json::Value, timestamp_ms: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(b"|");
    hasher.update(key.as_bytes());
    hasher.update(b"|");
    hasher.update(value.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update((timestamp_ms / 1000).to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("poll-{}", &digest[..24])
}

fn synthetic_event(
    device: &DeviceSummary,
    key: &str,
    value: serde_json::Value,
    previous: Option<serde_json::Value>,
    fetched_at: i64,
) -> Event {
    let mut metadata = serde_json::json!({
        "stateChange": true,
        "channel": "polling",
    });
    if let Some(previous) = previous {
        metadata["previousValue"] = previous;
    }
    Event {
        id: mint_event_id(&device.device_id, key, &value, fetched_at),
        kind: EventType::DeviceEvent,
        source: EventSource::Polling,
        device_id: Some(device.device_id.clone()),
        device_name: Some(device.name.clone()),
        location_id: None,
        event_type: key.to_string(),
        value,
        timestamp: fetched_at,
        metadata,
    }
}
