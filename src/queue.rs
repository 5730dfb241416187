use crate::models::{Event, EventType, now_ms};
use crate::retry::{Backoff, QUEUE_BACKOFF};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const DEAD_LETTER_CAP: usize = 100;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;
pub type DeadLetterHook = Arc<dyn Fn(&DeadLetter) + Send + Sync>;

#[derive(Debug, PartialEq, Eq)]
pub enum QueueError {
    /// Backlog is at the configured ceiling; the caller decides drop vs 503.
    Full,
    /// Drain has begun; no new work accepted.
    Draining,
    /// No handler registered for this event kind.
    NoHandler,
    /// Handlers cannot be registered once workers are running.
    AlreadyStarted,
    /// One handler per kind.
    HandlerExists,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Full => write!(f, "queue is full"),
            QueueError::Draining => write!(f, "queue is draining"),
            QueueError::NoHandler => write!(f, "no handler registered for event kind"),
            QueueError::AlreadyStarted => write!(f, "queue already started"),
            QueueError::HandlerExists => write!(f, "handler already registered for event kind"),
        }
    }
}

impl std::error::Error for QueueError {}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_depth: usize,
    pub max_attempts: u32,
    pub handler_timeout: Duration,
    pub retry_backoff: Backoff,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            concurrency: 5,
            max_depth: 10_000,
            max_attempts: 3,
            handler_timeout: Duration::from_secs(30),
            retry_backoff: QUEUE_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub depth: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
    pub dead_letters: usize,
}

/// An item that exhausted its retry budget. Kept in memory for diagnostics,
/// never reprocessed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub event: Event,
    pub attempts: u32,
    pub error: String,
    pub failed_at: i64,
}

struct Item {
    event: Event,
    /// Completed attempts so far (0 for fresh items).
    attempts: u32,
}

/// In-process bounded work-queue. One handler per event kind, FIFO intake,
/// a fixed worker pool, retry with exponential backoff, and a capped
/// dead-letter ring.
pub struct MessageQueue {
    inner: Arc<Inner>,
}

struct Inner {
    config: QueueConfig,
    handlers: Mutex<HashMap<EventType, Handler>>,
    backlog: Mutex<VecDeque<Item>>,
    notify: Notify,
    started: AtomicBool,
    draining: AtomicBool,
    in_flight: AtomicUsize,
    retry_pending: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    dead_letter_hook: Mutex<Option<DeadLetterHook>>,
}

impl MessageQueue {
    pub fn new(config: QueueConfig) -> Self {
        MessageQueue {
            inner: Arc::new(Inner {
                config,
                handlers: Mutex::new(HashMap::new()),
                backlog: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                started: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                retry_pending: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                dead_letters: Mutex::new(VecDeque::new()),
                dead_letter_hook: Mutex::new(None),
            }),
        }
    }

    /// Bind the handler for one event kind. Must happen before `start`.
    pub fn register_handler(&self, kind: EventType, handler: Handler) -> Result<(), QueueError> {
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(QueueError::AlreadyStarted);
        }
        let mut handlers = self.inner.handlers.lock().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(&kind) {
            return Err(QueueError::HandlerExists);
        }
        handlers.insert(kind, handler);
        Ok(())
    }

    /// Invoked when an item exhausts its retry budget; the supervisor wires
    /// this to record a system_event.
    pub fn set_dead_letter_hook(&self, hook: DeadLetterHook) {
        *self
            .inner
            .dead_letter_hook
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// Accept an event for processing. Fails fast instead of blocking.
    pub fn enqueue(&self, event: Event) -> Result<(), QueueError> {
        let inner = &self.inner;
        if inner.draining.load(Ordering::SeqCst) {
            return Err(QueueError::Draining);
        }
        {
            let handlers = inner.handlers.lock().unwrap_or_else(|e| e.into_inner());
            if !handlers.contains_key(&event.kind) {
                return Err(QueueError::NoHandler);
            }
        }
        {
            let mut backlog = inner.backlog.lock().unwrap_or_else(|e| e.into_inner());
            if backlog.len() >= inner.config.max_depth {
                return Err(QueueError::Full);
            }
            backlog.push_back(Item { event, attempts: 0 });
        }
        inner.notify.notify_one();
        Ok(())
    }

    /// Spawn the worker pool. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for _ in 0..self.inner.config.concurrency.max(1) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut backlog =
                            inner.backlog.lock().unwrap_or_else(|e| e.into_inner());
                        backlog.pop_front()
                    };
                    match item {
                        Some(item) => Inner::run(&inner, item).await,
                        None => inner.notify.notified().await,
                    }
                }
            });
        }
    }

    pub fn stats(&self) -> QueueStats {
        let inner = &self.inner;
        QueueStats {
            depth: inner
                .backlog
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            in_flight: inner.in_flight.load(Ordering::SeqCst),
            completed: inner.completed.load(Ordering::SeqCst),
            failed: inner.failed.load(Ordering::SeqCst),
            dead_letters: inner
                .dead_letters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner
            .dead_letters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Stop intake and wait for backlog, in-flight work, and pending retries
    /// to reach zero within the grace window. Returns true if fully drained.
    pub async fn drain(&self, grace: Duration) -> bool {
        let inner = &self.inner;
        inner.draining.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let idle = {
                let backlog = inner.backlog.lock().unwrap_or_else(|e| e.into_inner());
                backlog.is_empty()
            } && inner.in_flight.load(Ordering::SeqCst) == 0
                && inner.retry_pending.load(Ordering::SeqCst) == 0;
            if idle {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                let stats = self.stats();
                eprintln!(
                    "⚠️ Queue drain grace expired with depth={} in_flight={}",
                    stats.depth, stats.in_flight
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

impl Inner {
    async fn run(inner: &Arc<Inner>, item: Item) {
        let handler = {
            let handlers = inner.handlers.lock().unwrap_or_else(|e| e.into_inner());
            handlers.get(&item.event.kind).cloned()
        };
        // enqueue() rejects unregistered kinds, so this cannot trip; drop
        // the item quietly rather than panic a worker.
        let Some(handler) = handler else { return };

        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome =
            tokio::time::timeout(inner.config.handler_timeout, handler(item.event.clone())).await;
        inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        let error = match outcome {
            Ok(Ok(())) => {
                inner.completed.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => format!("handler timed out after {:?}", inner.config.handler_timeout),
        };

        inner.failed.fetch_add(1, Ordering::SeqCst);
        let attempts = item.attempts + 1;

        if attempts >= inner.config.max_attempts || inner.draining.load(Ordering::SeqCst) {
            inner.dead_letter(item.event, attempts, error);
            return;
        }

        // Retry re-enters the queue after backoff, exempt from the depth
        // ceiling (the item was admitted once already).
        let delay = inner.config.retry_backoff.delay(attempts);
        eprintln!(
            "⚠️ Handler for {} failed (attempt {attempts}/{}): {error}; retrying in {delay:?}",
            item.event.kind.as_str(),
            inner.config.max_attempts
        );
        inner.retry_pending.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(inner);
        let event = item.event;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut backlog = inner.backlog.lock().unwrap_or_else(|e| e.into_inner());
                backlog.push_back(Item { event, attempts });
            }
            inner.retry_pending.fetch_sub(1, Ordering::SeqCst);
            inner.notify.notify_one();
        });
    }

    fn dead_letter(&self, event: Event, attempts: u32, error: String) {
        eprintln!(
            "❌ Dead letter: {} event {} after {attempts} attempts: {error}",
            event.kind.as_str(),
            event.id
        );
        let letter = DeadLetter {
            event,
            attempts,
            error,
            failed_at: now_ms(),
        };
        {
            let mut letters = self.dead_letters.lock().unwrap_or_else(|e| e.into_inner());
            if letters.len() >= DEAD_LETTER_CAP {
                letters.pop_front();
            }
            letters.push_back(letter.clone());
        }
        let hook = self
            .dead_letter_hook
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(hook) = hook {
            hook(&letter);
        }
    }
}
