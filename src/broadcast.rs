use crate::models::{Event, now_ms};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Per-session buffer. A client that stops reading fills its buffer and is
/// dropped at the next send; other sessions never feel it.
const SESSION_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct SseStats {
    pub sessions: usize,
    pub frames_sent: u64,
    pub bytes_sent: u64,
}

struct Session {
    sender: mpsc::Sender<String>,
    opened_at: i64,
}

/// Fan-out hub for live event streams. Sessions register a bounded channel;
/// `broadcast` serializes once and pushes to every session, dropping any
/// whose channel is closed or full. No cross-session coupling: one stalled
/// client costs one `try_send` failure, nothing more.
pub struct SseBroadcaster {
    sessions: Mutex<HashMap<u64, Session>>,
    next_id: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Default for SseBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SseBroadcaster {
    pub fn new() -> Self {
        SseBroadcaster {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Add a session; returns its id and the frame receiver for the stream.
    pub fn register(&self) -> (u64, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(SESSION_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                Session {
                    sender,
                    opened_at: now_ms(),
                },
            );
        (id, receiver)
    }

    pub fn remove(&self, id: u64) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Push an event frame to every session. Write failure drops the session
    /// without raising; within a session, frames keep broadcast order.
    pub fn broadcast(&self, event: &Event) {
        let data = match serde_json::to_string(event) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("⚠️ SSE broadcast: failed to serialize event {}: {e}", event.id);
                return;
            }
        };

        // Copy-on-iterate: senders are cloned out so a connect/disconnect
        // during the send loop never contends with the registry lock.
        let targets: Vec<(u64, mpsc::Sender<String>)> = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions
                .iter()
                .map(|(id, s)| (*id, s.sender.clone()))
                .collect()
        };

        let mut dropped = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(data.clone()) {
                Ok(()) => {
                    self.frames_sent.fetch_add(1, Ordering::SeqCst);
                    self.bytes_sent.fetch_add(data.len() as u64, Ordering::SeqCst);
                }
                Err(_) => dropped.push(id),
            }
        }
        if !dropped.is_empty() {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            for id in dropped {
                if let Some(session) = sessions.remove(&id) {
                    let age_secs = (now_ms() - session.opened_at) / 1000;
                    eprintln!("📡 SSE session {id} dropped after {age_secs}s (not keeping up or gone)");
                }
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn stats(&self) -> SseStats {
        SseStats {
            sessions: self.session_count(),
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            bytes_sent: self.bytes_sent.load(Ordering::SeqCst),
        }
    }

    /// Close every session. Streams observe a closed channel and end.
    pub fn close_all(&self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let n = sessions.len();
        sessions.clear();
        if n > 0 {
            println!("📡 Closed {n} SSE sessions");
        }
    }
}

/// Removes the session when the stream is dropped (client disconnected or
/// server shutting down).
pub struct SessionGuard {
    pub broadcaster: std::sync::Arc<SseBroadcaster>,
    pub id: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.broadcaster.remove(self.id);
    }
}
