use crate::models::{Event, EventQuery, EventSource, EventType};
use rusqlite::{Connection, params};
use std::sync::{Mutex, MutexGuard};

/// Default and maximum page sizes for queries.
pub const DEFAULT_QUERY_LIMIT: i64 = 100;
pub const MAX_QUERY_LIMIT: i64 = 1000;

const EVICT_BATCH: usize = 500;

#[derive(Debug)]
pub enum StoreError {
    /// Insert hit the primary key. Callers may treat this as success.
    DuplicateId,
    Sqlite(rusqlite::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateId => write!(f, "duplicate event id"),
            StoreError::Sqlite(e) => write!(f, "sqlite error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

/// Durable append-only event log. Single denormalized table, WAL journaling
/// so readers never block the writer, JSON blobs for value/metadata.
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = EventStore {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                source TEXT NOT NULL,
                device_id TEXT,
                device_name TEXT,
                location_id TEXT,
                event_type TEXT NOT NULL DEFAULT '',
                value TEXT NOT NULL DEFAULT 'null',
                timestamp INTEGER NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_events_device ON events(device_id, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(type, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_events_source ON events(source, timestamp DESC);",
        )?;
        Ok(())
    }

    /// Append an event. `Err(DuplicateId)` when the id is already present;
    /// a transient failure is retried once inline before surfacing.
    pub fn save(&self, event: &Event) -> Result<(), StoreError> {
        match self.insert(event) {
            Err(StoreError::Sqlite(e)) if is_transient(&e) => {
                eprintln!("⚠️ Event store write failed, retrying once: {e}");
                self.insert(event)
            }
            other => other,
        }
    }

    fn insert(&self, event: &Event) -> Result<(), StoreError> {
        let conn = self.conn();
        let value = serde_json::to_string(&event.value).unwrap_or_else(|_| "null".to_string());
        let metadata =
            serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".to_string());
        let result = conn.execute(
            "INSERT INTO events (id, type, source, device_id, device_name, location_id, event_type, value, timestamp, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                &event.id,
                event.kind.as_str(),
                event.source.as_str(),
                &event.device_id,
                &event.device_name,
                &event.location_id,
                &event.event_type,
                &value,
                event.timestamp,
                &metadata,
                chrono::Utc::now().timestamp(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateId)
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Query events newest-first with optional filters.
    pub fn query(&self, q: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let mut sql = String::from(
            "SELECT id, type, source, device_id, device_name, location_id, event_type, value, timestamp, metadata FROM events",
        );
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        let mut idx = 1;

        if !q.types.is_empty() {
            let placeholders: Vec<String> = q
                .types
                .iter()
                .map(|t| {
                    values.push(Box::new(t.as_str().to_string()));
                    let p = format!("?{idx}");
                    idx += 1;
                    p
                })
                .collect();
            clauses.push(format!("type IN ({})", placeholders.join(",")));
        }
        if !q.sources.is_empty() {
            let placeholders: Vec<String> = q
                .sources
                .iter()
                .map(|s| {
                    values.push(Box::new(s.as_str().to_string()));
                    let p = format!("?{idx}");
                    idx += 1;
                    p
                })
                .collect();
            clauses.push(format!("source IN ({})", placeholders.join(",")));
        }
        if let Some(ref device_id) = q.device_id {
            clauses.push(format!("device_id = ?{idx}"));
            values.push(Box::new(device_id.clone()));
            idx += 1;
        }
        if let Some(since) = q.since {
            clauses.push(format!("timestamp >= ?{idx}"));
            values.push(Box::new(since));
            idx += 1;
        }
        if let Some(until) = q.until {
            clauses.push(format!("timestamp < ?{idx}"));
            values.push(Box::new(until));
            idx += 1;
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let limit = if q.limit <= 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            q.limit.min(MAX_QUERY_LIMIT)
        };
        sql.push_str(&format!(
            " ORDER BY timestamp DESC LIMIT ?{} OFFSET ?{}",
            idx,
            idx + 1
        ));
        values.push(Box::new(limit));
        values.push(Box::new(q.offset.max(0)));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_since(&self, since_ms: i64) -> Result<i64, StoreError> {
        let conn = self.conn();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE timestamp >= ?1",
            params![since_ms],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    pub fn total_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn();
        let n = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(n)
    }

    /// Delete events older than the cutoff, in batches so the sweep never
    /// holds one long transaction. Returns rows removed.
    pub fn evict_older_than(&self, cutoff_ms: i64) -> Result<usize, StoreError> {
        let mut removed = 0usize;
        loop {
            let ids: Vec<String> = {
                let conn = self.conn();
                let mut stmt = conn.prepare(
                    "SELECT id FROM events WHERE timestamp < ?1 ORDER BY timestamp ASC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![cutoff_ms, EVICT_BATCH as i64], |r| r.get(0))?;
                rows.filter_map(|r| r.ok()).collect()
            };
            if ids.is_empty() {
                break;
            }
            let conn = self.conn();
            let placeholders: Vec<String> =
                (0..ids.len()).map(|i| format!("?{}", i + 1)).collect();
            let sql = format!("DELETE FROM events WHERE id IN ({})", placeholders.join(","));
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            removed += conn.execute(&sql, param_refs.as_slice())?;
        }
        Ok(removed)
    }

    /// Flush the WAL. Best effort; the store is still usable afterwards.
    pub fn close(&self) {
        let conn = self.conn();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);").ok();
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let kind_str: String = row.get(1)?;
    let source_str: String = row.get(2)?;
    let value_str: String = row.get(7)?;
    let metadata_str: String = row.get(9)?;
    Ok(Event {
        id: row.get(0)?,
        kind: EventType::parse(&kind_str).unwrap_or(EventType::SystemEvent),
        source: EventSource::parse(&source_str).unwrap_or(EventSource::Internal),
        device_id: row.get(3)?,
        device_name: row.get(4)?,
        location_id: row.get(5)?,
        event_type: row.get(6)?,
        value: serde_json::from_str(&value_str).unwrap_or(serde_json::Value::Null),
        timestamp: row.get(8)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
    })
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::DatabaseBusy
                || inner.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_ms;

    struct TempStore {
        store: EventStore,
        path: String,
    }

    impl Drop for TempStore {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
            let _ = std::fs::remove_file(format!("{}-wal", self.path));
            let _ = std::fs::remove_file(format!("{}-shm", self.path));
        }
    }

    fn temp_store() -> TempStore {
        let path = format!(
            "/tmp/hub_store_test_{}.db",
            uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
        );
        let store = EventStore::open(&path).expect("open store");
        TempStore { store, path }
    }

    fn device_event(id: &str, device: &str, ts: i64) -> Event {
        Event {
            id: id.to_string(),
            kind: EventType::DeviceEvent,
            source: EventSource::Webhook,
            device_id: Some(device.to_string()),
            device_name: None,
            location_id: None,
            event_type: "switch.switch".to_string(),
            value: serde_json::json!("on"),
            timestamp: ts,
            metadata: serde_json::json!({"stateChange": true}),
        }
    }

    #[test]
    fn save_then_query_round_trips() {
        let t = temp_store();
        let e = device_event("e1", "d1", now_ms());
        t.store.save(&e).unwrap();

        let got = t
            .store
            .query(&EventQuery {
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "e1");
        assert_eq!(got[0].kind, EventType::DeviceEvent);
        assert_eq!(got[0].value, serde_json::json!("on"));
        assert_eq!(got[0].metadata["stateChange"], serde_json::json!(true));
    }

    #[test]
    fn duplicate_id_is_rejected_once_stored() {
        let t = temp_store();
        let e = device_event("dup", "d1", now_ms());
        t.store.save(&e).unwrap();
        match t.store.save(&e) {
            Err(StoreError::DuplicateId) => {}
            other => panic!("expected DuplicateId, got {other:?}"),
        }
        assert_eq!(t.store.total_count().unwrap(), 1);
    }

    #[test]
    fn query_filters_by_device_type_source_and_window() {
        let t = temp_store();
        let base = 1_700_000_000_000i64;
        t.store.save(&device_event("a", "d1", base)).unwrap();
        t.store.save(&device_event("b", "d2", base + 1000)).unwrap();
        let mut sys = Event::system("queue.dead_letter", serde_json::json!({}));
        sys.timestamp = base + 2000;
        t.store.save(&sys).unwrap();

        let by_device = t
            .store
            .query(&EventQuery {
                device_id: Some("d2".to_string()),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_device.len(), 1);
        assert_eq!(by_device[0].id, "b");

        let by_type = t
            .store
            .query(&EventQuery {
                types: vec![EventType::SystemEvent],
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].id, sys.id);

        let by_source = t
            .store
            .query(&EventQuery {
                sources: vec![EventSource::Webhook],
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_source.len(), 2);

        let windowed = t
            .store
            .query(&EventQuery {
                since: Some(base + 500),
                until: Some(base + 1500),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].id, "b");
    }

    #[test]
    fn query_is_newest_first_with_limit_and_offset() {
        let t = temp_store();
        let base = 1_700_000_000_000i64;
        for i in 0..5 {
            t.store
                .save(&device_event(&format!("e{i}"), "d1", base + i))
                .unwrap();
        }
        let page = t
            .store
            .query(&EventQuery {
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "e3");
        assert_eq!(page[1].id, "e2");
    }

    #[test]
    fn count_since_counts_the_window() {
        let t = temp_store();
        let base = 1_700_000_000_000i64;
        t.store.save(&device_event("a", "d1", base)).unwrap();
        t.store.save(&device_event("b", "d1", base + 100)).unwrap();
        assert_eq!(t.store.count_since(base + 50).unwrap(), 1);
        assert_eq!(t.store.count_since(0).unwrap(), 2);
    }

    #[test]
    fn evict_removes_only_rows_past_the_cutoff() {
        let t = temp_store();
        let base = 1_700_000_000_000i64;
        for i in 0..10 {
            t.store
                .save(&device_event(&format!("e{i}"), "d1", base + i))
                .unwrap();
        }
        let removed = t.store.evict_older_than(base + 5).unwrap();
        assert_eq!(removed, 5);
        assert_eq!(t.store.total_count().unwrap(), 5);
        let remaining = t
            .store
            .query(&EventQuery {
                limit: 100,
                ..Default::default()
            })
            .unwrap();
        assert!(remaining.iter().all(|e| e.timestamp >= base + 5));
    }
}
