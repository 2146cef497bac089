//! Optional session-store boundary (§6): persists session records for
//! crash-restart observability only. Never consulted to reconstruct pool
//! invariants across restarts — the in-memory pool is always the source
//! of truth for a live daemon.

use std::collections::BTreeMap;
use std::sync::Mutex;

use fleet_core::{Session, SessionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

pub trait SessionStore: Send + Sync {
    fn upsert(&self, session: &Session) -> Result<(), StoreError>;
    fn remove(&self, id: &SessionId) -> Result<(), StoreError>;
    fn list(&self) -> Result<Vec<Session>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<BTreeMap<SessionId, Session>>,
}

impl SessionStore for InMemoryStore {
    fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        self.records.lock().unwrap().insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn remove(&self, id: &SessionId) -> Result<(), StoreError> {
        self.records.lock().unwrap().remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}

#[cfg(feature = "sqlite-store")]
pub mod sqlite {
    use super::{SessionStore, StoreError};
    use fleet_core::{Session, SessionConfig, SessionId, SessionState};
    use rusqlite::{params, Connection};
    use std::path::Path;
    use std::sync::Mutex;

    pub struct SqliteStore {
        conn: Mutex<Connection>,
    }

    impl SqliteStore {
        pub fn open(path: &Path) -> Result<Self, StoreError> {
            let conn = Connection::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
            let store = Self { conn: Mutex::new(conn) };
            store.migrate()?;
            Ok(store)
        }

        pub fn open_in_memory() -> Result<Self, StoreError> {
            let conn = Connection::open_in_memory().map_err(|e| StoreError::Backend(e.to_string()))?;
            let store = Self { conn: Mutex::new(conn) };
            store.migrate()?;
            Ok(store)
        }

        fn migrate(&self) -> Result<(), StoreError> {
            self.conn
                .lock()
                .unwrap()
                .execute_batch(
                    "CREATE TABLE IF NOT EXISTS sessions (
                        id          TEXT PRIMARY KEY,
                        config_json TEXT NOT NULL,
                        state       TEXT NOT NULL,
                        created_at  TEXT NOT NULL,
                        last_used   TEXT NOT NULL,
                        use_count   INTEGER NOT NULL,
                        pid         INTEGER
                    );",
                )
                .map_err(|e| StoreError::Backend(e.to_string()))
        }
    }

    impl SessionStore for SqliteStore {
        fn upsert(&self, session: &Session) -> Result<(), StoreError> {
            let config_json = serde_json::to_string(&session.config).map_err(|e| StoreError::Backend(e.to_string()))?;
            let state_json = serde_json::to_string(&session.state).map_err(|e| StoreError::Backend(e.to_string()))?;
            self.conn
                .lock()
                .unwrap()
                .execute(
                    "INSERT OR REPLACE INTO sessions
                        (id, config_json, state, created_at, last_used, use_count, pid)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        session.id,
                        config_json,
                        state_json,
                        session.created_at.to_rfc3339(),
                        session.last_used.to_rfc3339(),
                        session.use_count as i64,
                        session.pid.map(|p| p as i64),
                    ],
                )
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        }

        fn remove(&self, id: &SessionId) -> Result<(), StoreError> {
            self.conn
                .lock()
                .unwrap()
                .execute("DELETE FROM sessions WHERE id = ?1", params![id])
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        }

        fn list(&self) -> Result<Vec<Session>, StoreError> {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT id, config_json, state, created_at, last_used, use_count, pid FROM sessions")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let config_json: String = row.get(1)?;
                    let state_json: String = row.get(2)?;
                    let created_at: String = row.get(3)?;
                    let last_used: String = row.get(4)?;
                    let use_count: i64 = row.get(5)?;
                    let pid: Option<i64> = row.get(6)?;
                    Ok((id, config_json, state_json, created_at, last_used, use_count, pid))
                })
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let mut out = Vec::new();
            for row in rows {
                let (id, config_json, state_json, created_at, last_used, use_count, pid) =
                    row.map_err(|e| StoreError::Backend(e.to_string()))?;
                let config: SessionConfig = serde_json::from_str(&config_json).map_err(|e| StoreError::Backend(e.to_string()))?;
                let state: SessionState = serde_json::from_str(&state_json).map_err(|e| StoreError::Backend(e.to_string()))?;
                out.push(Session {
                    id,
                    config,
                    state,
                    created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                        .map_err(|e| StoreError::Backend(e.to_string()))?
                        .with_timezone(&chrono::Utc),
                    last_used: chrono::DateTime::parse_from_rfc3339(&last_used)
                        .map_err(|e| StoreError::Backend(e.to_string()))?
                        .with_timezone(&chrono::Utc),
                    use_count: use_count as u64,
                    pid: pid.map(|p| p as u32),
                });
            }
            Ok(out)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_core::SessionConfig;

    fn sample_session(id: &str) -> Session {
        Session::new(id.to_string(), SessionConfig::new("/work", "be helpful"), Utc::now())
    }

    #[test]
    fn in_memory_store_roundtrips() {
        let store = InMemoryStore::default();
        store.upsert(&sample_session("s-1")).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        store.remove(&"s-1".to_string()).unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
