//! Durable key-value records and the save-on-release guard used by the
//! stateful components.

use crate::error::StoreError;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use tracing::{debug, warn};

pub const CONNECTION_HISTORY_KEY: &str = "ssh_connection_history";
pub const TERMINAL_STATE_KEY: &str = "terminal-state";

/// Whole-record string store. A successful `put` is durable when it returns.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub fn load_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.put(key, &raw)
}

/// SQLite-backed store holding one connection for its whole lifetime.
#[derive(Debug)]
pub struct SqliteKvStore {
    db: Mutex<SqlConnection>,
}

impl SqliteKvStore {
    /// Opens (creating if needed) the database and its `kv` table.
    pub fn open(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let db = SqlConnection::open(&db_path).map_err(database)?;
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(database)?;
        debug!(path = %db_path.display(), "state database opened");
        Ok(Self { db: Mutex::new(db) })
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare_cached("SELECT value FROM kv WHERE key = ?1")
            .map_err(database)?;
        stmt.query_row(params![key], |row| row.get::<_, String>(0))
            .optional()
            .map_err(database)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare_cached(
                r#"
                INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .map_err(database)?;
        stmt.execute(params![key, value, chrono::Utc::now().to_rfc3339()])
            .map_err(database)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(database)?;
        Ok(())
    }
}

fn database(err: rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.records.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.records.lock().remove(key);
        Ok(())
    }
}

/// State with a persisted projection stored under a fixed key.
pub trait Persisted {
    const KEY: &'static str;

    fn to_record(&self) -> Result<String, serde_json::Error>;
}

/// Exclusive access to `T` that writes `T`'s record back to the store on release.
pub struct Persisting<'a, T: Persisted> {
    guard: MutexGuard<'a, T>,
    store: &'a dyn KvStore,
}

impl<'a, T: Persisted> Persisting<'a, T> {
    pub fn new(state: &'a Mutex<T>, store: &'a dyn KvStore) -> Self {
        Self {
            guard: state.lock(),
            store,
        }
    }
}

impl<T: Persisted> Deref for Persisting<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: Persisted> DerefMut for Persisting<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: Persisted> Drop for Persisting<'_, T> {
    fn drop(&mut self) {
        let saved = self
            .guard
            .to_record()
            .map_err(StoreError::from)
            .and_then(|record| self.store.put(T::KEY, &record));
        if let Err(err) = saved {
            warn!(key = T::KEY, error = %err, "failed to persist state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Counter {
        value: u32,
    }

    impl Persisted for Counter {
        const KEY: &'static str = "counter";

        fn to_record(&self) -> Result<String, serde_json::Error> {
            serde_json::to_string(&self.value)
        }
    }

    #[test]
    fn sqlite_put_get_overwrite_remove() {
        let dir = TempDir::new().unwrap();
        let store = SqliteKvStore::open(dir.path().join("nested").join("state.db")).unwrap();

        assert_eq!(store.get("k").unwrap(), None);
        store.put("k", "one").unwrap();
        store.put("k", "two").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("two"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn sqlite_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        let store = SqliteKvStore::open(path.clone()).unwrap();
        save_json(&store, "list", &vec!["a", "b"]).unwrap();
        drop(store);

        let reopened = SqliteKvStore::open(path).unwrap();
        let list: Vec<String> = load_json(&reopened, "list").unwrap().unwrap();
        assert_eq!(list, vec!["a", "b"]);
    }

    #[test]
    fn writes_reuse_the_open_connection() {
        let dir = TempDir::new().unwrap();
        let store = SqliteKvStore::open(dir.path().join("state.db")).unwrap();
        // TEMP objects live only on the connection that created them.
        store
            .db
            .lock()
            .execute_batch(
                r#"
                CREATE TEMP TABLE writes (n INTEGER NOT NULL);
                INSERT INTO writes VALUES (0);
                CREATE TEMP TRIGGER count_writes AFTER INSERT ON main.kv
                BEGIN
                    UPDATE writes SET n = n + 1;
                END;
                "#,
            )
            .unwrap();

        for n in 0..50 {
            store.put(&format!("k{n}"), "v").unwrap();
        }
        assert_eq!(store.get("k49").unwrap().as_deref(), Some("v"));

        let writes: i64 = store
            .db
            .lock()
            .query_row("SELECT n FROM writes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(writes, 50);
    }

    #[test]
    fn persisting_guard_saves_on_release() {
        let store = MemoryKvStore::new();
        let state = Mutex::new(Counter { value: 1 });
        {
            let mut guard = Persisting::new(&state, &store);
            guard.value = 7;
            assert_eq!(store.get("counter").unwrap(), None);
        }
        assert_eq!(store.get("counter").unwrap().as_deref(), Some("7"));
        assert_eq!(state.lock().value, 7);
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let store = MemoryKvStore::new();
        store.put("bad", "{not json").unwrap();
        let loaded: Result<Option<Vec<String>>, _> = load_json(&store, "bad");
        assert!(matches!(loaded, Err(StoreError::Serialize(_))));
    }
}
