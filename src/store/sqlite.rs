//! SQLite-backed store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{Store, StoreError, StoreFuture, StoreResult};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Store backed by a single SQLite database file.
pub struct SqliteStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

/// Lift a rusqlite failure into a backend error.
fn backend<T>(result: rusqlite::Result<T>) -> StoreResult<T> {
    result.map_err(|e| StoreError::Backend(e.into()))
}

impl SqliteStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the entries table if it does not already exist.
    /// Idempotent, so it runs on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                key        TEXT PRIMARY KEY,
                value      BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_rfc3339()],
            )?;
        }

        Ok(())
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl Store for SqliteStore {
    fn get(&self, key: &str) -> StoreFuture<'_, Vec<u8>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let value: Option<Vec<u8>> = backend(
                conn.query_row(
                    "SELECT value FROM entries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional(),
            )?;
            value.ok_or(StoreError::NotFound(key))
        })
    }

    fn put(&self, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            backend(conn.execute(
                "INSERT INTO entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, value, now_rfc3339()],
            ))?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let removed = backend(conn.execute("DELETE FROM entries WHERE key = ?1", params![key]))?;
            if removed == 0 {
                return Err(StoreError::NotFound(key));
            }
            Ok(())
        })
    }

    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<String>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            // substr() counts characters, not bytes.
            let prefix_chars = prefix.chars().count() as i64;
            let mut stmt = backend(conn.prepare(
                "SELECT key FROM entries WHERE substr(key, 1, ?2) = ?1 ORDER BY key",
            ))?;
            let rows = backend(stmt.query_map(params![prefix, prefix_chars], |row| {
                row.get::<_, String>(0)
            }))?;
            let mut keys = Vec::new();
            for row in rows {
                let key = backend(row)?;
                if let Some(suffix) = key.strip_prefix(&prefix) {
                    keys.push(suffix.to_string());
                }
            }
            Ok(keys)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::new(":memory:").expect("failed to create in-memory store")
    }

    #[tokio::test]
    async fn test_schema_idempotent() {
        let store = test_store();
        store.init_db().expect("second init_db failed");
        store.init_db().expect("third init_db failed");
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = test_store();
        store
            .put("/shortcuts/promo", br#"{"name":"promo"}"#.to_vec())
            .await
            .unwrap();
        let value = store.get("/shortcuts/promo").await.unwrap();
        assert_eq!(value, br#"{"name":"promo"}"#);
    }

    #[tokio::test]
    async fn test_put_upsert() {
        let store = test_store();
        store.put("/users/alice", b"v1".to_vec()).await.unwrap();
        store.put("/users/alice", b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get("/users/alice").await.unwrap(), b"v2");
        assert_eq!(store.list("/users/").await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = test_store();
        let err = store.get("/users/ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = test_store();
        store.put("/sessions/abc", b"{}".to_vec()).await.unwrap();
        store.delete("/sessions/abc").await.unwrap();
        assert!(store.get("/sessions/abc").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_nonexistent() {
        let store = test_store();
        let err = store.delete("/sessions/abc").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let store = test_store();
        for key in ["/services/b", "/services/a", "/servicesx/c", "/users/a"] {
            store.put(key, Vec::new()).await.unwrap();
        }
        assert_eq!(store.list("/services/").await.unwrap(), vec!["a", "b"]);
        assert!(store.list("/shortcuts/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_with_multibyte_prefix() {
        let store = test_store();
        store.put("/ünits/one", Vec::new()).await.unwrap();
        store.put("/units/two", Vec::new()).await.unwrap();
        assert_eq!(store.list("/ünits/").await.unwrap(), vec!["one"]);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("idp.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteStore::new(path).unwrap();
            store.put("/services/sp", b"{}".to_vec()).await.unwrap();
        }
        let reopened = SqliteStore::new(path).unwrap();
        assert_eq!(reopened.list("/services/").await.unwrap(), vec!["sp"]);
    }
}
