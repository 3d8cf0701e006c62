//! Usage: SQLite-backed durable token store (r2d2 pool, blocking work off the async runtime).

use super::{StoreFuture, TokenStore};
use crate::shared::blocking;
use crate::shared::error::AppResult;
use crate::shared::time::now_unix_seconds;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT_DEFAULT: Duration = Duration::from_millis(2000);
const POOL_MAX_SIZE_DEFAULT: u32 = 4;
const POOL_CONNECTION_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    pub busy_timeout: Duration,
    pub pool_max_size: u32,
    pub pool_connection_timeout: Duration,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: BUSY_TIMEOUT_DEFAULT,
            pool_max_size: POOL_MAX_SIZE_DEFAULT,
            pool_connection_timeout: POOL_CONNECTION_TIMEOUT_DEFAULT,
        }
    }
}

#[derive(Clone)]
pub struct SqliteTokenStore {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTokenStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteTokenStore {
    /// Opens (creating if needed) the store file. Blocking; call from a blocking context.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        Self::open_with_config(path, SqliteStoreConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: SqliteStoreConfig) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::shared::error::AppError::storage(format!(
                    "failed to create store dir {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
        });
        let pool = Pool::builder()
            .max_size(config.pool_max_size.max(1))
            .connection_timeout(config.pool_connection_timeout)
            .build(manager)?;

        pool.get()?.execute_batch(SCHEMA_SQL)?;

        tracing::info!(
            path = %path.display(),
            busy_timeout_ms = config.busy_timeout.as_millis(),
            pool_max_size = config.pool_max_size,
            "token store opened"
        );

        Ok(Self { pool, path })
    }

    /// Async wrapper around [`SqliteTokenStore::open`].
    pub async fn open_async(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        blocking::run("token_store_open", move || Self::open(path)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for SqliteTokenStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        let pool = self.pool.clone();
        let key = key.to_string();
        Box::pin(async move {
            blocking::run("token_store_get", move || -> AppResult<Option<String>> {
                let conn = pool.get()?;
                let value = conn
                    .query_row(
                        "SELECT value FROM kv_store WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            blocking::run("token_store_set", move || -> AppResult<()> {
                let conn = pool.get()?;
                conn.execute(
                    "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, now_unix_seconds()],
                )?;
                Ok(())
            })
            .await
        })
    }

    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()> {
        let pool = self.pool.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        Box::pin(async move {
            blocking::run("token_store_remove", move || -> AppResult<()> {
                let mut conn = pool.get()?;
                let tx = conn.transaction()?;
                for key in &keys {
                    tx.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::token_store::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.db");

        {
            let store = SqliteTokenStore::open_async(path.clone()).await.unwrap();
            store.set(ACCESS_TOKEN_KEY, "a1").await.unwrap();
            store.set(REFRESH_TOKEN_KEY, "r1").await.unwrap();
            store.set(ACCESS_TOKEN_KEY, "a2").await.unwrap();
        }

        let reopened = SqliteTokenStore::open_async(path).await.unwrap();
        assert_eq!(
            reopened.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("a2")
        );
        assert_eq!(
            reopened.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("r1")
        );
    }

    #[tokio::test]
    async fn remove_deletes_all_listed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenStore::open_async(dir.path().join("s.db"))
            .await
            .unwrap();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.set("c", "3").await.unwrap();

        store.remove(&["a", "b", "missing"]).await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(store.get("c").await.unwrap().as_deref(), Some("3"));
    }
}
