//! Durable SQLite cache backend.
//!
//! Each operation opens its own connection on the blocking pool, so the
//! backend is cheap to clone and holds no connection across awaits.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::{CacheBackend, CachedResponse};
use crate::error::CacheError;

const SCHEMA_VERSION: i32 = 1;

/// Response cache stored in a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    db_path: PathBuf,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut conn = open_connection(&db_path)?;
        migrate(&mut conn)?;
        tracing::debug!(path = %db_path.display(), "Opened SQLite response cache");
        Ok(Self { db_path })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn run<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            op(&conn)
        })
        .await?
    }
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let key = key.to_owned();
        self.run(move |conn| get_blocking(conn, &key)).await
    }

    async fn insert(&self, key: &str, entry: CachedResponse) -> Result<(), CacheError> {
        let key = key.to_owned();
        self.run(move |conn| insert_blocking(conn, &key, &entry)).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.run(|conn| {
            conn.execute("DELETE FROM responses", [])?;
            Ok(())
        })
        .await
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        let now_ms = now.timestamp_millis();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM responses WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1",
                params![now_ms],
            )?;
            Ok(removed as u64)
        })
        .await
    }

    async fn len(&self) -> Result<u64, CacheError> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM responses", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

fn open_connection(path: &Path) -> Result<Connection, CacheError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn migrate(conn: &mut Connection) -> Result<(), CacheError> {
    let user_version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

    if user_version < SCHEMA_VERSION {
        let tx = conn.transaction()?;
        tx.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS responses (
              key TEXT PRIMARY KEY,
              url TEXT NOT NULL,
              status INTEGER NOT NULL,
              headers_json TEXT NOT NULL,
              body BLOB NOT NULL,
              stored_at_ms INTEGER NOT NULL,
              expires_at_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS responses_expires_at ON responses(expires_at_ms);
            ",
        )?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;
    }
    Ok(())
}

fn get_blocking(conn: &Connection, key: &str) -> Result<Option<CachedResponse>, CacheError> {
    let row = conn
        .query_row(
            "SELECT url, status, headers_json, body, stored_at_ms, expires_at_ms
             FROM responses WHERE key = ?1",
            params![key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u16>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((url, status, headers_json, body, stored_at_ms, expires_at_ms)) = row else {
        return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers_json)
        .map_err(|e| CacheError::Corrupt(format!("headers for {key}: {e}")))?;
    let stored_at = timestamp(stored_at_ms, key)?;
    let expires_at = expires_at_ms.map(|ms| timestamp(ms, key)).transpose()?;

    Ok(Some(CachedResponse { status, headers, body: Bytes::from(body), url, stored_at, expires_at }))
}

fn insert_blocking(conn: &Connection, key: &str, entry: &CachedResponse) -> Result<(), CacheError> {
    let headers_json = serde_json::to_string(&entry.headers)
        .map_err(|e| CacheError::Corrupt(format!("headers for {key}: {e}")))?;
    conn.execute(
        "INSERT OR REPLACE INTO responses
           (key, url, status, headers_json, body, stored_at_ms, expires_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            key,
            entry.url,
            entry.status,
            headers_json,
            entry.body.as_ref(),
            entry.stored_at.timestamp_millis(),
            entry.expires_at.map(|t| t.timestamp_millis()),
        ],
    )?;
    Ok(())
}

fn timestamp(ms: i64, key: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CacheError::Corrupt(format!("timestamp {ms} for {key}")))
}
