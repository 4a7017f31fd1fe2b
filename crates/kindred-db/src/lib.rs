pub mod likes;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use tracing::info;

pub use likes::{LikeCap, LikeInsert, NewLike, RoseCommit, StandardCommit, UnmatchSummary};
pub use messages::NewMessage;

/// Upper bound on a single store call issued from async code.
pub const DB_TIMEOUT: Duration = Duration::from_secs(10);

/// Timestamp layout used in every TEXT time column (matches `datetime('now')`).
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `Database::call` gave up waiting. The work itself was not cancelled.
#[derive(Debug, thiserror::Error)]
#[error("database call timed out after {0:?}; outcome unknown")]
pub struct CallTimedOut(pub Duration);

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests and local tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Like `with_conn`, but hands out `&mut` so the closure can open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }

    /// Run blocking store work off the async runtime, bounded by `DB_TIMEOUT`.
    ///
    /// A timeout only stops the wait. The closure keeps running on the
    /// blocking pool and may still commit, so a [`CallTimedOut`] error means
    /// the outcome is unknown, not that nothing happened.
    pub async fn call<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.call_within(DB_TIMEOUT, f).await
    }

    async fn call_within<F, T>(self: &Arc<Self>, limit: Duration, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || f(&db));

        match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined.map_err(|e| anyhow!("spawn_blocking join error: {}", e))?,
            Err(_) => Err(CallTimedOut(limit).into()),
        }
    }
}

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts the SQLite layout and RFC 3339.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map(|ndt| ndt.and_utc())
        .or_else(|_| raw.parse::<DateTime<Utc>>())
        .map_err(|e| anyhow!("corrupt timestamp '{}': {}", raw, e))
}

/// True when `err` is a UNIQUE/PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
