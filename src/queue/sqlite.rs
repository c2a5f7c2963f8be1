//! SQLite-backed queue store.
//!
//! One pool is opened at startup and held for the life of the process.
//! `SQLITE_BUSY` / `SQLITE_LOCKED` surface as `StoreError::Conflict` so the
//! status writer can retry them.

use super::*;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    phone_sender    TEXT,
    phone_recipient TEXT,
    message_text    TEXT,
    status          INTEGER,
    date_sent       TEXT,
    error_text      TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_status ON messages (status);
"#;

// Columns are cast so rows written with numeric phone numbers still decode.
const SELECT_COLUMNS: &str = "SELECT id, \
     CAST(phone_sender AS TEXT) AS phone_sender, \
     CAST(phone_recipient AS TEXT) AS phone_recipient, \
     CAST(message_text AS TEXT) AS message_text, \
     status, \
     CAST(date_sent AS TEXT) AS date_sent, \
     CAST(error_text AS TEXT) AS error_text \
     FROM messages";

#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// Open (creating if needed) the queue database at `path`
    pub async fn open(path: &Path, busy_timeout: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!(
                        "failed to create directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        let store = Self { pool };
        store.ensure_schema().await?;
        debug!(path = %path.display(), "queue store opened");
        Ok(store)
    }

    /// Wrap an existing pool (schema is created if missing)
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Add a pending job. Producers normally write rows themselves; this is
    /// the same insert for tooling and tests.
    pub async fn enqueue(&self, sender: &str, recipient: &str, text: &str) -> StoreResult<JobId> {
        let result = sqlx::query(
            "INSERT INTO messages (phone_sender, phone_recipient, message_text) VALUES (?, ?, ?)",
        )
        .bind(sender)
        .bind(recipient)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(JobId(result.last_insert_rowid()))
    }

    /// Fetch a single row by id
    pub async fn get(&self, id: JobId) -> StoreResult<JobRecord> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(StoreError::NotFound(id))?;

        decode_row(&row)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn fetch(&self, filter: JobFilter) -> StoreResult<Vec<JobRecord>> {
        let (clause, code) = match filter {
            JobFilter::Pending => ("status IS NULL", None),
            JobFilter::Status(s) => ("status = ?", Some(s.code())),
            JobFilter::NotStatus(s) => ("status IS NOT NULL AND status != ?", Some(s.code())),
        };
        let sql = format!("{} WHERE {} ORDER BY id", SELECT_COLUMNS, clause);

        let mut query = sqlx::query(&sql);
        if let Some(code) = code {
            query = query.bind(code);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_row(row) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "skipping undecodable queue row"),
            }
        }
        Ok(records)
    }

    async fn update(&self, id: JobId, fields: &[FieldValue]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let assignments: Vec<&str> = fields
            .iter()
            .map(|field| match field {
                FieldValue::Status(_) => "status = ?",
                FieldValue::SentAt(_) => "date_sent = ?",
                FieldValue::ErrorText(_) => "error_text = ?",
            })
            .collect();
        let sql = format!(
            "UPDATE messages SET {} WHERE id = ?",
            assignments.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for field in fields {
            query = match field {
                FieldValue::Status(s) => query.bind(s.code()),
                FieldValue::SentAt(at) => query.bind(at.format(SENT_AT_FORMAT).to_string()),
                FieldValue::ErrorText(text) => query.bind(text.clone()),
            };
        }

        let result = query
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status IS NULL THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 1 THEN 1 ELSE 0 END), 0) AS sent,
                COALESCE(SUM(CASE WHEN status = 2 THEN 1 ELSE 0 END), 0) AS failed
            FROM messages
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let count = |name: &str| -> StoreResult<u64> {
            row.try_get::<i64, _>(name)
                .map(|n| n.max(0) as u64)
                .map_err(map_sqlx_error)
        };

        Ok(StatusCounts {
            pending: count("pending")?,
            sent: count("sent")?,
            failed: count("failed")?,
        })
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<JobRecord> {
    let status_code: Option<i64> = row.try_get("status").map_err(map_sqlx_error)?;

    Ok(JobRecord {
        id: JobId(row.try_get("id").map_err(map_sqlx_error)?),
        sender: row.try_get("phone_sender").map_err(map_sqlx_error)?,
        recipient: row.try_get("phone_recipient").map_err(map_sqlx_error)?,
        text: row.try_get("message_text").map_err(map_sqlx_error)?,
        status: status_code.and_then(JobStatus::from_code),
        sent_at: row.try_get("date_sent").map_err(map_sqlx_error)?,
        error_text: row.try_get("error_text").map_err(map_sqlx_error)?,
    })
}

/// Primary result codes SQLITE_BUSY (5) and SQLITE_LOCKED (6), including
/// their extended variants.
fn is_lock_code(code: &str) -> bool {
    code.parse::<i64>()
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

pub(crate) fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) => {
            let locked = db.code().map(|c| is_lock_code(&c)).unwrap_or(false)
                || db.message().contains("database is locked");
            if locked {
                StoreError::Conflict(db.message().to_string())
            } else {
                StoreError::Database(e.to_string())
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Conflict(e.to_string()),
        _ => StoreError::Database(e.to_string()),
    }
}
