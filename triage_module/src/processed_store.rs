//! Durable idempotency records, one row per committed message.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::PathBuf;
use std::time::Duration;

use crate::email::{Category, ProcessedRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("corrupt row for {message_id}: {reason}")]
    Corrupt { message_id: String, reason: String },
}

/// The idempotency barrier's durable half.
///
/// `commit` is an insert-if-absent keyed by message id: a second commit for
/// the same id is not an error and leaves the first row untouched.
pub trait ProcessedStore: Send + Sync {
    fn already_committed(&self, message_id: &str) -> Result<bool, StoreError>;

    /// Returns whether a new row was written.
    fn commit(&self, record: &ProcessedRecord) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteProcessedStore {
    path: PathBuf,
}

impl SqliteProcessedStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    pub fn get(&self, message_id: &str) -> Result<Option<ProcessedRecord>, StoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT message_id, sender, subject, category, label, draft, created_at
                 FROM emails
                 WHERE message_id = ?1",
                params![message_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((message_id, sender, subject, category, label, draft, created_at)) => {
                Ok(Some(ProcessedRecord {
                    category: parse_category(&message_id, &category)?,
                    label: parse_category(&message_id, &label)?,
                    created_at: parse_datetime(&created_at)?,
                    message_id,
                    sender,
                    subject,
                    draft,
                }))
            }
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.open()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT UNIQUE NOT NULL,
                sender TEXT NOT NULL,
                subject TEXT NOT NULL,
                category TEXT NOT NULL,
                label TEXT NOT NULL,
                draft TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(conn)
    }
}

impl ProcessedStore for SqliteProcessedStore {
    fn already_committed(&self, message_id: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM emails WHERE message_id = ?1",
                params![message_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn commit(&self, record: &ProcessedRecord) -> Result<bool, StoreError> {
        let mut conn = self.open()?;
        // BEGIN IMMEDIATE: concurrent committers queue on the busy timeout.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO emails (message_id, sender, subject, category, label, draft, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(message_id) DO NOTHING",
            params![
                record.message_id,
                record.sender,
                record.subject,
                record.category.as_str(),
                record.label.as_str(),
                record.draft,
                format_datetime(record.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(inserted > 0)
    }
}

fn parse_category(message_id: &str, value: &str) -> Result<Category, StoreError> {
    value.parse::<Category>().map_err(|err| StoreError::Corrupt {
        message_id: message_id.to_string(),
        reason: err.to_string(),
    })
}

fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
