//! Session log: append-only persistence of verification questions.
//!
//! One canonical schema lives here. The pipeline thread owns the only
//! writing connection ([`SessionStore`]); the HTTP layer reads through a
//! separate read-only connection ([`SessionLogReader`]). Records are
//! created only once an answer has been collected, and are never mutated
//! or deleted.

use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS security_questions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    interrogation TEXT NOT NULL,
    question      TEXT NOT NULL,
    answer        TEXT NOT NULL,
    timestamp     TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("sqlite: {0}")]
    AsyncSqlite(#[from] tokio_rusqlite::Error),
}

/// One persisted question/answer pair.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionRecord {
    pub id: i64,
    /// UUID of the interrogation this pair belongs to.
    pub interrogation: String,
    pub question: String,
    pub answer: String,
    /// RFC 3339 UTC creation time.
    pub timestamp: String,
}

/// Writing handle to the session log. Single writer by design: exactly one
/// of these exists, owned by the pipeline.
pub struct SessionStore {
    conn: rusqlite::Connection,
}

impl SessionStore {
    /// Open (or create) the database and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = rusqlite::Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "session log ready");
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Append one answered question. Called immediately after each answer
    /// is collected, so the log never holds an unanswered question.
    pub fn append(
        &self,
        interrogation: &Uuid,
        question: &str,
        answer: &str,
    ) -> Result<QuestionRecord, StoreError> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO security_questions (interrogation, question, answer, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![interrogation.to_string(), question, answer, timestamp],
        )?;

        Ok(QuestionRecord {
            id: self.conn.last_insert_rowid(),
            interrogation: interrogation.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp,
        })
    }

    /// Most recent records, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<QuestionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, interrogation, question, answer, timestamp
             FROM security_questions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total number of records.
    pub fn count(&self) -> Result<i64, StoreError> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM security_questions", [], |row| {
                row.get(0)
            })?;
        Ok(n)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuestionRecord> {
    Ok(QuestionRecord {
        id: row.get(0)?,
        interrogation: row.get(1)?,
        question: row.get(2)?,
        answer: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

/// Read-only async handle for the HTTP layer. Opened per request; reads
/// may run concurrently with the pipeline's writes.
pub struct SessionLogReader {
    conn: tokio_rusqlite::Connection,
}

impl SessionLogReader {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
        .await?;
        Ok(Self { conn })
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<QuestionRecord>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, interrogation, question, answer, timestamp
                     FROM security_questions ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}
