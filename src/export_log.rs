//! Export log: one row per export attempt.
//!
//! A row is created `InProgress` and moves to a terminal status exactly once.
//! Terminal writes carry `WHERE status = 'in_progress'`, so a second write is
//! a no-op and the caller is told so.

use crate::db;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExportStatus {
    InProgress,
    Success,
    Failed,
}

impl ExportStatus {
    fn as_db_str(&self) -> &'static str {
        match self {
            ExportStatus::InProgress => "in_progress",
            ExportStatus::Success => "success",
            ExportStatus::Failed => "failed",
        }
    }

    fn from_db_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(ExportStatus::InProgress),
            "success" => Ok(ExportStatus::Success),
            "failed" => Ok(ExportStatus::Failed),
            other => Err(anyhow!("Unknown export status '{}'", other)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExportStatus::InProgress)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ExportLog {
    pub id: String,
    pub destination_id: String,
    pub owner_id: String,
    pub status: ExportStatus,
    pub file_url: Option<String>,
    pub file_size: Option<u64>,
    pub error_message: Option<String>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "id, destination_id, owner_id, status, file_url, file_size, error_message,
     correlation_id, created_at, completed_at";

pub struct ExportLogStore {
    conn: Mutex<Connection>,
}

impl ExportLogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = db::open(db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS export_logs (
                id TEXT PRIMARY KEY,
                destination_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                status TEXT NOT NULL,
                file_url TEXT,
                file_size INTEGER,
                error_message TEXT,
                correlation_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_export_logs_destination
                ON export_logs(destination_id, created_at);
            "#,
        )
        .context("Failed to create export_logs table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts a fresh `InProgress` row.
    pub fn create(&self, destination_id: &str, owner_id: &str, correlation_id: &str) -> Result<ExportLog> {
        let log = ExportLog {
            id: Uuid::new_v4().to_string(),
            destination_id: destination_id.to_string(),
            owner_id: owner_id.to_string(),
            status: ExportStatus::InProgress,
            file_url: None,
            file_size: None,
            error_message: None,
            correlation_id: correlation_id.to_string(),
            created_at: Utc::now(),
            completed_at: None,
        };

        db::lock(&self.conn)?
            .execute(
                "INSERT INTO export_logs (id, destination_id, owner_id, status, correlation_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    log.id,
                    log.destination_id,
                    log.owner_id,
                    log.status.as_db_str(),
                    log.correlation_id,
                    log.created_at.to_rfc3339(),
                ],
            )
            .context("Failed to create export log")?;
        Ok(log)
    }

    pub fn get(&self, id: &str) -> Result<Option<ExportLog>> {
        let mut logs = self.query(
            &format!("SELECT {} FROM export_logs WHERE id = ?1", COLUMNS),
            params![id],
        )?;
        Ok(logs.pop())
    }

    /// Like [`ExportLogStore::get`], hiding rows of other owners.
    pub fn get_owned(&self, id: &str, owner_id: &str) -> Result<Option<ExportLog>> {
        Ok(self.get(id)?.filter(|log| log.owner_id == owner_id))
    }

    /// Export history of a destination, newest first.
    pub fn list_by_destination(&self, destination_id: &str, owner_id: &str) -> Result<Vec<ExportLog>> {
        self.query(
            &format!(
                "SELECT {} FROM export_logs
                 WHERE destination_id = ?1 AND owner_id = ?2
                 ORDER BY created_at DESC, rowid DESC",
                COLUMNS
            ),
            params![destination_id, owner_id],
        )
    }

    /// Records success. Returns false if the row already left `InProgress`.
    pub fn complete_success(&self, id: &str, file_url: Option<&str>, file_size: Option<u64>) -> Result<bool> {
        let affected = db::lock(&self.conn)?
            .execute(
                "UPDATE export_logs
                 SET status = ?2, file_url = ?3, file_size = ?4, completed_at = ?5
                 WHERE id = ?1 AND status = 'in_progress'",
                params![
                    id,
                    ExportStatus::Success.as_db_str(),
                    file_url,
                    file_size.map(|s| s as i64),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to complete export log")?;
        Ok(affected > 0)
    }

    /// Records failure. Returns false if the row already left `InProgress`.
    pub fn complete_failure(&self, id: &str, error_message: &str) -> Result<bool> {
        let affected = db::lock(&self.conn)?
            .execute(
                "UPDATE export_logs
                 SET status = ?2, error_message = ?3, completed_at = ?4
                 WHERE id = ?1 AND status = 'in_progress'",
                params![
                    id,
                    ExportStatus::Failed.as_db_str(),
                    error_message,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to complete export log")?;
        Ok(affected > 0)
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ExportLog>> {
        let conn = db::lock(&self.conn)?;
        let mut stmt = conn.prepare(sql).context("Failed to prepare query")?;
        let rows = stmt
            .query_map(params, read_row)
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read results")?;
        rows.into_iter().map(RawExportLog::parse).collect()
    }
}

/// Row as read from SQLite, before parsing.
struct RawExportLog {
    id: String,
    destination_id: String,
    owner_id: String,
    status: String,
    file_url: Option<String>,
    file_size: Option<i64>,
    error_message: Option<String>,
    correlation_id: String,
    created_at: String,
    completed_at: Option<String>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawExportLog> {
    Ok(RawExportLog {
        id: row.get(0)?,
        destination_id: row.get(1)?,
        owner_id: row.get(2)?,
        status: row.get(3)?,
        file_url: row.get(4)?,
        file_size: row.get(5)?,
        error_message: row.get(6)?,
        correlation_id: row.get(7)?,
        created_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

impl RawExportLog {
    fn parse(self) -> Result<ExportLog> {
        Ok(ExportLog {
            status: ExportStatus::from_db_str(&self.status)?,
            created_at: parse_timestamp(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
            file_size: self.file_size.map(|s| s as u64),
            id: self.id,
            destination_id: self.destination_id,
            owner_id: self.owner_id,
            file_url: self.file_url,
            error_message: self.error_message,
            correlation_id: self.correlation_id,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Failed to parse timestamp '{}'", s))?
        .with_timezone(&Utc))
}
