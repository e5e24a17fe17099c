//! SQLite-backed activity log.

use super::{ActivityEntry, AuditSink, NewActivity};
use crate::db;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Append-only activity log. Exposes inserts and reads, nothing else.
pub struct ActivityLog {
    conn: Mutex<Connection>,
}

impl ActivityLog {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = db::open(db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                destination_id TEXT,
                event_type TEXT NOT NULL,
                message TEXT NOT NULL,
                details TEXT,
                correlation_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activity_owner ON activity_log(owner_id, id);
            "#,
        )
        .context("Failed to create activity_log table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Most recent entries for an owner, newest first.
    pub fn list_by_owner(&self, owner_id: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
        self.query(
            "SELECT id, owner_id, destination_id, event_type, message, details, correlation_id, created_at
             FROM activity_log WHERE owner_id = ?1 ORDER BY id DESC LIMIT ?2",
            params![owner_id, limit as i64],
        )
    }

    /// Entries referencing a destination, oldest first.
    pub fn list_by_destination(&self, destination_id: &str) -> Result<Vec<ActivityEntry>> {
        self.query(
            "SELECT id, owner_id, destination_id, event_type, message, details, correlation_id, created_at
             FROM activity_log WHERE destination_id = ?1 ORDER BY id ASC",
            params![destination_id],
        )
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ActivityEntry>> {
        let conn = db::lock(&self.conn)?;
        let mut stmt = conn.prepare(sql).context("Failed to prepare query")?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read results")?;

        rows.into_iter()
            .map(
                |(id, owner_id, destination_id, event_type, message, details, correlation_id, created_at)|
                 -> Result<ActivityEntry> {
                    let details = details
                        .map(|d| serde_json::from_str(&d))
                        .transpose()
                        .context("Failed to parse activity details")?;
                    let created_at = DateTime::parse_from_rfc3339(&created_at)
                        .context("Failed to parse created_at")?
                        .with_timezone(&Utc);
                    Ok(ActivityEntry {
                        id,
                        owner_id,
                        destination_id,
                        event_type,
                        message,
                        details,
                        correlation_id,
                        created_at,
                    })
                },
            )
            .collect()
    }
}

impl AuditSink for ActivityLog {
    fn append(&self, entry: NewActivity) -> Result<()> {
        let details = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize activity details")?;

        db::lock(&self.conn)?
            .execute(
                "INSERT INTO activity_log
                    (owner_id, destination_id, event_type, message, details, correlation_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.owner_id,
                    entry.destination_id,
                    entry.event_type,
                    entry.message,
                    details,
                    entry.correlation_id,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to append activity log entry")?;
        Ok(())
    }
}
