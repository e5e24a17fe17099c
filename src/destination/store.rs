//! SQLite persistence for destination records.
//!
//! The config map is sealed as one JSON blob. Every mutation is a single SQL
//! statement whose `WHERE` clause carries its precondition, so the caller
//! learns from the affected row count whether the transition applied.

use super::{ConfigMap, Destination, DestinationStatus, ExportFormat, StorageType};
use crate::credentials::{Cipher, Sealed};
use crate::db;
use crate::secret::Secret;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;

const COLUMNS: &str = "id, user_id, name, destination_type, storage_type, status, export_format,
     schedule, save_to_storage, config_ciphertext, config_nonce, is_deleted,
     deletion_marked_at, created_at, updated_at";

pub struct DestinationStore {
    conn: Mutex<Connection>,
    cipher: Cipher,
}

/// Row as read from SQLite, before decryption and parsing.
struct RawDestination {
    id: String,
    user_id: String,
    name: String,
    destination_type: Option<String>,
    storage_type: String,
    status: String,
    export_format: String,
    schedule: Option<String>,
    save_to_storage: bool,
    config_ciphertext: String,
    config_nonce: String,
    is_deleted: bool,
    deletion_marked_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawDestination {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            destination_type: row.get(3)?,
            storage_type: row.get(4)?,
            status: row.get(5)?,
            export_format: row.get(6)?,
            schedule: row.get(7)?,
            save_to_storage: row.get(8)?,
            config_ciphertext: row.get(9)?,
            config_nonce: row.get(10)?,
            is_deleted: row.get(11)?,
            deletion_marked_at: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

impl DestinationStore {
    pub fn new<P: AsRef<Path>>(db_path: P, cipher: Cipher) -> Result<Self> {
        let conn = db::open(db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS destinations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                destination_type TEXT,
                storage_type TEXT NOT NULL,
                status TEXT NOT NULL,
                export_format TEXT NOT NULL,
                schedule TEXT,
                save_to_storage INTEGER NOT NULL DEFAULT 0,
                config_ciphertext TEXT NOT NULL,
                config_nonce TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                deletion_marked_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_destinations_user ON destinations(user_id);
            "#,
        )
        .context("Failed to create destinations table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    pub fn insert(&self, destination: &Destination) -> Result<()> {
        let sealed = self.seal_config(destination.config.expose())?;

        db::lock(&self.conn)?
            .execute(
                &format!(
                    "INSERT INTO destinations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    COLUMNS
                ),
                params![
                    destination.id,
                    destination.user_id,
                    destination.name,
                    destination.destination_type,
                    destination.storage_type.as_str(),
                    destination.status.as_str(),
                    destination.export_format.as_str(),
                    destination.schedule,
                    destination.save_to_storage,
                    sealed.ciphertext,
                    sealed.nonce,
                    destination.is_deleted,
                    destination.deletion_marked_at.map(|dt| dt.to_rfc3339()),
                    destination.created_at.to_rfc3339(),
                    destination.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert destination")?;
        Ok(())
    }

    /// Loads a destination by id, soft-deleted or not.
    pub fn get(&self, id: &str) -> Result<Option<Destination>> {
        let raw = {
            let conn = db::lock(&self.conn)?;
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM destinations WHERE id = ?1", COLUMNS))
                .context("Failed to prepare query")?;
            let mut rows = stmt.query(params![id]).context("Failed to execute query")?;
            match rows.next().context("Failed to read row")? {
                Some(row) => Some(RawDestination::from_row(row).context("Failed to read destination")?),
                None => None,
            }
        };
        raw.map(|r| self.decode(r)).transpose()
    }

    /// Destinations owned by `user_id`, oldest first.
    pub fn list_by_owner(&self, user_id: &str, include_deleted: bool) -> Result<Vec<Destination>> {
        let raws = {
            let conn = db::lock(&self.conn)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM destinations
                     WHERE user_id = ?1 AND (?2 OR is_deleted = 0)
                     ORDER BY created_at ASC, id ASC",
                    COLUMNS
                ))
                .context("Failed to prepare query")?;
            let rows = stmt
                .query_map(params![user_id, include_deleted], RawDestination::from_row)
                .context("Failed to execute query")?
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read results")?;
            rows
        };
        raws.into_iter().map(|r| self.decode(r)).collect()
    }

    /// Rewrites the mutable fields of a live destination. Returns false when
    /// the record is missing or soft-deleted.
    pub fn update(&self, destination: &Destination) -> Result<bool> {
        let sealed = self.seal_config(destination.config.expose())?;

        let affected = db::lock(&self.conn)?
            .execute(
                "UPDATE destinations SET
                    name = ?2, destination_type = ?3, storage_type = ?4, status = ?5,
                    export_format = ?6, schedule = ?7, save_to_storage = ?8,
                    config_ciphertext = ?9, config_nonce = ?10, updated_at = ?11
                 WHERE id = ?1 AND is_deleted = 0",
                params![
                    destination.id,
                    destination.name,
                    destination.destination_type,
                    destination.storage_type.as_str(),
                    destination.status.as_str(),
                    destination.export_format.as_str(),
                    destination.schedule,
                    destination.save_to_storage,
                    sealed.ciphertext,
                    sealed.nonce,
                    destination.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to update destination")?;
        Ok(affected > 0)
    }

    /// Sets the status of a live destination. Soft-deleted rows are skipped.
    pub fn set_status(&self, id: &str, status: DestinationStatus) -> Result<bool> {
        let affected = db::lock(&self.conn)?
            .execute(
                "UPDATE destinations SET status = ?2, updated_at = ?3
                 WHERE id = ?1 AND is_deleted = 0",
                params![id, status.as_str(), Utc::now().to_rfc3339()],
            )
            .context("Failed to update destination status")?;
        Ok(affected > 0)
    }

    /// Soft delete. Applies only to a live record.
    pub fn mark_deleted(&self, id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let affected = db::lock(&self.conn)?
            .execute(
                "UPDATE destinations
                 SET is_deleted = 1, status = ?2, deletion_marked_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND is_deleted = 0",
                params![id, DestinationStatus::Deleted.as_str(), now],
            )
            .context("Failed to soft-delete destination")?;
        Ok(affected > 0)
    }

    /// Undoes a soft delete, resetting status to `Pending`.
    pub fn restore(&self, id: &str) -> Result<bool> {
        let affected = db::lock(&self.conn)?
            .execute(
                "UPDATE destinations
                 SET is_deleted = 0, status = ?2, deletion_marked_at = NULL, updated_at = ?3
                 WHERE id = ?1 AND is_deleted = 1",
                params![id, DestinationStatus::Pending.as_str(), Utc::now().to_rfc3339()],
            )
            .context("Failed to restore destination")?;
        Ok(affected > 0)
    }

    /// Permanently removes a record. Only rows already soft-deleted match.
    pub fn hard_delete(&self, id: &str) -> Result<bool> {
        let affected = db::lock(&self.conn)?
            .execute(
                "DELETE FROM destinations WHERE id = ?1 AND is_deleted = 1",
                params![id],
            )
            .context("Failed to delete destination")?;
        Ok(affected > 0)
    }

    fn seal_config(&self, config: &ConfigMap) -> Result<Sealed> {
        let json = serde_json::to_string(config).context("Failed to serialize destination config")?;
        self.cipher
            .seal(&json)
            .context("Failed to encrypt destination config")
    }

    fn decode(&self, raw: RawDestination) -> Result<Destination> {
        let json = self
            .cipher
            .open(&Sealed {
                ciphertext: raw.config_ciphertext,
                nonce: raw.config_nonce,
            })
            .context("Failed to decrypt destination config")?;
        let config: ConfigMap =
            serde_json::from_str(&json).context("Failed to parse destination config")?;

        Ok(Destination {
            storage_type: raw
                .storage_type
                .parse::<StorageType>()
                .map_err(|e| anyhow!(e))?,
            status: raw
                .status
                .parse::<DestinationStatus>()
                .map_err(|e| anyhow!(e))?,
            export_format: raw
                .export_format
                .parse::<ExportFormat>()
                .map_err(|e| anyhow!(e))?,
            id: raw.id,
            user_id: raw.user_id,
            name: raw.name,
            destination_type: raw.destination_type,
            schedule: raw.schedule,
            save_to_storage: raw.save_to_storage,
            config: Secret::new(config),
            is_deleted: raw.is_deleted,
            deletion_marked_at: raw
                .deletion_marked_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            created_at: parse_timestamp(&raw.created_at)?,
            updated_at: parse_timestamp(&raw.updated_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Failed to parse timestamp '{}'", s))?
        .with_timezone(&Utc))
}
