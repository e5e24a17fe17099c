//! SQLite connection helpers shared by the stores.

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Opens (or creates) a database file. `":memory:"` gives a private
/// in-memory database, which the tests rely on.
pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let path = db_path.as_ref();
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    // Several stores may share one file through separate connections.
    conn.busy_timeout(Duration::from_secs(5))
        .context("Failed to set busy timeout")?;
    Ok(conn)
}

/// Locks a store connection, turning a poisoned mutex into an error.
pub fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| anyhow!("Database connection lock poisoned"))
}
