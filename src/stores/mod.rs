//! SQLite persistence.
//!
//! Two independent database files, one per store. Every operation opens its
//! own connection (WAL, busy timeout) so the stores are `Clone + Send` and can
//! be used from `spawn_blocking` without sharing a handle.

pub mod detections;
pub mod plants;

use std::fs;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::AppError;

pub use detections::{DetectionStore, SessionSummary};
pub use plants::{BatchSummary, NewObservation, PlantStore};

const SCHEMA_VERSION: i64 = 1;

fn open_conn(label: &str, path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path)
        .map_err(|e| AppError::Store(format!("{label}: open {}: {e}", path.display())))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Store(format!("{label}: set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| AppError::Store(format!("{label}: set busy_timeout: {e}")))?;

    Ok(conn)
}

/// Create the parent directory, then apply `ddl` on a fresh database or check
/// the schema version of an existing one.
///
/// Tables use `IF NOT EXISTS`, so files written by older deployments (which
/// never set `user_version`) are adopted as version 1.
fn init_schema(label: &str, path: &Path, ddl: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Store(format!("{label}: cannot create {}: {e}", parent.display()))
            })?;
        }
    }

    let conn = open_conn(label, path)?;
    let version: i64 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|e| AppError::Store(format!("{label}: read schema version: {e}")))?;

    if version == 0 {
        conn.execute_batch(&format!("{ddl}\nPRAGMA user_version = {SCHEMA_VERSION};"))
            .map_err(|e| AppError::Store(format!("{label}: initialize schema: {e}")))?;
        return Ok(());
    }

    if version != SCHEMA_VERSION {
        return Err(AppError::Store(format!(
            "{label}: unsupported schema version {version}, expected {SCHEMA_VERSION}"
        )));
    }
    Ok(())
}

/// Current UTC time as RFC 3339 with microseconds.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
