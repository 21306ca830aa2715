//! `detections.db`: per-frame detection events and session summaries.

use std::path::{Path, PathBuf};

use rusqlite::params;
use serde::Serialize;

use crate::detector::Status;
use crate::error::AppError;
use crate::tally::Counts;

use super::{init_schema, open_conn};

const LABEL: &str = "detections";

const DDL: &str = "
CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY,
    timestamp TEXT,
    class TEXT,
    confidence REAL
);

CREATE TABLE IF NOT EXISTS session_summaries (
    id INTEGER PRIMARY KEY,
    timestamp TEXT,
    infested_count INTEGER,
    not_infested_count INTEGER
);
";

/// One row of `session_summaries`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: i64,
    pub timestamp: String,
    pub infested_count: u64,
    pub not_infested_count: u64,
}

#[derive(Debug, Clone)]
pub struct DetectionStore {
    db_path: PathBuf,
}

impl DetectionStore {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        init_schema(LABEL, db_path, DDL)?;
        Ok(Self { db_path: db_path.to_path_buf() })
    }

    /// Insert one event per `(status, confidence)` pair, all with the same
    /// timestamp, in a single transaction. Returns the number of rows written.
    pub fn insert_detections(
        &self,
        timestamp: &str,
        events: &[(Status, f32)],
    ) -> Result<usize, AppError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut conn = open_conn(LABEL, &self.db_path)?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Store(format!("{LABEL}: begin tx: {e}")))?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO detections (timestamp, class, confidence) VALUES (?1, ?2, ?3)")
                .map_err(|e| AppError::Store(format!("{LABEL}: prepare insert detection: {e}")))?;
            for (status, confidence) in events {
                stmt.execute(params![timestamp, status.class_key(), f64::from(*confidence)])
                    .map_err(|e| AppError::Store(format!("{LABEL}: insert detection: {e}")))?;
            }
        }
        tx.commit()
            .map_err(|e| AppError::Store(format!("{LABEL}: commit detections: {e}")))?;

        Ok(events.len())
    }

    pub fn insert_summary(&self, timestamp: &str, counts: Counts) -> Result<i64, AppError> {
        let conn = open_conn(LABEL, &self.db_path)?;
        conn.execute(
            "INSERT INTO session_summaries (timestamp, infested_count, not_infested_count) VALUES (?1, ?2, ?3)",
            params![timestamp, counts.infested as i64, counts.not_infested as i64],
        )
        .map_err(|e| AppError::Store(format!("{LABEL}: insert summary: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// All summaries, newest first.
    pub fn list_summaries(&self) -> Result<Vec<SessionSummary>, AppError> {
        let conn = open_conn(LABEL, &self.db_path)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, infested_count, not_infested_count FROM session_summaries ORDER BY timestamp DESC, id DESC",
            )
            .map_err(|e| AppError::Store(format!("{LABEL}: prepare list_summaries: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SessionSummary {
                    id: row.get(0)?,
                    timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    infested_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0).max(0) as u64,
                    not_infested_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0).max(0) as u64,
                })
            })
            .map_err(|e| AppError::Store(format!("{LABEL}: query list_summaries: {e}")))?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(
                row.map_err(|e| AppError::Store(format!("{LABEL}: map list_summaries row: {e}")))?,
            );
        }
        Ok(summaries)
    }

    /// Delete one summary. Returns `false` when no row had that id.
    pub fn delete_summary(&self, id: i64) -> Result<bool, AppError> {
        let conn = open_conn(LABEL, &self.db_path)?;
        let deleted = conn
            .execute("DELETE FROM session_summaries WHERE id = ?1", params![id])
            .map_err(|e| AppError::Store(format!("{LABEL}: delete summary {id}: {e}")))?;
        Ok(deleted > 0)
    }
}
