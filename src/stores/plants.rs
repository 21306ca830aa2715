//! `corn_plants.db`: one row per kept detection from batch uploads.

use std::path::{Path, PathBuf};

use rusqlite::params;
use serde::Serialize;

use crate::detector::Status;
use crate::error::AppError;
use crate::imaging::gps::GpsFix;

use super::{init_schema, open_conn};

const LABEL: &str = "corn_plants";

const DDL: &str = "
CREATE TABLE IF NOT EXISTS corn_plants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER,
    image_name TEXT,
    gps_lat REAL,
    gps_lon REAL,
    status TEXT
);
";

/// A plant observation to insert.
#[derive(Debug, Clone)]
pub struct NewObservation<'a> {
    pub batch_id: Option<i64>,
    pub image_name: &'a str,
    pub gps: Option<GpsFix>,
    pub status: Status,
}

/// Per-batch aggregate. `batch_id` is `None` for rows stored without one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: Option<i64>,
    pub infested_count: u64,
    pub not_infested_count: u64,
    pub infested_percentage: f64,
    pub not_infested_percentage: f64,
}

#[derive(Debug, Clone)]
pub struct PlantStore {
    db_path: PathBuf,
}

impl PlantStore {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        init_schema(LABEL, db_path, DDL)?;
        Ok(Self { db_path: db_path.to_path_buf() })
    }

    /// Insert all observations in one transaction; returns their row ids.
    pub fn insert_observations(&self, observations: &[NewObservation<'_>]) -> Result<Vec<i64>, AppError> {
        let mut conn = open_conn(LABEL, &self.db_path)?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Store(format!("{LABEL}: begin tx: {e}")))?;

        let mut ids = Vec::with_capacity(observations.len());
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO corn_plants (batch_id, image_name, gps_lat, gps_lon, status) VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(|e| AppError::Store(format!("{LABEL}: prepare insert: {e}")))?;
            for obs in observations {
                stmt.execute(params![
                    obs.batch_id,
                    obs.image_name,
                    obs.gps.map(|g| g.lat),
                    obs.gps.map(|g| g.lon),
                    obs.status.label(),
                ])
                .map_err(|e| {
                    AppError::Store(format!("{LABEL}: insert observation for {}: {e}", obs.image_name))
                })?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()
            .map_err(|e| AppError::Store(format!("{LABEL}: commit observations: {e}")))?;
        Ok(ids)
    }

    /// Counts and percentages (rounded to 2 decimals) grouped by batch id.
    /// Percentages are of all rows in the batch.
    pub fn batch_summary(&self) -> Result<Vec<BatchSummary>, AppError> {
        let conn = open_conn(LABEL, &self.db_path)?;
        let mut stmt = conn
            .prepare(
                "SELECT
                    batch_id,
                    SUM(CASE WHEN status = 'INFESTED' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'NOT INFESTED' THEN 1 ELSE 0 END),
                    COUNT(*)
                 FROM corn_plants
                 GROUP BY batch_id
                 ORDER BY batch_id",
            )
            .map_err(|e| AppError::Store(format!("{LABEL}: prepare batch_summary: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let infested: i64 = row.get(1)?;
                let not_infested: i64 = row.get(2)?;
                let total: i64 = row.get(3)?;
                Ok(BatchSummary {
                    batch_id: row.get(0)?,
                    infested_count: infested.max(0) as u64,
                    not_infested_count: not_infested.max(0) as u64,
                    infested_percentage: rounded_percentage(infested, total),
                    not_infested_percentage: rounded_percentage(not_infested, total),
                })
            })
            .map_err(|e| AppError::Store(format!("{LABEL}: query batch_summary: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| AppError::Store(format!("{LABEL}: map batch_summary row: {e}")))?);
        }
        Ok(out)
    }

    /// Delete every row of `batch_id`; `0` selects rows stored without a
    /// batch id. Returns the number of rows removed.
    pub fn delete_batch(&self, batch_id: i64) -> Result<usize, AppError> {
        let conn = open_conn(LABEL, &self.db_path)?;
        let result = if batch_id == 0 {
            conn.execute("DELETE FROM corn_plants WHERE batch_id IS NULL", [])
        } else {
            conn.execute("DELETE FROM corn_plants WHERE batch_id = ?1", params![batch_id])
        };
        result.map_err(|e| AppError::Store(format!("{LABEL}: delete batch {batch_id}: {e}")))
    }
}

fn rounded_percentage(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_store() -> (TempDir, PlantStore) {
        let temp = TempDir::new().expect("tempdir");
        let store = PlantStore::open(&temp.path().join("corn_plants.db")).expect("open store");
        (temp, store)
    }

    fn obs(batch_id: Option<i64>, status: Status) -> NewObservation<'static> {
        NewObservation { batch_id, image_name: "field.jpg", gps: None, status }
    }

    #[test]
    fn summary_groups_by_batch_and_rounds() {
        let (_temp, store) = make_store();
        store
            .insert_observations(&[
                obs(Some(100), Status::Infested),
                obs(Some(100), Status::NotInfested),
                obs(Some(100), Status::NotInfested),
                obs(Some(200), Status::Infested),
            ])
            .unwrap();

        let summary = store.batch_summary().unwrap();
        assert_eq!(summary.len(), 2);

        let first = &summary[0];
        assert_eq!(first.batch_id, Some(100));
        assert_eq!(first.infested_count, 1);
        assert_eq!(first.not_infested_count, 2);
        assert_eq!(first.infested_percentage, 33.33);
        assert_eq!(first.not_infested_percentage, 66.67);

        assert_eq!(summary[1].infested_percentage, 100.0);
        assert_eq!(summary[1].not_infested_percentage, 0.0);
    }

    #[test]
    fn null_batch_is_its_own_group_and_deleted_by_zero() {
        let (_temp, store) = make_store();
        store
            .insert_observations(&[
                obs(None, Status::Infested),
                obs(None, Status::NotInfested),
                obs(Some(5), Status::Infested),
            ])
            .unwrap();

        let summary = store.batch_summary().unwrap();
        assert!(summary.iter().any(|s| s.batch_id.is_none()));

        assert_eq!(store.delete_batch(0).unwrap(), 2);
        let summary = store.batch_summary().unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].batch_id, Some(5));
    }

    #[test]
    fn delete_missing_batch_removes_nothing() {
        let (_temp, store) = make_store();
        store.insert_observations(&[obs(Some(1), Status::Infested)]).unwrap();
        assert_eq!(store.delete_batch(999).unwrap(), 0);
        assert_eq!(store.delete_batch(1).unwrap(), 1);
        assert!(store.batch_summary().unwrap().is_empty());
    }

    #[test]
    fn gps_is_persisted() {
        let (temp, store) = make_store();
        store
            .insert_observations(&[NewObservation {
                batch_id: Some(1),
                image_name: "geo.jpg",
                gps: Some(GpsFix { lat: 9.03, lon: -38.74 }),
                status: Status::NotInfested,
            }])
            .unwrap();

        let conn = rusqlite::Connection::open(temp.path().join("corn_plants.db")).unwrap();
        let (lat, lon, status): (f64, f64, String) = conn
            .query_row("SELECT gps_lat, gps_lon, status FROM corn_plants", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(lat, 9.03);
        assert_eq!(lon, -38.74);
        assert_eq!(status, "NOT INFESTED");
    }

    #[test]
    fn empty_store_summarizes_to_nothing() {
        let (_temp, store) = make_store();
        assert!(store.batch_summary().unwrap().is_empty());
    }
}
