// Database module

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use crate::classify::ClassificationResult;
use crate::constants::DB_FILENAME;
use crate::engine::PersistenceSink;
use crate::error::Result;

pub use schema::{ActivityRecord, ActivityStatistics, Period};

/// Open or create a database at the given path
pub fn open_db(db_path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;

    // Enable WAL mode so readers (CLI history) don't block the running engine
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    // Run migrations
    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Get the database path inside a data directory
pub fn get_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILENAME)
}

/// SQLite-backed activity log. One connection, serialized behind a mutex.
pub struct SqliteActivityStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteActivityStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_db(path)?;
        log::info!("Activity store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn save(&self, result: &ClassificationResult) -> Result<i64> {
        let id = schema::insert_activity(&self.conn(), result)?;
        log::debug!("Stored {} for cycle {} (id {})", result.activity, result.cycle_id, id);
        Ok(id)
    }

    pub fn latest(&self) -> Result<Option<ActivityRecord>> {
        schema::get_latest_activity(&self.conn())
    }

    pub fn list(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>> {
        schema::list_activities(&self.conn(), start, end, limit)
    }

    pub fn statistics<Tz: TimeZone>(&self, period: Period, now: &DateTime<Tz>) -> Result<ActivityStatistics> {
        schema::get_statistics(&self.conn(), period, now)
    }
}

impl PersistenceSink for SqliteActivityStore {
    fn store(&self, result: &ClassificationResult) -> Result<()> {
        self.save(result).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::rules;
    use crate::features::FeatureVector;
    use tempfile::TempDir;

    #[test]
    fn test_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = get_db_path(&dir.path().join("nested"));

        let result = rules::classify(&FeatureVector {
            motion_ratio: 0.7,
            ..FeatureVector::default()
        });
        {
            let store = SqliteActivityStore::open(&path).unwrap();
            store.store(&result).unwrap();
        }

        let store = SqliteActivityStore::open(&path).unwrap();
        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.activity, result.activity);
        assert_eq!(latest.timestamp.timestamp_millis(), result.timestamp.timestamp_millis());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn test_in_memory_store_statistics() {
        let store = SqliteActivityStore::open_in_memory().unwrap();
        let result = rules::classify(&FeatureVector::zeroed());
        store.save(&result).unwrap();

        let stats = store.statistics(Period::Last24h, &Utc::now()).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.most_frequent_activity, Some(result.activity));
        assert_eq!(store.list(None, None, 10).unwrap().len(), 1);
    }
}
