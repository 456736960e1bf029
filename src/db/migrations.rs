// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use rusqlite::Connection;
use anyhow::Result;

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: Activity log
    r#"
    CREATE TABLE activities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp_ms INTEGER NOT NULL,
        date_time TEXT NOT NULL,
        activity TEXT NOT NULL CHECK (activity IN (
            'sleeping', 'eating', 'reading', 'on-phone', 'in-conversation', 'busy', 'idle'
        )),
        confidence REAL NOT NULL DEFAULT 1.0,
        metadata TEXT
    );

    CREATE INDEX idx_activities_timestamp ON activities(timestamp_ms);
    "#,
    // Migration 2: Strategy, degradation flag, full confidence map
    r#"
    ALTER TABLE activities ADD COLUMN source TEXT NOT NULL DEFAULT 'rule'
        CHECK (source IN ('model', 'rule'));
    ALTER TABLE activities ADD COLUMN degraded INTEGER NOT NULL DEFAULT 0;
    ALTER TABLE activities ADD COLUMN confidences TEXT;

    CREATE INDEX idx_activities_activity ON activities(activity);
    "#,
];

/// Get current schema version from database
fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "PRAGMA user_version",
        [],
        |row| row.get(0)
    )?;
    Ok(version)
}

/// Run all pending migrations (crash-safe)
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    let target_version = MIGRATIONS.len() as u32;

    // Refuse to open a DB created by a newer build
    if current_version > target_version {
        anyhow::bail!(
            "Database schema version {} is newer than this build supports (max {}). Please upgrade roomwatch.",
            current_version,
            target_version
        );
    }

    if current_version == target_version {
        return Ok(());
    }

    // Apply pending migrations one-by-one
    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }

        conn.execute_batch(migration)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", migration_version))?;

        log::info!("Applied migration {}", migration_version);
    }

    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<u32> {
    get_schema_version(conn)
}
